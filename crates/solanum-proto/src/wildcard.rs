//! Wildcard mask matching for hostmasks, gecos masks and server names.
//!
//! `*` matches any run of characters, `?` matches exactly one. Comparison
//! folds through RFC1459 casemapping, matching how bans and auth blocks are
//! written in practice.

use crate::casemap::to_lower;

/// Match `text` against `mask`, case-insensitively under RFC1459 mapping.
pub fn mask_match(mask: &str, text: &str) -> bool {
    match_inner(mask.as_bytes(), text.as_bytes(), true)
}

/// Case-sensitive variant, used for tag values and message-id comparisons.
pub fn mask_match_cs(mask: &str, text: &str) -> bool {
    match_inner(mask.as_bytes(), text.as_bytes(), false)
}

/// Iterative glob match with single-level backtracking over `*`.
fn match_inner(mask: &[u8], text: &[u8], fold: bool) -> bool {
    let (mut m, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    let eq = |a: u8, b: u8| {
        if fold {
            to_lower(a) == to_lower(b)
        } else {
            a == b
        }
    };

    while t < text.len() {
        if m < mask.len() && mask[m] == b'*' {
            // collapse runs of stars, remember the restart point
            while m < mask.len() && mask[m] == b'*' {
                m += 1;
            }
            star = Some((m, t));
        } else if m < mask.len() && (mask[m] == b'?' || eq(mask[m], text[t])) {
            m += 1;
            t += 1;
        } else if let Some((sm, st)) = star {
            m = sm;
            t = st + 1;
            star = Some((sm, st + 1));
        } else {
            return false;
        }
    }

    while m < mask.len() && mask[m] == b'*' {
        m += 1;
    }
    m == mask.len()
}

/// Whether the mask contains any wildcard characters.
#[inline]
pub fn has_wildcard(mask: &str) -> bool {
    mask.bytes().any(|c| c == b'*' || c == b'?')
}

/// Split a `user@host` mask into its user and host parts.
///
/// A mask with no `@` is treated as `*@mask`.
pub fn split_user_host(mask: &str) -> (&str, &str) {
    match mask.split_once('@') {
        Some((user, host)) if !user.is_empty() => (user, host),
        Some((_, host)) => ("*", host),
        None => ("*", mask),
    }
}
