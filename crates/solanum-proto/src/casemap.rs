//! RFC1459 casemapping.
//!
//! Under RFC1459 mapping the characters `{}|^` are the lowercase forms of
//! `[]\~`. Nicknames, channel names and hostmask comparisons all fold
//! through this table.

/// Fold a single byte to its RFC1459 lowercase form.
#[inline]
pub fn to_lower(c: u8) -> u8 {
    match c {
        b'A'..=b'Z' => c + 32,
        b'[' => b'{',
        b']' => b'}',
        b'\\' => b'|',
        b'~' => b'^',
        _ => c,
    }
}

/// Fold an entire string to RFC1459 lowercase.
pub fn to_irc_lower(s: &str) -> String {
    s.bytes().map(|b| to_lower(b) as char).collect()
}

/// Case-insensitive comparison under RFC1459 mapping.
///
/// Returns `true` when the two strings are equal after folding.
pub fn irccmp(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes()
            .zip(b.bytes())
            .all(|(x, y)| to_lower(x) == to_lower(y))
}

/// Whether `nick` is a valid IRC nickname: leading letter or special,
/// followed by letters, digits, specials or `-`.
pub fn valid_nick(nick: &str) -> bool {
    if nick.is_empty() || nick.len() > 30 {
        return false;
    }
    let mut bytes = nick.bytes();
    let first = bytes.next().unwrap();
    if first.is_ascii_digit() || first == b'-' {
        return false;
    }
    nick.bytes().all(|c| {
        c.is_ascii_alphanumeric() || matches!(c, b'[' | b']' | b'\\' | b'`' | b'^' | b'{' | b'}' | b'|' | b'_' | b'-')
    })
}

/// Whether `name` looks like a channel name.
#[inline]
pub fn is_channel_name(name: &str) -> bool {
    matches!(name.as_bytes().first(), Some(b'#') | Some(b'&'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc1459_specials_fold() {
        assert!(irccmp("nick[a]\\~", "NICK{A}|^"));
        assert_eq!(to_irc_lower("[]\\~"), "{}|^");
    }

    #[test]
    fn test_irccmp_rejects_different_lengths() {
        assert!(!irccmp("abc", "abcd"));
    }

    #[test]
    fn test_valid_nick() {
        assert!(valid_nick("somenick"));
        assert!(valid_nick("[away]`x"));
        assert!(!valid_nick("1leading"));
        assert!(!valid_nick("-dash"));
        assert!(!valid_nick(""));
        assert!(!valid_nick("has space"));
    }

    #[test]
    fn test_is_channel_name() {
        assert!(is_channel_name("#help"));
        assert!(is_channel_name("&local"));
        assert!(!is_channel_name("nick"));
    }
}
