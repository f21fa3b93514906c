//! IRCv3 message-tag escaping and key validation.

use std::fmt::{Result as FmtResult, Write};

/// Escape a tag value for serialization per the IRCv3 message-tags spec.
pub fn escape_tag_value(f: &mut dyn Write, value: &str) -> FmtResult {
    for c in value.chars() {
        match c {
            ';' => f.write_str("\\:")?,
            ' ' => f.write_str("\\s")?,
            '\\' => f.write_str("\\\\")?,
            '\r' => f.write_str("\\r")?,
            '\n' => f.write_str("\\n")?,
            c => f.write_char(c)?,
        }
    }
    Ok(())
}

/// Unescape a tag value from wire format.
///
/// Unknown escapes `\x` yield `x`; a trailing lone backslash is dropped.
pub fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut iter = value.chars();
    while let Some(c) = iter.next() {
        let r = if c == '\\' {
            match iter.next() {
                Some(':') => ';',
                Some('s') => ' ',
                Some('\\') => '\\',
                Some('r') => '\r',
                Some('n') => '\n',
                Some(c) => c,
                None => break,
            }
        } else {
            c
        };
        out.push(r);
    }
    out
}

/// Validate a tag key against `[+]?[a-zA-Z0-9][a-zA-Z0-9/.-]*`.
///
/// The optional `+` prefix marks a client-only tag and is part of the key
/// on the wire.
pub fn valid_tag_key(key: &str) -> bool {
    let body = key.strip_prefix('+').unwrap_or(key);
    let mut bytes = body.bytes();
    match bytes.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    bytes.all(|c| c.is_ascii_alphanumeric() || matches!(c, b'/' | b'.' | b'-'))
}

/// Whether a key names a client-only tag (`+` prefixed).
#[inline]
pub fn is_client_tag(key: &str) -> bool {
    key.starts_with('+')
}
