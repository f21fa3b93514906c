//! The message buffer: parsed representation of one IRC line.
//!
//! A [`MsgBuf`] is produced by [`MsgBuf::parse`] on input and serialized
//! with [`MsgBuf::serialize`] on output. Each tag carries the capability
//! mask of its owner; serialization elides tags whose mask does not
//! intersect the recipient's enabled capabilities.

use crate::error::{ParseError, TagError};
use crate::tags::{escape_tag_value, unescape_tag_value, valid_tag_key};
use crate::{DATALEN, MAXPARA, TAGSLEN};

/// One message tag: key, optional value, and the capability mask that must
/// intersect the recipient's capabilities for the tag to be sent.
///
/// Tags parsed off the wire carry mask 0 until a hook assigns one, so an
/// unapproved inbound tag is never echoed outward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: Option<String>,
    pub capmask: u64,
}

/// A parsed IRC message: tags, optional source prefix, command, parameters.
///
/// At most [`MAXPARA`] middle parameters plus one trailing parameter that
/// may contain spaces.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MsgBuf {
    pub tags: Vec<Tag>,
    pub source: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl MsgBuf {
    /// Start building a message with no source and no parameters.
    pub fn new(command: impl Into<String>) -> Self {
        MsgBuf {
            tags: Vec::new(),
            source: None,
            command: command.into(),
            params: Vec::new(),
        }
    }

    /// Builder: set the source prefix.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Builder: append a parameter.
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.params.push(param.into());
        self
    }

    /// Append a parameter, enforcing the parameter budget.
    pub fn push_param(&mut self, param: impl Into<String>) -> Result<(), ParseError> {
        if self.params.len() > MAXPARA {
            return Err(ParseError::TooManyParams);
        }
        self.params.push(param.into());
        Ok(())
    }

    /// Append a tag. Insertion order is preserved on the wire.
    pub fn append_tag(&mut self, key: impl Into<String>, value: Option<String>, capmask: u64) {
        self.tags.push(Tag {
            key: key.into(),
            value,
            capmask,
        });
    }

    /// Look up a tag value by key.
    pub fn get_tag(&self, key: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.key == key)
    }

    /// Parse one line (CR-LF already optional) into a message.
    pub fn parse(line: &str) -> Result<MsgBuf, ParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut rest = line;

        let mut tags = Vec::new();
        if let Some(tagged) = rest.strip_prefix('@') {
            let (block, after) = match tagged.split_once(' ') {
                Some((b, a)) => (b, a),
                None => (tagged, ""),
            };
            // '@' plus block plus separating space
            if block.len() + 2 > TAGSLEN {
                return Err(ParseError::MalformedTag(TagError::Oversize));
            }
            tags = parse_tag_block(block)?;
            rest = after;
        }

        // the command portion is limited to 512 bytes including CR-LF
        if rest.len() > DATALEN {
            return Err(ParseError::InputTooLong);
        }

        let mut rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            if tags.is_empty() {
                return Err(ParseError::EmptyLine);
            }
            return Err(ParseError::MissingCommand);
        }

        let mut source = None;
        if let Some(prefixed) = rest.strip_prefix(':') {
            let (src, after) = prefixed
                .split_once(' ')
                .ok_or(ParseError::MissingCommand)?;
            source = Some(src.to_string());
            rest = after.trim_start_matches(' ');
        }

        let (command, after) = match rest.split_once(' ') {
            Some((c, a)) => (c, a.trim_start_matches(' ')),
            None => (rest, ""),
        };
        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();
        let mut rest = after;
        while !rest.is_empty() {
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            if params.len() == MAXPARA {
                // ran out of middles; the remainder is the trailing param
                params.push(rest.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((tok, after)) => {
                    params.push(tok.to_string());
                    rest = after.trim_start_matches(' ');
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Ok(MsgBuf {
            tags,
            source,
            command: command.to_string(),
            params,
        })
    }

    /// Serialize for a recipient holding `caps`, without CR-LF.
    ///
    /// Tags whose capability mask does not intersect `caps` are elided.
    /// The non-tag portion is truncated at [`DATALEN`] bytes.
    pub fn serialize(&self, caps: u64) -> String {
        let mut out = String::with_capacity(64);

        let mut wrote_tag = false;
        for tag in self.tags.iter().filter(|t| t.capmask & caps != 0) {
            out.push(if wrote_tag { ';' } else { '@' });
            wrote_tag = true;
            out.push_str(&tag.key);
            if let Some(value) = &tag.value {
                out.push('=');
                let _ = escape_tag_value(&mut out, value);
            }
        }
        if wrote_tag {
            out.push(' ');
        }
        let body_start = out.len();

        if let Some(source) = &self.source {
            out.push(':');
            out.push_str(source);
            out.push(' ');
        }
        out.push_str(&self.command);

        for (i, param) in self.params.iter().enumerate() {
            out.push(' ');
            let last = i + 1 == self.params.len();
            if last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
                out.push(':');
            }
            out.push_str(param);
        }

        if out.len() - body_start > DATALEN {
            let mut cut = body_start + DATALEN;
            while !out.is_char_boundary(cut) {
                cut -= 1;
            }
            out.truncate(cut);
        }
        out
    }
}

/// Parse the tag block (without the leading `@`).
fn parse_tag_block(block: &str) -> Result<Vec<Tag>, ParseError> {
    let mut tags: Vec<Tag> = Vec::new();
    for item in block.split(';') {
        if item.is_empty() {
            continue;
        }
        let (key, raw_value) = match item.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (item, None),
        };
        if !valid_tag_key(key) {
            return Err(ParseError::MalformedTag(TagError::InvalidKey));
        }
        if tags.iter().any(|t| t.key == key) {
            return Err(ParseError::MalformedTag(TagError::DuplicateKey));
        }
        tags.push(Tag {
            key: key.to_string(),
            // an empty value is equivalent to a missing one
            value: raw_value.filter(|v| !v.is_empty()).map(unescape_tag_value),
            capmask: 0,
        });
    }
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let m = MsgBuf::parse("PING :irc.example.com\r\n").unwrap();
        assert_eq!(m.command, "PING");
        assert_eq!(m.params, vec!["irc.example.com"]);
        assert!(m.source.is_none());
    }

    #[test]
    fn test_parse_source_and_middles() {
        let m = MsgBuf::parse(":nick!user@host PRIVMSG #chan :hello world").unwrap();
        assert_eq!(m.source.as_deref(), Some("nick!user@host"));
        assert_eq!(m.command, "PRIVMSG");
        assert_eq!(m.params, vec!["#chan", "hello world"]);
    }

    #[test]
    fn test_parse_tags() {
        let m = MsgBuf::parse("@time=2021-01-01T00:00:00.000Z;msgid=abc PRIVMSG #c :hi").unwrap();
        assert_eq!(m.tags.len(), 2);
        assert_eq!(m.tags[0].key, "time");
        assert_eq!(m.tags[0].value.as_deref(), Some("2021-01-01T00:00:00.000Z"));
        assert_eq!(m.tags[1].key, "msgid");
    }

    #[test]
    fn test_parse_tag_value_unescaping() {
        let m = MsgBuf::parse("@+draft/reply=a\\sb TAGMSG #c").unwrap();
        assert_eq!(m.tags[0].value.as_deref(), Some("a b"));
    }

    #[test]
    fn test_duplicate_tag_rejected() {
        let err = MsgBuf::parse("@msgid=a;msgid=b PRIVMSG #c :x").unwrap_err();
        assert_eq!(err, ParseError::MalformedTag(TagError::DuplicateKey));
    }

    #[test]
    fn test_invalid_tag_key_rejected() {
        let err = MsgBuf::parse("@bad key=1 PRIVMSG #c :x").unwrap_err();
        assert!(matches!(err, ParseError::MalformedTag(_)));
    }

    #[test]
    fn test_empty_line() {
        assert_eq!(MsgBuf::parse("\r\n").unwrap_err(), ParseError::EmptyLine);
        assert_eq!(MsgBuf::parse("   ").unwrap_err(), ParseError::EmptyLine);
    }

    #[test]
    fn test_oversize_input_rejected() {
        let line = format!("PRIVMSG #c :{}", "x".repeat(600));
        assert_eq!(MsgBuf::parse(&line).unwrap_err(), ParseError::InputTooLong);
    }

    #[test]
    fn test_tags_do_not_count_against_line_length() {
        let line = format!("@a={} PING :x", "y".repeat(700));
        assert!(MsgBuf::parse(&line).is_ok());
    }

    #[test]
    fn test_param_overflow_folds_into_trailing() {
        let middles: Vec<String> = (0..20).map(|i| format!("p{i}")).collect();
        let line = format!("CMD {}", middles.join(" "));
        let m = MsgBuf::parse(&line).unwrap();
        assert_eq!(m.params.len(), MAXPARA + 1);
        assert_eq!(m.params[MAXPARA], "p14 p15 p16 p17 p18 p19");
    }

    #[test]
    fn test_serialize_cap_filtering() {
        let mut m = MsgBuf::new("PRIVMSG").with_param("#c").with_param("hi");
        m.append_tag("time", Some("now".into()), 0x1);
        m.append_tag("msgid", Some("abc".into()), 0x2);
        assert_eq!(m.serialize(0x1), "@time=now PRIVMSG #c hi");
        assert_eq!(m.serialize(0x3), "@time=now;msgid=abc PRIVMSG #c hi");
        assert_eq!(m.serialize(0x4), "PRIVMSG #c hi");
    }

    #[test]
    fn test_serialize_trailing_colon_rules() {
        let m = MsgBuf::new("PRIVMSG")
            .with_param("#c")
            .with_param("two words");
        assert_eq!(m.serialize(0), "PRIVMSG #c :two words");

        let m = MsgBuf::new("AWAY").with_param("");
        assert_eq!(m.serialize(0), "AWAY :");
    }

    #[test]
    fn test_serialize_truncates_body_not_tags() {
        let mut m = MsgBuf::new("PRIVMSG")
            .with_param("#c")
            .with_param("x".repeat(600));
        m.append_tag("time", Some("t".into()), 0x1);
        let s = m.serialize(0x1);
        let body = s.split_once(' ').unwrap().1;
        assert_eq!(body.len(), DATALEN);
    }

    #[test]
    fn test_roundtrip_modulo_trailing_marker() {
        let cases = [
            ":src PRIVMSG #chan :hello world",
            "PING token",
            ":server 001 nick :Welcome to the network",
        ];
        for raw in cases {
            let m = MsgBuf::parse(raw).unwrap();
            let m2 = MsgBuf::parse(&m.serialize(0)).unwrap();
            assert_eq!(m, m2);
        }
    }
}
