//! Parse error taxonomy for inbound lines.

use thiserror::Error;

/// Errors produced while parsing a single wire line into a [`MsgBuf`].
///
/// `EmptyLine` is not a protocol violation; callers silently skip it.
///
/// [`MsgBuf`]: crate::MsgBuf
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The line contained nothing but whitespace.
    #[error("empty line")]
    EmptyLine,

    /// A message tag violated the IRCv3 grammar.
    #[error("malformed tag: {0}")]
    MalformedTag(TagError),

    /// The command portion of the line exceeded 512 bytes.
    #[error("input line too long")]
    InputTooLong,

    /// More parameters than the grammar allows.
    #[error("too many parameters")]
    TooManyParams,

    /// A line with tags and/or a prefix but no command.
    #[error("missing command")]
    MissingCommand,
}

/// The specific way a tag block was malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("invalid key character")]
    InvalidKey,
    #[error("duplicate key")]
    DuplicateKey,
    #[error("tag block oversized")]
    Oversize,
}
