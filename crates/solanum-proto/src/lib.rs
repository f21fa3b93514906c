//! solanum-proto - IRC wire protocol for the solanumd daemon.
//!
//! This crate owns everything about bytes on the wire: RFC1459 line framing
//! with IRCv3 message tags, the [`MsgBuf`] message representation and its
//! capability-gated serialization, RFC1459 casemapping, and the wildcard
//! mask matching used by the access-control subsystem.
//!
//! The daemon-side policy (which tags survive, which capabilities a
//! recipient has) lives in `solanumd`; this crate only enforces the wire
//! grammar and size limits.

pub mod casemap;
pub mod error;
pub mod msgbuf;
pub mod numeric;
pub mod tags;
pub mod wildcard;

#[cfg(feature = "tokio")]
pub mod codec;

pub use casemap::{irccmp, to_irc_lower};
pub use error::ParseError;
pub use msgbuf::{MsgBuf, Tag};
pub use numeric::Numeric;
pub use wildcard::{mask_match, mask_match_cs};

/// Maximum length of the non-tag portion of a line, excluding CR-LF.
pub const DATALEN: usize = 510;

/// Maximum length of the tag portion of a line, including the leading `@`
/// and the trailing space.
pub const TAGSLEN: usize = 8191;

/// Maximum number of middle parameters; one additional trailing parameter
/// may follow.
pub const MAXPARA: usize = 14;
