//! Tokio codec for IRC line framing.
//!
//! Splits the byte stream at `\n` (tolerating a preceding `\r`), bounds
//! buffer growth at the protocol maximum (tag budget plus command budget),
//! and hands oversized lines to the caller flagged rather than silently
//! dropped, so the connection can reply with the proper numeric.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{DATALEN, TAGSLEN};

/// Hard cap on a single inbound line: full tag budget plus command portion
/// plus CR-LF.
pub const MAX_LINE: usize = TAGSLEN + DATALEN + 2;

/// One framed inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedLine {
    /// Line text without the terminator. Lossy UTF-8: IRC does not promise
    /// an encoding and the parser operates on what clients actually send.
    pub text: String,
    /// Set when the line exceeded [`MAX_LINE`] and its tail was discarded.
    pub truncated: bool,
}

/// Codec turning a TCP/TLS byte stream into [`FramedLine`]s and encoding
/// outbound strings with CR-LF termination.
#[derive(Debug, Default)]
pub struct LineCodec {
    /// When set, bytes are being discarded until the next `\n`.
    discarding: bool,
}

impl LineCodec {
    pub fn new() -> Self {
        Self { discarding: false }
    }
}

impl Decoder for LineCodec {
    type Item = FramedLine;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<FramedLine>, Self::Error> {
        if let Some(pos) = src.iter().position(|&b| b == b'\n') {
            let mut line = src.split_to(pos + 1);
            if self.discarding {
                self.discarding = false;
                return Ok(Some(FramedLine {
                    text: String::new(),
                    truncated: true,
                }));
            }
            // strip \n and an optional preceding \r
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            let text = String::from_utf8_lossy(&line).into_owned();
            return Ok(Some(FramedLine {
                text,
                truncated: false,
            }));
        }

        if src.len() > MAX_LINE {
            src.advance(src.len());
            self.discarding = true;
        }
        Ok(None)
    }
}

impl Encoder<String> for LineCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 2);
        dst.put_slice(item.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
