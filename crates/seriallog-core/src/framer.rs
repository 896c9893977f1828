//! Line framing for raw device byte streams.
//!
//! [`LineFramer`] is a [`Decoder`], so wrapping a device reader in
//! `FramedRead::new(reader, LineFramer::new())` yields a lazy stream of
//! cleaned lines. The stream ends (`None`) when the device reports EOF and
//! yields an error item when a read fails; both end the ingestion cycle.

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::debug;

use crate::error::FrameError;
use crate::line::sanitize_line;

/// Byte that terminates a device line.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Longest chunk buffered while waiting for a terminator (64 KiB).
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Splits a byte stream at [`LINE_TERMINATOR`] and sanitizes each chunk.
///
/// Partial chunks are buffered across reads. Chunks that are empty after
/// sanitization produce no item.
#[derive(Debug, Clone)]
pub struct LineFramer {
    max_length: usize,
    /// Bytes already scanned for a terminator
    next_index: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineFramer {
    type Item = String;
    type Error = FrameError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, FrameError> {
        loop {
            let unscanned = buf.get(self.next_index..).unwrap_or_default();
            match unscanned.iter().position(|b| *b == LINE_TERMINATOR) {
                Some(offset) => {
                    let chunk = buf.split_to(self.next_index + offset + 1);
                    self.next_index = 0;
                    if let Some(line) = sanitize_line(&chunk) {
                        return Ok(Some(line));
                    }
                }
                None => {
                    if buf.len() > self.max_length {
                        return Err(FrameError::LineTooLong {
                            max: self.max_length,
                        });
                    }
                    self.next_index = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, FrameError> {
        let line = self.decode(buf)?;
        if line.is_none() && !buf.is_empty() {
            debug!(bytes = buf.len(), "Discarding unterminated trailing bytes");
            buf.clear();
            self.next_index = 0;
        }
        Ok(line)
    }
}
