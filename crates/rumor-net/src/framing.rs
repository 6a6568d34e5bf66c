//! Message framing for stdio transport
//!
//! One JSON message per line. Blank lines are skipped; lines beyond the
//! configured maximum are discarded up to the next newline.

use bytes::{BufMut, BytesMut};
use rumor_core::Message;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Default maximum line size (1 MiB)
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Framing errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Line too long (max {0} bytes)")]
    TooLong(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FrameError {
    /// Whether the stream can keep being read after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::TooLong(_))
    }
}

/// Codec for newline-delimited JSON
///
/// Decoding yields raw lines so the caller can decide how to treat a body
/// that fails to parse. Encoding writes one compact JSON object plus `\n`.
pub struct JsonLinesCodec {
    lines: LinesCodec,
    max_line_bytes: usize,
}

impl JsonLinesCodec {
    /// Create a new codec with the default line limit
    pub fn new() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_line_bytes),
            max_line_bytes,
        }
    }

    fn lift(&self, result: Result<Option<String>, LinesCodecError>) -> Result<Option<String>, FrameError> {
        match result {
            Ok(line) => Ok(line),
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                Err(FrameError::TooLong(self.max_line_bytes))
            }
            Err(LinesCodecError::Io(e)) => Err(FrameError::Io(e)),
        }
    }
}

impl Default for JsonLinesCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonLinesCodec {
    type Item = String;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let result = self.lines.decode(src);
            match self.lift(result)? {
                Some(line) if line.trim().is_empty() => continue,
                other => return Ok(other),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let result = self.lines.decode_eof(src);
            match self.lift(result)? {
                Some(line) if line.trim().is_empty() => continue,
                other => return Ok(other),
            }
        }
    }
}

impl<'a> Encoder<&'a Message> for JsonLinesCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &'a Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        serde_json::to_writer(dst.writer(), item)?;
        dst.put_u8(b'\n');
        Ok(())
    }
}
