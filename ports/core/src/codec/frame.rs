//! Frame Codec
//!
//! Default message format: length-prefixed JSON with a CRC32 checksum.
//!
//! # Frame Format
//!
//! ```text
//! +----------------+----------------+------------------------------------------+
//! | Length (4)     | Checksum (4)   | JSON Payload (variable)                  |
//! | big-endian u32 | CRC32          | {"name": ..., "body": ...}               |
//! +----------------+----------------+------------------------------------------+
//! ```
//!
//! Length covers the payload only. A frame whose checksum or JSON is bad is
//! skipped so that the stream resynchronizes on the next frame. A length
//! beyond [`MAX_FRAME_SIZE`] cannot be trusted to locate the next frame, so
//! the whole buffer is discarded.

use std::any::Any;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{MessageParser, MessageRef, ProtocolMessage};
use crate::error::CodecError;

/// Protocol family name of [`FrameMessage`]
pub const FRAME_PROTOCOL: &str = "frame";

/// Maximum payload size (1 MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length + checksum
const HEADER_SIZE: usize = 8;

/// Compact once this many consumed bytes sit at the front of the buffer
const COMPACT_THRESHOLD: usize = 4096;

/// Encode `msg` into a complete frame
///
/// # Errors
///
/// Returns `CodecError::Serialization` if JSON serialization fails and
/// `CodecError::FrameTooLarge` if the payload exceeds [`MAX_FRAME_SIZE`].
pub fn encode_frame<T: Serialize>(msg: &T, out: &mut Vec<u8>) -> Result<(), CodecError> {
    let json = serde_json::to_vec(msg).map_err(|e| CodecError::Serialization(e.to_string()))?;
    if json.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            len: json.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let len = u32::try_from(json.len()).map_err(|_| CodecError::FrameTooLarge {
        len: json.len(),
        max: MAX_FRAME_SIZE,
    })?;
    out.reserve(HEADER_SIZE + json.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&crc32fast::hash(&json).to_be_bytes());
    out.extend_from_slice(&json);
    Ok(())
}

/// Streaming frame decoder
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    read_pos: usize,
}

impl FrameDecoder {
    /// Empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append inbound bytes
    pub fn push(&mut self, data: &[u8]) {
        if self.read_pos >= COMPACT_THRESHOLD && self.read_pos > self.buffer.len() / 2 {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet decoded
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Decode the next frame payload as `T`
    ///
    /// # Errors
    ///
    /// `ChecksumMismatch` and `Serialization` skip the offending frame;
    /// `FrameTooLarge` clears the buffer.
    pub fn decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>, CodecError> {
        let rest = &self.buffer[self.read_pos..];
        let Some((header, tail)) = rest.split_first_chunk::<HEADER_SIZE>() else {
            return Ok(None);
        };

        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if len > MAX_FRAME_SIZE {
            self.clear();
            return Err(CodecError::FrameTooLarge {
                len,
                max: MAX_FRAME_SIZE,
            });
        }
        if tail.len() < len {
            return Ok(None);
        }

        let expected = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        let payload = &tail[..len];
        self.read_pos += HEADER_SIZE + len;

        let actual = crc32fast::hash(payload);
        if actual != expected {
            return Err(CodecError::ChecksumMismatch { expected, actual });
        }

        serde_json::from_slice(payload)
            .map(Some)
            .map_err(|e| CodecError::Serialization(e.to_string()))
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
    }
}

/// Named JSON message carried in a frame
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameMessage {
    /// Message name
    pub name: String,
    /// Arbitrary JSON body
    #[serde(default)]
    pub body: serde_json::Value,
}

impl FrameMessage {
    /// Build a message
    #[must_use]
    pub fn new(name: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }
}

impl ProtocolMessage for FrameMessage {
    fn protocol(&self) -> &str {
        FRAME_PROTOCOL
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        encode_frame(self, out)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// [`MessageParser`] producing [`FrameMessage`]s
#[derive(Debug, Default)]
pub struct FrameParser {
    decoder: FrameDecoder,
}

impl FrameParser {
    /// Fresh parser
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageParser for FrameParser {
    fn protocol(&self) -> &str {
        FRAME_PROTOCOL
    }

    fn push(&mut self, data: &[u8]) {
        self.decoder.push(data);
    }

    fn decode(&mut self) -> Result<Option<MessageRef>, CodecError> {
        Ok(self
            .decoder
            .decode::<FrameMessage>()?
            .map(|msg| std::sync::Arc::new(msg) as MessageRef))
    }
}
