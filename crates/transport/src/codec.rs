//! RIDE frame codec implementation using tokio-util.
//!
//! Every RIDE message travels in a binary envelope:
//!
//! ```text
//! +----------------------+------------+-----------------+
//! | length (u32, BE)     | magic tag  | UTF-8 payload   |
//! +----------------------+------------+-----------------+
//!   4 bytes                4 bytes      length - 8 bytes
//! ```
//!
//! The length counts the whole envelope including itself, so a frame with an
//! empty payload declares a length of 8. There is no checksum.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::TransportError;

/// Magic tag used by the interpreter.
pub const RIDE_MAGIC: [u8; 4] = *b"RIDE";

/// Size of the length field plus the magic tag.
pub const HEADER_LEN: usize = 8;

/// Default maximum frame size (16 MB).
const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Codec for encoding and decoding RIDE frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    magic: [u8; 4],
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            magic: RIDE_MAGIC,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a codec that rejects frames larger than `max_frame_size` bytes.
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            ..Self::new()
        }
    }

    pub fn magic(&self) -> [u8; 4] {
        self.magic
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let declared = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        let total = declared as usize;
        if total < HEADER_LEN {
            return Err(TransportError::BadLength(declared));
        }
        if total > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: total,
                max: self.max_frame_size,
            });
        }

        let found = [src[4], src[5], src[6], src[7]];
        if found != self.magic {
            return Err(TransportError::BadMagic {
                found,
                expected: self.magic,
            });
        }

        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total);
        frame.advance(HEADER_LEN);
        let payload = std::str::from_utf8(&frame).map_err(TransportError::InvalidUtf8)?;
        Ok(Some(payload.to_string()))
    }
}

impl Encoder<&str> for FrameCodec {
    type Error = TransportError;

    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let total = HEADER_LEN + item.len();
        if total > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: total,
                max: self.max_frame_size,
            });
        }
        let declared = u32::try_from(total).map_err(|_| TransportError::FrameTooLarge {
            size: total,
            max: u32::MAX as usize,
        })?;

        dst.reserve(total);
        dst.put_u32(declared);
        dst.put_slice(&self.magic);
        dst.put_slice(item.as_bytes());
        Ok(())
    }
}
