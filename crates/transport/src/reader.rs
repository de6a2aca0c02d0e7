use std::io::{self, Read};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::FrameCodec;
use crate::error::TransportError;
use crate::traffic::{Direction, Tap};

const READ_CHUNK: usize = 8 * 1024;

/// Result of a timeout-aware poll operation
#[derive(Debug, PartialEq, Eq)]
pub enum PollResult {
    /// A complete frame payload was received
    Frame(String),
    /// The connection was closed on a frame boundary
    Closed,
    /// The timeout expired before a complete frame was received
    Timeout,
}

/// Blocking reader that yields whole frame payloads.
///
/// Bytes are accumulated in an internal buffer, so a read timeout that fires
/// half way through a frame never loses data: the next poll resumes where the
/// previous one stopped.
pub struct FrameReader<R> {
    input: R,
    codec: FrameCodec,
    buffer: BytesMut,
    tap: Option<Tap>,
}

impl<R> FrameReader<R>
where
    R: Read,
{
    pub fn new(input: R) -> Self {
        Self::with_codec(input, FrameCodec::new())
    }

    pub fn with_codec(input: R, codec: FrameCodec) -> Self {
        Self {
            input,
            codec,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            tap: None,
        }
    }

    pub fn set_tap(&mut self, tap: Option<Tap>) {
        self.tap = tap;
    }

    /// Block until a frame arrives.
    ///
    /// Returns `Ok(None)` when the peer closes the stream on a frame boundary.
    pub fn read_frame(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.try_read_frame(Duration::from_secs(1))? {
                PollResult::Frame(payload) => return Ok(Some(payload)),
                PollResult::Closed => return Ok(None),
                PollResult::Timeout => continue,
            }
        }
    }

    /// Attempt to receive a frame, giving up once `timeout` has elapsed.
    ///
    /// The actual wait may overshoot by up to the underlying stream's read
    /// timeout.
    pub fn try_read_frame(&mut self, timeout: Duration) -> Result<PollResult, TransportError> {
        let start = Instant::now();
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some(payload) = self.codec.decode(&mut self.buffer)? {
                tracing::trace!(payload = %payload, "received raw frame");
                if let Some(tap) = &self.tap {
                    tap.record(Direction::Inbound, &payload);
                }
                return Ok(PollResult::Frame(payload));
            }

            if start.elapsed() >= timeout {
                return Ok(PollResult::Timeout);
            }

            match self.input.read(&mut chunk) {
                Ok(0) => {
                    if self.buffer.is_empty() {
                        return Ok(PollResult::Closed);
                    }
                    return Err(TransportError::Truncated(self.buffer.len()));
                }
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    // Brief sleep to prevent CPU spinning on sources that
                    // report WouldBlock without waiting
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
    }

    /// Wait for one frame, failing with [`TransportError::Timeout`] or
    /// [`TransportError::Closed`] instead of returning a poll state.
    pub fn expect_frame(&mut self, timeout: Duration) -> Result<String, TransportError> {
        match self.try_read_frame(timeout)? {
            PollResult::Frame(payload) => Ok(payload),
            PollResult::Closed => Err(TransportError::Closed),
            PollResult::Timeout => Err(TransportError::Timeout(timeout)),
        }
    }
}
