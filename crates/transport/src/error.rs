//! Error types for the transport layer.

use std::io;

/// Errors that can occur while framing, reading or writing RIDE messages.
///
/// Every variant except [`TransportError::Io`] and [`TransportError::Closed`]
/// is fatal to the link: the byte stream can no longer be trusted to be
/// aligned on a frame boundary.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// An I/O error occurred while reading or writing.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The four tag bytes following the length did not match the expected magic.
    #[error("bad magic tag {found:?}, expected {expected:?}")]
    BadMagic {
        /// The tag bytes that were read.
        found: [u8; 4],
        /// The tag bytes the codec was configured with.
        expected: [u8; 4],
    },

    /// The declared frame length is smaller than the fixed header.
    #[error("declared frame length {0} is shorter than the 8 byte header")]
    BadLength(u32),

    /// The declared frame length exceeds the configured maximum.
    #[error("frame size {size} exceeds maximum allowed {max}")]
    FrameTooLarge {
        /// The declared frame size.
        size: usize,
        /// The maximum allowed size.
        max: usize,
    },

    /// The frame payload was not valid UTF-8.
    #[error("frame payload is not valid UTF-8")]
    InvalidUtf8(#[source] std::str::Utf8Error),

    /// The peer closed the stream part way through a frame.
    #[error("stream closed with {0} bytes of an incomplete frame buffered")]
    Truncated(usize),

    /// The peer closed the stream.
    #[error("connection closed")]
    Closed,

    /// The version negotiation did not follow the expected sequence.
    #[error("handshake failed: expected {expected:?}, received {received:?}")]
    Handshake {
        /// What this side expected to read.
        expected: String,
        /// What was actually read.
        received: String,
    },

    /// No frame arrived within the allotted time.
    #[error("timed out after {0:?} waiting for a frame")]
    Timeout(std::time::Duration),
}

impl TransportError {
    /// Whether the error means the remote end has gone away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            TransportError::Closed | TransportError::Truncated(_) => true,
            TransportError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
