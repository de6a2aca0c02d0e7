//! IO abstraction layer for the RIDE transport
//!
//! The core trait [`RideTransport`] allows plugging in different duplex byte
//! streams: a TCP socket to a running interpreter, or an in-memory channel
//! pair for tests.
//!
//! # Examples
//!
//! ## Using TCP Transport
//!
//! ```no_run
//! use transport::io::TcpTransport;
//!
//! let transport = TcpTransport::connect("127.0.0.1:4502")?;
//! let (reader, writer) = transport::framed(transport, None)?;
//! # Ok::<(), transport::TransportError>(())
//! ```
//!
//! ## Using In-Memory Transport for Testing
//!
//! ```
//! use transport::io::InMemoryTransport;
//!
//! let (adapter_side, interpreter_side) = InMemoryTransport::pair();
//! let (_reader, writer) = transport::framed(adapter_side, None)?;
//! writer.write_frame("SupportedProtocols=2")?;
//! # drop(interpreter_side);
//! # Ok::<(), transport::TransportError>(())
//! ```

use std::io::{Read, Write};

use crate::error::TransportError;

mod memory;
mod tcp;


pub use memory::{InMemoryReader, InMemoryTransport, InMemoryWriter};
pub use tcp::TcpTransport;

/// Trait for a bidirectional byte stream to the interpreter
///
/// Implementations must provide a way to split the transport into separate
/// reader and writer halves that can be moved into different threads.
///
/// # Requirements
///
/// - Both halves must be `Send + 'static`
/// - Readers should return `WouldBlock` (or `TimedOut`) periodically when no
///   data is available, so that the reader loop can observe cancellation
pub trait RideTransport: Send + 'static {
    type Reader: Read + Send + 'static;

    type Writer: Write + Send + 'static;

    /// Split the transport into separate reader and writer halves
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be split (e.g., socket cloning fails)
    fn split(self) -> Result<(Self::Reader, Self::Writer), TransportError>;
}
