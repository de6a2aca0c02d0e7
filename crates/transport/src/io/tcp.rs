//! TCP-based transport implementation

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use retry::{delay::Exponential, retry};

use super::RideTransport;
use crate::error::TransportError;

/// Read timeout applied to the socket so the reader loop wakes up regularly.
const READ_TIMEOUT: Duration = Duration::from_millis(250);

/// TCP-based RIDE transport
///
/// # Timeout Behavior
///
/// The reader is configured with a short read timeout to enable periodic
/// checking of shutdown signals in the background reader thread. When no
/// data is available, the reader returns `WouldBlock` errors.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Create a new TCP transport from an existing stream
    ///
    /// # Errors
    ///
    /// Returns an error if configuring the stream fails
    pub fn new(stream: TcpStream) -> Result<Self, TransportError> {
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Connect to an interpreter at the given address
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        Self::new(stream)
    }

    /// Connect with exponential back-off (200ms, 400ms, 800ms, ...).
    ///
    /// Interpreters started by an external process may take a moment before
    /// they listen on their RIDE port.
    pub fn connect_with_retry<A>(addr: A, attempts: usize) -> Result<Self, TransportError>
    where
        A: ToSocketAddrs + Clone,
    {
        let stream = retry(Exponential::from_millis(200).take(attempts), || {
            tracing::debug!("trying to make connection");
            match TcpStream::connect(addr.clone()) {
                Ok(stream) => {
                    tracing::debug!("connection made");
                    Ok(stream)
                }
                Err(e) => {
                    tracing::debug!(error = %e, "error making connection");
                    Err(e)
                }
            }
        })
        .map_err(|e| TransportError::Io(e.error))?;
        Self::new(stream)
    }
}

impl RideTransport for TcpTransport {
    type Reader = TcpStream;
    type Writer = TcpStream;

    fn split(self) -> Result<(Self::Reader, Self::Writer), TransportError> {
        let input = self.stream.try_clone()?;
        Ok((input, self.stream))
    }
}
