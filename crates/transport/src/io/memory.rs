//! In-memory transport implementation for testing

use std::io::{self, Cursor, Read, Write};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use super::RideTransport;
use crate::error::TransportError;

/// In-memory transport for testing
///
/// This transport uses channels for bidirectional communication without
/// requiring actual network connections. Typically one end is handed to the
/// adapter and the other is driven by a scripted fake interpreter.
///
/// # Examples
///
/// ```
/// use transport::io::{InMemoryTransport, RideTransport};
///
/// let (adapter, interpreter) = InMemoryTransport::pair();
/// // adapter writes -> interpreter reads
/// // interpreter writes -> adapter reads
/// # let _ = (adapter.split(), interpreter.split());
/// ```
pub struct InMemoryTransport {
    reader: InMemoryReader,
    writer: InMemoryWriter,
}

/// Reader half of in-memory transport
///
/// When the channel is empty it returns `WouldBlock` to mimic the TCP
/// transport's read timeout; when the peer has gone it returns EOF.
pub struct InMemoryReader {
    buffer: Cursor<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

/// Writer half of in-memory transport
#[derive(Clone)]
pub struct InMemoryWriter {
    tx: Sender<Vec<u8>>,
}

impl InMemoryTransport {
    /// Create a connected pair of in-memory transports
    pub fn pair() -> (Self, Self) {
        let (left_tx, right_rx) = crossbeam_channel::unbounded();
        let (right_tx, left_rx) = crossbeam_channel::unbounded();

        let left = Self {
            reader: InMemoryReader {
                buffer: Cursor::new(Vec::new()),
                rx: left_rx,
            },
            writer: InMemoryWriter { tx: left_tx },
        };

        let right = Self {
            reader: InMemoryReader {
                buffer: Cursor::new(Vec::new()),
                rx: right_rx,
            },
            writer: InMemoryWriter { tx: right_tx },
        };

        (left, right)
    }
}

impl RideTransport for InMemoryTransport {
    type Reader = InMemoryReader;
    type Writer = InMemoryWriter;

    fn split(self) -> Result<(Self::Reader, Self::Writer), TransportError> {
        Ok((self.reader, self.writer))
    }
}

impl Read for InMemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.buffer.position() >= self.buffer.get_ref().len() as u64 {
            match self.rx.try_recv() {
                Ok(data) => self.buffer = Cursor::new(data),
                Err(TryRecvError::Empty) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WouldBlock,
                        "no data available",
                    ));
                }
                Err(TryRecvError::Disconnected) => return Ok(0),
            }
        }
        self.buffer.read(buf)
    }
}

impl Write for InMemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel disconnected"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
