//! RIDE transport
//!
//! This crate moves whole messages between the adapter and an interpreter's
//! remote-debugging port: binary framing, version negotiation, duplex IO
//! backends and optional traffic observation. It knows nothing about the
//! meaning of payloads.
mod codec;
mod error;
pub mod handshake;
pub mod io;
mod reader;
pub mod traffic;
mod writer;

pub use codec::{FrameCodec, HEADER_LEN, RIDE_MAGIC};
pub use error::TransportError;
pub use io::{InMemoryTransport, RideTransport, TcpTransport};
pub use reader::{FrameReader, PollResult};
pub use traffic::{Clock, Direction, SystemClock, Tap, TrafficObserver, TrafficRecord};
pub use writer::FrameWriter;

/// The default port an interpreter serves RIDE on
pub const DEFAULT_RIDE_PORT: u16 = 4502;

/// Reader half produced by [`framed`].
pub type BoxedFrameReader = FrameReader<Box<dyn std::io::Read + Send>>;

/// Split a transport into framed halves, attaching `tap` to both.
pub fn framed<T>(
    transport: T,
    tap: Option<Tap>,
) -> Result<(BoxedFrameReader, FrameWriter), TransportError>
where
    T: RideTransport,
{
    let (input, output) = transport.split()?;
    let mut reader = FrameReader::new(Box::new(input) as Box<dyn std::io::Read + Send>);
    let mut writer = FrameWriter::new(output);
    reader.set_tap(tap.clone());
    writer.set_tap(tap);
    Ok((reader, writer))
}
