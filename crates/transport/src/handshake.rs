//! Protocol version negotiation.
//!
//! The interpreter speaks first:
//!
//! ```text
//! interpreter -> SupportedProtocols=2
//! adapter     -> SupportedProtocols=2
//! adapter     -> UsingProtocol=2
//! interpreter -> UsingProtocol=2
//! ```
//!
//! Any other text or ordering aborts session start. Nothing here is retried.

use std::io::Read;
use std::time::Duration;

use crate::error::TransportError;
use crate::reader::FrameReader;
use crate::writer::FrameWriter;

/// Protocol version spoken by current interpreters.
pub const DEFAULT_PROTOCOL_VERSION: u32 = 2;

/// How long to wait for each handshake frame from the interpreter.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn supported_protocols(version: u32) -> String {
    format!("SupportedProtocols={version}")
}

pub fn using_protocol(version: u32) -> String {
    format!("UsingProtocol={version}")
}

/// Run the adapter side of the version negotiation.
#[tracing::instrument(skip(reader, writer))]
pub fn negotiate<R>(
    reader: &mut FrameReader<R>,
    writer: &FrameWriter,
    version: u32,
    timeout: Duration,
) -> Result<(), TransportError>
where
    R: Read,
{
    let greeting = reader.expect_frame(timeout)?;
    let expected = supported_protocols(version);
    if greeting != expected {
        return Err(TransportError::Handshake {
            expected,
            received: greeting,
        });
    }
    tracing::debug!(%greeting, "received protocol greeting");

    writer.write_frame(&greeting)?;
    let using = using_protocol(version);
    writer.write_frame(&using)?;

    let echo = reader.expect_frame(timeout)?;
    if echo != using {
        return Err(TransportError::Handshake {
            expected: using,
            received: echo,
        });
    }

    tracing::debug!(version, "protocol negotiated");
    Ok(())
}
