//! A scripted stand-in for an interpreter, for tests.
//!
//! The fake owns one end of an [`InMemoryTransport`] pair. Its handshake
//! replies are written up front, so [`Connection::establish`] can run on the
//! test thread without a peer thread answering in lockstep.
//!
//! [`Connection::establish`]: crate::Connection::establish

use std::time::{Duration, Instant};

use eyre::WrapErr;
use protocol::{Command, DecodedMessage};
use transport::handshake::{supported_protocols, using_protocol};
use transport::{BoxedFrameReader, FrameWriter, InMemoryTransport, PollResult};

use crate::connection::bootstrap_commands;

pub struct FakeInterpreter {
    reader: BoxedFrameReader,
    writer: FrameWriter,
    version: u32,
}

impl FakeInterpreter {
    /// Returns the adapter's end of the link and the fake interpreter.
    pub fn new(version: u32) -> eyre::Result<(InMemoryTransport, Self)> {
        let (adapter, interpreter) = InMemoryTransport::pair();
        let (reader, writer) = transport::framed(interpreter, None)?;
        writer.write_frame(&supported_protocols(version))?;
        writer.write_frame(&using_protocol(version))?;
        Ok((
            adapter,
            Self {
                reader,
                writer,
                version,
            },
        ))
    }

    /// Consume the adapter's handshake replies and bootstrap commands,
    /// checking each one.
    pub fn accept(&mut self, timeout: Duration) -> eyre::Result<()> {
        let echo = self.reader.expect_frame(timeout)?;
        eyre::ensure!(
            echo == supported_protocols(self.version),
            "unexpected greeting echo {echo:?}"
        );
        let using = self.reader.expect_frame(timeout)?;
        eyre::ensure!(
            using == using_protocol(self.version),
            "unexpected protocol selection {using:?}"
        );
        for expected in bootstrap_commands() {
            let got = self.expect(timeout)?;
            eyre::ensure!(got == expected, "expected {expected:?}, got {got:?}");
        }
        Ok(())
    }

    pub fn send(&self, command: &Command) -> eyre::Result<()> {
        let payload = protocol::encode(command)?;
        self.send_raw(&payload)
    }

    pub fn send_raw(&self, payload: &str) -> eyre::Result<()> {
        self.writer
            .write_frame(payload)
            .wrap_err("fake interpreter write")
    }

    /// Next command from the adapter, if one arrives within `timeout`.
    pub fn recv(&mut self, timeout: Duration) -> eyre::Result<Option<Command>> {
        match self.reader.try_read_frame(timeout)? {
            PollResult::Frame(payload) => match protocol::decode(&payload) {
                DecodedMessage::Command(command) => Ok(Some(command)),
                DecodedMessage::Raw(text) => eyre::bail!("adapter sent non-command frame {text:?}"),
            },
            PollResult::Closed | PollResult::Timeout => Ok(None),
        }
    }

    pub fn expect(&mut self, timeout: Duration) -> eyre::Result<Command> {
        self.recv(timeout)?
            .ok_or_else(|| eyre::eyre!("no command from adapter within {timeout:?}"))
    }

    /// Skip commands until one satisfies `pred`.
    pub fn expect_matching(
        &mut self,
        timeout: Duration,
        pred: impl Fn(&Command) -> bool,
    ) -> eyre::Result<Command> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.recv(remaining)? {
                Some(command) if pred(&command) => return Ok(command),
                Some(other) => tracing::debug!(command = %other.name(), "skipping"),
                None => eyre::bail!("no matching command from adapter within {timeout:?}"),
            }
        }
    }

    /// Everything the adapter sends until it is quiet for `quiet`.
    pub fn drain(&mut self, quiet: Duration) -> eyre::Result<Vec<Command>> {
        let mut out = Vec::new();
        while let Some(command) = self.recv(quiet)? {
            out.push(command);
        }
        Ok(out)
    }

    /// Close the link from the interpreter side.
    pub fn hang_up(self) {
        drop(self);
    }

    /// The fake's framed halves, e.g. to stop reading while still writing.
    pub fn into_parts(self) -> (BoxedFrameReader, FrameWriter) {
        (self.reader, self.writer)
    }
}
