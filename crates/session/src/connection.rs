use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Receiver;
use eyre::WrapErr;
use protocol::{Command, Connect, DecodedMessage, Identify};
use transport::handshake::{self, DEFAULT_PROTOCOL_VERSION, HANDSHAKE_TIMEOUT};
use transport::{BoxedFrameReader, RideTransport, Tap};

use crate::dispatcher::{Dispatcher, RunExit};

/// Settings for bringing up one interpreter link.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub protocol_version: u32,
    pub handshake_timeout: Duration,
    pub tap: Option<Tap>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            tap: None,
        }
    }
}

/// The commands every session sends right after version negotiation.
pub fn bootstrap_commands() -> [Command; 3] {
    [
        Command::Identify(Identify {
            api_version: 1,
            identity: 1,
        }),
        Command::Connect(Connect { remote_id: 2 }),
        Command::GetWindowLayout,
    ]
}

/// A negotiated link whose reader loop has not started yet.
///
/// Subscribe through [`Connection::dispatcher`] before calling
/// [`Connection::start`] to be sure of seeing the first inbound messages.
pub struct Connection {
    dispatcher: Dispatcher,
    reader: BoxedFrameReader,
}

impl Connection {
    /// Negotiate the protocol version and send the bootstrap commands.
    #[tracing::instrument(skip(transport, options))]
    pub fn establish<T>(transport: T, options: &ConnectOptions) -> eyre::Result<Self>
    where
        T: RideTransport,
    {
        let (mut reader, writer) =
            transport::framed(transport, options.tap.clone()).wrap_err("splitting transport")?;

        handshake::negotiate(
            &mut reader,
            &writer,
            options.protocol_version,
            options.handshake_timeout,
        )
        .wrap_err("negotiating protocol version")?;

        let dispatcher = Dispatcher::new(writer);
        for command in bootstrap_commands() {
            dispatcher
                .send(command)
                .wrap_err("sending session bootstrap")?;
        }
        tracing::info!(version = options.protocol_version, "interpreter session established");

        Ok(Self { dispatcher, reader })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn subscribe(&self, capacity: usize) -> Receiver<DecodedMessage> {
        self.dispatcher.subscribe(capacity)
    }

    /// Spawn the reader loop.
    pub fn start(self) -> eyre::Result<RunningSession> {
        let (tx, rx) = oneshot::channel();
        let Connection { dispatcher, reader } = self;
        let looped = dispatcher.clone();
        let handle = thread::Builder::new()
            .name("ride-reader".to_string())
            .spawn(move || looped.run(reader, rx))
            .wrap_err("spawning reader thread")?;

        Ok(RunningSession {
            dispatcher,
            shutdown: Some(tx),
            handle: Some(handle),
        })
    }
}

/// A live interpreter link with its reader loop running.
///
/// Dropping the session cancels the loop and waits for it to finish.
pub struct RunningSession {
    dispatcher: Dispatcher,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<RunExit>>,
}

impl RunningSession {
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Cancel the reader loop and wait for it.
    pub fn shutdown(mut self) -> eyre::Result<RunExit> {
        self.stop()
    }

    fn stop(&mut self) -> eyre::Result<RunExit> {
        if let Some(tx) = self.shutdown.take() {
            // the loop may already have exited on its own
            let _ = tx.send(());
        }
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| eyre::eyre!("reader thread panicked")),
            None => Ok(RunExit::Cancelled),
        }
    }
}

impl Drop for RunningSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "error stopping reader loop");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for RunningSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningSession")
            .field("dispatcher", &self.dispatcher)
            .field("finished", &self.is_finished())
            .finish()
    }
}
