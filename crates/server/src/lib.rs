//! Serves a [`DebugAdapter`] to a DAP host over any byte stream.
//!
//! Requests are handled one at a time on the calling thread. Adapter events
//! are written from a forwarding thread, sharing the writer and its sequence
//! numbers with responses.
use std::{
    io::{BufRead, Write},
    thread,
    time::Duration,
};

use config::Config;
use crossbeam_channel::{Receiver, select};
use debugger::{AdapterSettings, DebugAdapter, Event, TcpConnector};
use eyre::WrapErr;
use session::ConnectOptions;
use transport::Tap;

mod messages;
mod router;
mod wire;

pub use messages::Request;
pub use wire::{DapReader, DapWriter};

/// Adapter tunables from the configuration file.
pub fn adapter_settings(config: &Config, tap: Option<Tap>) -> AdapterSettings {
    AdapterSettings {
        connect: ConnectOptions {
            protocol_version: config.interpreter.protocol_version,
            tap,
            ..ConnectOptions::default()
        },
        subscriber_capacity: config.session.subscriber_capacity,
        evaluate_timeout: Duration::from_millis(config.session.evaluate_timeout_ms),
        max_variables: config.session.max_variables,
    }
}

/// Connector for the configured interpreter address.
pub fn connector(config: &Config) -> TcpConnector {
    TcpConnector {
        host: config.interpreter.host.clone(),
        port: config.interpreter.port,
        attempts: config.interpreter.connect_attempts,
    }
}

/// Answer host requests until the host disconnects or closes its stream.
pub fn serve<R>(
    input: R,
    output: impl Write + Send + 'static,
    adapter: DebugAdapter,
) -> eyre::Result<()>
where
    R: BufRead,
{
    let mut reader = DapReader::new(input);
    let writer = DapWriter::new(output);

    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
    let forwarder = {
        let events = adapter.events();
        let writer = writer.clone();
        thread::Builder::new()
            .name("dap-events".to_string())
            .spawn(move || forward_events(events, done_rx, writer))
            .wrap_err("spawning event forwarder")?
    };

    let result = request_loop(&mut reader, &writer, &adapter);

    drop(done_tx);
    if forwarder.join().is_err() {
        tracing::error!("event forwarder panicked");
    }
    drop(adapter);
    result
}

fn request_loop<R: BufRead>(
    reader: &mut DapReader<R>,
    writer: &DapWriter,
    adapter: &DebugAdapter,
) -> eyre::Result<()> {
    loop {
        let Some(request) = reader.read_request().wrap_err("reading host request")? else {
            tracing::info!("host closed its stream");
            return Ok(());
        };
        tracing::debug!(command = %request.command, seq = request.seq, "handling request");

        let result = router::handle(adapter, &request);
        let succeeded = result.is_ok();
        writer
            .respond(&request, result)
            .wrap_err("writing response")?;

        // the host expects this after the initialize response
        if request.command == "initialize" && succeeded {
            writer
                .event("initialized", None)
                .wrap_err("writing initialized event")?;
        }
        if router::ends_session(&request.command) && succeeded {
            tracing::info!(command = %request.command, "session ended by host");
            return Ok(());
        }
    }
}

fn forward_events(events: Receiver<Event>, done: Receiver<()>, writer: DapWriter) {
    let write = |event: Event| {
        if event == Event::Initialized {
            return true;
        }
        let (name, body) = messages::event_body(&event);
        match writer.event(name, body) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, event = name, "could not forward event");
                false
            }
        }
    };

    loop {
        select! {
            recv(events) -> event => match event {
                Ok(event) => {
                    if !write(event) {
                        return;
                    }
                }
                Err(_) => return,
            },
            recv(done) -> _ => {
                for event in events.try_iter() {
                    if !write(event) {
                        return;
                    }
                }
                return;
            }
        }
    }
}
