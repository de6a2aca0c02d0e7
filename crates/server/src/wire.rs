//! DAP base protocol: `Content-Length` framed JSON in both directions.
use std::io::{self, BufRead, Write};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicI64, Ordering},
};

use eyre::WrapErr;
use serde::Serialize;
use serde_json::Value;

use crate::messages::{EventMessage, Request, Response};

enum ReaderState {
    Header,
    Content,
}

/// Reads host requests.
pub struct DapReader<R> {
    input: R,
}

impl<R> DapReader<R>
where
    R: BufRead,
{
    pub fn new(input: R) -> Self {
        Self { input }
    }

    /// Next request, or `None` once the host closes its stream.
    pub fn read_request(&mut self) -> eyre::Result<Option<Request>> {
        let mut state = ReaderState::Header;
        let mut buffer = String::new();
        let mut content_length: Option<usize> = None;

        loop {
            match state {
                ReaderState::Header => {
                    buffer.clear();
                    let read_size = match self.input.read_line(&mut buffer) {
                        Ok(n) => n,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e).wrap_err("reading header"),
                    };
                    if read_size == 0 {
                        return Ok(None);
                    }

                    let line = buffer.trim_end();
                    if line.is_empty() {
                        if content_length.is_some() {
                            state = ReaderState::Content;
                        }
                        continue;
                    }
                    match line.split_once(':') {
                        Some(("Content-Length", value)) => {
                            let length = value
                                .trim()
                                .parse()
                                .wrap_err_with(|| format!("failed to parse content length {value:?}"))?;
                            content_length = Some(length);
                        }
                        Some((other, _)) => tracing::debug!(header = other, "ignoring header"),
                        None => eyre::bail!("malformed header line {line:?}"),
                    }
                }
                ReaderState::Content => {
                    let mut content = vec![0; content_length.unwrap_or_default()];
                    self.input
                        .read_exact(content.as_mut_slice())
                        .wrap_err("failed to read message body")?;
                    let content = std::str::from_utf8(&content).wrap_err("invalid utf8")?;
                    tracing::debug!(content, "received raw message");
                    let request = serde_json::from_str(content).with_context(|| {
                        format!("could not construct request from: {content}")
                    })?;
                    return Ok(Some(request));
                }
            }
        }
    }
}

/// Writes responses and events, numbering them. Clones share the sequence.
#[derive(Clone)]
pub struct DapWriter {
    output: Arc<Mutex<Box<dyn Write + Send>>>,
    sequence_number: Arc<AtomicI64>,
}

impl DapWriter {
    pub fn new(output: impl Write + Send + 'static) -> Self {
        Self {
            output: Arc::new(Mutex::new(Box::new(output))),
            sequence_number: Arc::new(AtomicI64::new(0)),
        }
    }

    fn next_seq(&self) -> i64 {
        self.sequence_number.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn write<T: Serialize>(&self, message: &T) -> eyre::Result<()> {
        let body = serde_json::to_string(message).wrap_err("serializing message")?;
        tracing::debug!(content = %body, "sending raw message");
        let mut output = self
            .output
            .lock()
            .map_err(|_| eyre::eyre!("output mutex poisoned"))?;
        write!(output, "Content-Length: {}\r\n\r\n{}", body.len(), body)
            .wrap_err("writing message")?;
        output.flush().wrap_err("flushing output")
    }

    pub fn respond(
        &self,
        request: &Request,
        result: eyre::Result<Option<Value>>,
    ) -> eyre::Result<()> {
        let (success, message, body) = match result {
            Ok(body) => (true, None, body),
            Err(e) => {
                tracing::debug!(command = %request.command, error = %e, "request failed");
                (false, Some(format!("{e:#}")), None)
            }
        };
        self.write(&Response {
            seq: self.next_seq(),
            kind: "response",
            request_seq: request.seq,
            success,
            command: request.command.clone(),
            message,
            body,
        })
    }

    pub fn event(&self, event: &str, body: Option<Value>) -> eyre::Result<()> {
        self.write(&EventMessage {
            seq: self.next_seq(),
            kind: "event",
            event: event.to_string(),
            body,
        })
    }
}
