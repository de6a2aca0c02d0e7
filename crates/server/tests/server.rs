//! Drives the server the way a DAP host would, against a scripted interpreter.

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use debugger::{AdapterSettings, ConnectTarget, Connector, DebugAdapter};
use eyre::Result;
use protocol::{Command, Disconnect, WindowContent};
use serde_json::{Value, json};
use session::testing::FakeInterpreter;
use session::{ConnectOptions, Connection};
use transport::InMemoryTransport;

#[ctor::ctor]
fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let _ = color_eyre::install();
}

const TIMEOUT: Duration = Duration::from_secs(5);

struct MemoryConnector {
    links: Mutex<VecDeque<InMemoryTransport>>,
}

impl Connector for MemoryConnector {
    fn connect(&self, _target: &ConnectTarget, options: &ConnectOptions) -> Result<Connection> {
        let link = self
            .links
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| eyre::eyre!("interpreter unreachable"))?;
        Connection::establish(link, options)
    }
}

/// One direction of an in-memory byte stream.
struct PipeReader {
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
    timeout: Option<Duration>,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            let received = match self.timeout {
                Some(timeout) => self.rx.recv_timeout(timeout),
                None => self
                    .rx
                    .recv()
                    .map_err(|_| crossbeam_channel::RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(chunk) => self.pending.extend(chunk),
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return Ok(0),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "pipe read timed out"));
                }
            }
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

struct PipeWriter(Sender<Vec<u8>>);

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn pipe(timeout: Option<Duration>) -> (PipeWriter, PipeReader) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (
        PipeWriter(tx),
        PipeReader {
            rx,
            pending: VecDeque::new(),
            timeout,
        },
    )
}

/// The host side of a served session.
struct DapClient {
    to_server: Option<PipeWriter>,
    from_server: BufReader<PipeReader>,
    seq: i64,
    events: VecDeque<Value>,
    server: Option<JoinHandle<Result<()>>>,
    fake: FakeInterpreter,
}

impl DapClient {
    fn start() -> Result<Self> {
        let (link, fake) = FakeInterpreter::new(2)?;
        let adapter = DebugAdapter::new(
            MemoryConnector {
                links: Mutex::new(VecDeque::from([link])),
            },
            AdapterSettings::default(),
        );
        let (to_server, server_input) = pipe(None);
        let (server_output, from_server) = pipe(Some(TIMEOUT));
        let server = thread::spawn(move || {
            server::serve(BufReader::new(server_input), server_output, adapter)
        });
        Ok(Self {
            to_server: Some(to_server),
            from_server: BufReader::new(from_server),
            seq: 0,
            events: VecDeque::new(),
            server: Some(server),
            fake,
        })
    }

    /// Initialized, launched and configured.
    fn launched() -> Result<Self> {
        let mut client = Self::start()?;
        client.request("initialize", json!({"adapterID": "ride"}))?;
        client.event("initialized")?;
        client.request("launch", json!({}))?;
        client.fake.accept(TIMEOUT)?;
        client.request("configurationDone", Value::Null)?;
        Ok(client)
    }

    fn send(&mut self, command: &str, arguments: Value) -> Result<i64> {
        self.seq += 1;
        let body = json!({
            "seq": self.seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        })
        .to_string();
        let writer = self
            .to_server
            .as_mut()
            .ok_or_else(|| eyre::eyre!("host stream already closed"))?;
        write!(writer, "Content-Length: {}\r\n\r\n{}", body.len(), body)?;
        Ok(self.seq)
    }

    fn read_message(&mut self) -> Result<Value> {
        let mut length = None;
        loop {
            let mut line = String::new();
            if self.from_server.read_line(&mut line)? == 0 {
                eyre::bail!("server closed its stream");
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some(value) = line.strip_prefix("Content-Length: ") {
                length = Some(value.parse::<usize>()?);
            }
        }
        let mut body = vec![0; length.ok_or_else(|| eyre::eyre!("no content length"))?];
        self.from_server.read_exact(&mut body)?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// The full response to `command`, successful or not.
    fn call(&mut self, command: &str, arguments: Value) -> Result<Value> {
        let seq = self.send(command, arguments)?;
        loop {
            let message = self.read_message()?;
            match message["type"].as_str() {
                Some("response") if message["request_seq"] == seq => return Ok(message),
                Some("event") => self.events.push_back(message),
                _ => eyre::bail!("unexpected message {message}"),
            }
        }
    }

    /// Body of a successful response.
    fn request(&mut self, command: &str, arguments: Value) -> Result<Value> {
        let response = self.call(command, arguments)?;
        eyre::ensure!(
            response["success"] == true,
            "{command} failed: {}",
            response["message"]
        );
        Ok(response["body"].clone())
    }

    fn event(&mut self, name: &str) -> Result<Value> {
        if let Some(pos) = self.events.iter().position(|e| e["event"] == name) {
            return Ok(self.events.remove(pos).unwrap_or_default());
        }
        loop {
            let message = self.read_message()?;
            if message["type"] == "event" && message["event"] == name {
                return Ok(message);
            }
            self.events.push_back(message);
        }
    }

    fn join(&mut self) -> Result<()> {
        self.server
            .take()
            .ok_or_else(|| eyre::eyre!("server already joined"))?
            .join()
            .map_err(|_| eyre::eyre!("server thread panicked"))?
    }
}

fn tracer(token: i64, row: i64) -> Command {
    Command::OpenWindow(WindowContent {
        token,
        name: "Foo".to_string(),
        text: vec!["r←Foo y".into(), "a←1".into(), "r←a+y".into()],
        current_row: row,
        debugger: true,
        tid: Some(0),
        ..Default::default()
    })
}

#[test]
fn initialized_event_follows_initialize_response() -> Result<()> {
    let mut client = DapClient::start()?;
    let seq = client.send("initialize", json!({"adapterID": "ride"}))?;

    let response = client.read_message()?;
    assert_eq!(response["type"], "response");
    assert_eq!(response["request_seq"], seq);
    assert_eq!(response["success"], true);
    assert_eq!(response["body"]["supportsConfigurationDoneRequest"], true);

    let event = client.read_message()?;
    assert_eq!(event["type"], "event");
    assert_eq!(event["event"], "initialized");
    assert!(event["seq"].as_i64() > response["seq"].as_i64());
    Ok(())
}

#[test]
fn stopped_session_round_trip() -> Result<()> {
    let mut client = DapClient::launched()?;

    client.fake.send(&tracer(700, 1))?;
    let stopped = client.event("stopped")?;
    assert_eq!(stopped["body"]["reason"], "entry");
    assert_eq!(stopped["body"]["threadId"], 0);

    let trace = client.request("stackTrace", json!({"threadId": 0}))?;
    assert_eq!(trace["totalFrames"], 1);
    let frame = &trace["stackFrames"][0];
    assert_eq!(frame["id"], 700);
    assert_eq!(frame["name"], "Foo");
    assert_eq!(frame["line"], 2);

    let scopes = client.request("scopes", json!({"frameId": 700}))?;
    assert_eq!(scopes["scopes"][0]["name"], "Locals");
    assert_eq!(scopes["scopes"][0]["variablesReference"], 700);

    let reference = frame["source"]["sourceReference"].clone();
    let source = client.request("source", json!({"sourceReference": reference}))?;
    assert_eq!(source["content"], "r←Foo y\na←1\nr←a+y");

    client.request("next", json!({"threadId": 0}))?;
    assert_eq!(
        client
            .fake
            .expect_matching(TIMEOUT, |c| matches!(c, Command::RunCurrentLine(_)))?,
        Command::RunCurrentLine(protocol::WindowRef::new(700))
    );

    let cont = client.request("continue", json!({"threadId": 0}))?;
    assert_eq!(cont["allThreadsContinued"], true);

    client.request("disconnect", json!({}))?;
    client.join()
}

#[test]
fn breakpoints_for_unopened_source_are_unverified() -> Result<()> {
    let mut client = DapClient::launched()?;
    let body = client.request(
        "setBreakpoints",
        json!({
            "source": {"path": "/ws/Later.aplf"},
            "breakpoints": [{"line": 3}],
        }),
    )?;
    assert_eq!(body["breakpoints"][0]["verified"], false);
    assert_eq!(body["breakpoints"][0]["line"], 3);
    Ok(())
}

#[test]
fn failed_requests_carry_a_message() -> Result<()> {
    let mut client = DapClient::start()?;
    client.request("initialize", json!({}))?;

    let response = client.call("next", json!({"threadId": 0}))?;
    assert_eq!(response["success"], false);
    assert!(
        response["message"]
            .as_str()
            .unwrap()
            .contains("cannot handle next while session is initialized")
    );

    let response = client.call("stepBack", json!({}))?;
    assert_eq!(response["success"], false);
    assert_eq!(response["message"], "unsupported request stepBack");

    let response = client.call("scopes", json!({}))?;
    assert_eq!(response["success"], false);
    assert!(
        response["message"]
            .as_str()
            .unwrap()
            .starts_with("invalid arguments for scopes")
    );

    // the session survives failed requests
    client.request("launch", json!({}))?;
    client.fake.accept(TIMEOUT)?;
    Ok(())
}

#[test]
fn interpreter_disconnect_is_forwarded() -> Result<()> {
    let mut client = DapClient::launched()?;
    client.fake.send(&Command::Disconnect(Disconnect {
        message: "bye".to_string(),
    }))?;
    client.event("terminated")?;

    // hosts answer a terminated event with disconnect
    client.request("disconnect", json!({}))?;
    client.join()
}

#[test]
fn lost_link_reports_and_terminates() -> Result<()> {
    let mut client = DapClient::launched()?;
    let (_, idle) = FakeInterpreter::new(2)?;
    std::mem::replace(&mut client.fake, idle).hang_up();

    let output = client.event("output")?;
    assert_eq!(output["body"]["category"], "stderr");
    client.event("terminated")?;
    Ok(())
}

#[test]
fn host_closing_its_stream_stops_the_server() -> Result<()> {
    let mut client = DapClient::launched()?;
    client.to_server = None;
    client.join()
}

#[test]
fn terminate_ends_the_session() -> Result<()> {
    let mut client = DapClient::launched()?;
    client.request("terminate", json!({}))?;
    client.event("terminated")?;
    client.join()?;
    Ok(())
}
