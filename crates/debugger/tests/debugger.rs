//! End-to-end adapter tests against a scripted interpreter.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use debugger::types::{Source, SourceBreakpoint};
use debugger::{
    AdapterSettings, ConnectTarget, Connector, DebugAdapter, Event, Lifecycle, OutputCategory,
    StopReason,
};
use eyre::Result;
use protocol::{
    AppendSessionOutput, Command, Disconnect, Execute, ReplyGetThreads, SetHighlightLine,
    SetLineAttributes, SetPromptType, ThreadInfo, WindowContent, WindowRef,
};
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
const QUIET: Duration = Duration::from_millis(150);

/// Hands out pre-made in-memory links, one per connect.
struct MemoryConnector {
    links: Mutex<VecDeque<InMemoryTransport>>,
}

impl MemoryConnector {
    fn new(link: InMemoryTransport) -> Self {
        Self {
            links: Mutex::new(VecDeque::from([link])),
        }
    }

    fn empty() -> Self {
        Self {
            links: Mutex::new(VecDeque::new()),
        }
    }
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

/// Wraps an adapter and buffers events that tests are not waiting for yet.
struct DebuggerTestHarness {
    adapter: DebugAdapter,
    event_rx: crossbeam_channel::Receiver<Event>,
    event_buffer: VecDeque<Event>,
    fake: FakeInterpreter,
    marker: u32,
}

impl DebuggerTestHarness {
    /// Initialized and launched against a fresh fake interpreter.
    fn launched() -> Result<Self> {
        let mut harness = Self::initialized()?;
        harness.adapter.launch(&ConnectTarget::default())?;
        harness.fake.accept(TIMEOUT)?;
        Ok(harness)
    }

    fn initialized() -> Result<Self> {
        let (link, fake) = FakeInterpreter::new(2)?;
        let adapter = DebugAdapter::new(MemoryConnector::new(link), AdapterSettings::default());
        let event_rx = adapter.events();
        let mut harness = Self {
            adapter,
            event_rx,
            event_buffer: VecDeque::new(),
            fake,
            marker: 0,
        };
        harness.adapter.initialize()?;
        harness.wait_for_event("initialized", |e| matches!(e, Event::Initialized));
        Ok(harness)
    }

    #[tracing::instrument(skip(self, pred))]
    fn wait_for_event<F>(&mut self, message: &str, pred: F) -> Event
    where
        F: Fn(&Event) -> bool,
    {
        if let Some(pos) = self.event_buffer.iter().position(&pred) {
            return self.event_buffer.remove(pos).unwrap();
        }
        loop {
            let evt = match self.event_rx.recv_timeout(TIMEOUT) {
                Ok(evt) => evt,
                Err(e) => panic!("no {message} event: {e}"),
            };
            if pred(&evt) {
                return evt;
            }
            tracing::trace!(event = ?evt, "non-matching event, buffering for later");
            self.event_buffer.push_back(evt);
        }
    }

    /// Block until the adapter has processed everything the fake sent so far.
    fn sync(&mut self) {
        self.marker += 1;
        let text = format!("sync {}\n", self.marker);
        self.fake
            .send(&Command::AppendSessionOutput(AppendSessionOutput {
                result: text.clone(),
                kind: 1,
                group: 0,
            }))
            .unwrap();
        self.wait_for_event("sync output", |e| {
            matches!(e, Event::Output { output, .. } if *output == text)
        });
    }

    fn stopped(&mut self, reason: StopReason) -> Event {
        self.wait_for_event("stopped", |e| {
            matches!(e, Event::Stopped { reason: r, .. } if *r == reason)
        })
    }
}

fn tracer(token: i64, row: i64, tid: i64) -> Command {
    Command::OpenWindow(WindowContent {
        token,
        name: "Foo".to_string(),
        text: vec!["r←Foo y".into(), "a←1".into(), "b←2".into(), "r←a+b+y".into()],
        current_row: row,
        debugger: true,
        tid: Some(tid),
        ..Default::default()
    })
}

fn editor(token: i64, filename: &str) -> Command {
    Command::OpenWindow(WindowContent {
        token,
        name: "Bar".to_string(),
        filename: filename.to_string(),
        text: vec!["Bar".into(), "1".into(), "2".into(), "3".into()],
        ..Default::default()
    })
}

fn breakpoints(lines: &[i64]) -> Vec<SourceBreakpoint> {
    lines
        .iter()
        .map(|line| SourceBreakpoint {
            line: *line,
            column: None,
        })
        .collect()
}

fn prompt(p: i64) -> Command {
    Command::SetPromptType(SetPromptType { prompt: p })
}

/// Answer the next `Execute` from the adapter with `output`.
fn answer(fake: &mut FakeInterpreter, output: &str) -> Result<String> {
    let Command::Execute(Execute { text, .. }) =
        fake.expect_matching(TIMEOUT, |c| matches!(c, Command::Execute(_)))?
    else {
        unreachable!()
    };
    fake.send(&prompt(0))?;
    fake.send(&Command::AppendSessionOutput(AppendSessionOutput {
        result: text.clone(),
        kind: 14,
        group: 0,
    }))?;
    fake.send(&Command::AppendSessionOutput(AppendSessionOutput {
        result: output.to_string(),
        kind: 1,
        group: 0,
    }))?;
    fake.send(&prompt(1))?;
    Ok(text)
}

#[test]
fn full_session() -> Result<()> {
    let mut h = DebuggerTestHarness::launched()?;
    assert_eq!(h.adapter.lifecycle(), Lifecycle::Running(debugger::RunMode::Launched));
    h.adapter.configuration_done()?;

    h.fake.send(&tracer(700, 4, 0))?;
    let stopped = h.stopped(StopReason::Entry);
    assert_eq!(
        stopped,
        Event::Stopped {
            reason: StopReason::Entry,
            thread_id: 0,
            text: None,
        }
    );

    h.fake.send(&Command::ReplyGetThreads(ReplyGetThreads {
        threads: vec![ThreadInfo {
            tid: 0,
            description: "Session".to_string(),
            ..Default::default()
        }],
    }))?;
    h.sync();
    let threads = h.adapter.threads()?;
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].id, 0);
    assert_eq!(threads[0].name, "Session");
    h.fake
        .expect_matching(TIMEOUT, |c| matches!(c, Command::GetThreads))?;

    h.fake.send(&Command::SetHighlightLine(SetHighlightLine {
        win: 700,
        line: 5,
        ..Default::default()
    }))?;
    h.stopped(StopReason::Step);
    let frames = h.adapter.stack_trace(Some(0))?;
    assert_eq!(frames[0].id, 700);
    assert_eq!(frames[0].line, 6);

    h.adapter.next()?;
    assert_eq!(
        h.fake
            .expect_matching(TIMEOUT, |c| matches!(c, Command::RunCurrentLine(_)))?,
        Command::RunCurrentLine(WindowRef::new(700))
    );

    h.fake.send(&editor(800, "/ws/Bar.aplf"))?;
    h.sync();
    let bps = h.adapter.set_breakpoints(
        &Source {
            path: Some("/ws/Bar.aplf".to_string()),
            ..Default::default()
        },
        &breakpoints(&[3]),
    )?;
    assert!(bps.iter().all(|b| b.verified));
    assert_eq!(
        h.fake
            .expect_matching(TIMEOUT, |c| matches!(c, Command::SetLineAttributes(_)))?,
        Command::SetLineAttributes(SetLineAttributes {
            win: 800,
            stop: vec![2],
            trace: None,
            monitor: None,
        })
    );

    h.adapter.disconnect()?;
    assert_eq!(h.adapter.lifecycle(), Lifecycle::Terminated);
    assert!(h.adapter.threads().is_err());
    assert!(h.adapter.next().is_err());
    assert!(h.adapter.disconnect().is_err());
    Ok(())
}

#[test]
fn deferred_breakpoints_apply_latest_set_once() -> Result<()> {
    let mut h = DebuggerTestHarness::launched()?;
    let source = Source {
        path: Some("/ws/Later.aplf".to_string()),
        ..Default::default()
    };

    let first = h.adapter.set_breakpoints(&source, &breakpoints(&[1, 2]))?;
    assert!(first.iter().all(|b| !b.verified));
    h.fake
        .expect_matching(TIMEOUT, |c| matches!(c, Command::GetWindowLayout))?;
    h.adapter.set_breakpoints(&source, &breakpoints(&[7]))?;

    h.fake.send(&editor(42, "/ws/Later.aplf"))?;
    let sent = h.fake.drain(QUIET)?;
    let attributes: Vec<_> = sent
        .into_iter()
        .filter(|c| matches!(c, Command::SetLineAttributes(_)))
        .collect();
    assert_eq!(
        attributes,
        vec![Command::SetLineAttributes(SetLineAttributes {
            win: 42,
            stop: vec![6],
            trace: None,
            monitor: None,
        })]
    );
    Ok(())
}

#[test]
fn renamed_editor_moves_its_breakpoint_target() -> Result<()> {
    let mut h = DebuggerTestHarness::launched()?;
    h.fake.send(&editor(800, "/ws/Old.aplf"))?;
    h.sync();
    h.fake.send(&Command::UpdateWindow(WindowContent {
        token: 800,
        name: "Bar".to_string(),
        filename: "/ws/New.aplf".to_string(),
        text: vec!["Bar".into(), "1".into(), "2".into()],
        ..Default::default()
    }))?;
    h.sync();

    let old = Source {
        path: Some("/ws/Old.aplf".to_string()),
        ..Default::default()
    };
    let bps = h.adapter.set_breakpoints(&old, &breakpoints(&[2]))?;
    assert!(bps.iter().all(|b| !b.verified));
    let sent = h.fake.drain(QUIET)?;
    assert!(sent.contains(&Command::GetWindowLayout));
    assert!(!sent.iter().any(|c| matches!(c, Command::SetLineAttributes(_))));

    let new = Source {
        path: Some("/ws/New.aplf".to_string()),
        ..Default::default()
    };
    let bps = h.adapter.set_breakpoints(&new, &breakpoints(&[2]))?;
    assert!(bps.iter().all(|b| b.verified));
    assert_eq!(
        h.fake
            .expect_matching(TIMEOUT, |c| matches!(c, Command::SetLineAttributes(_)))?,
        Command::SetLineAttributes(SetLineAttributes {
            win: 800,
            stop: vec![1],
            trace: None,
            monitor: None,
        })
    );
    Ok(())
}

#[test]
fn breakpoints_before_launch_are_deferred() -> Result<()> {
    let mut h = DebuggerTestHarness::initialized()?;
    let bps = h.adapter.set_breakpoints(
        &Source {
            path: Some("/ws/Early.aplf".to_string()),
            ..Default::default()
        },
        &breakpoints(&[2]),
    )?;
    assert!(!bps[0].verified);

    h.adapter.launch(&ConnectTarget::default())?;
    h.fake.accept(TIMEOUT)?;
    h.fake.send(&editor(5, "/ws/Early.aplf"))?;
    assert_eq!(
        h.fake
            .expect_matching(TIMEOUT, |c| matches!(c, Command::SetLineAttributes(_)))?,
        Command::SetLineAttributes(SetLineAttributes {
            win: 5,
            stop: vec![1],
            trace: None,
            monitor: None,
        })
    );
    Ok(())
}

#[test]
fn stepping_without_tracer_window_fails() -> Result<()> {
    let mut h = DebuggerTestHarness::launched()?;
    for result in [
        h.adapter.r#continue(),
        h.adapter.next(),
        h.adapter.step_in(),
        h.adapter.step_out(),
    ] {
        let err = result.unwrap_err();
        assert!(err.to_string().contains("no active tracer window"), "{err}");
    }
    assert!(h.fake.drain(QUIET)?.is_empty());
    Ok(())
}

#[test]
fn step_commands_target_active_window() -> Result<()> {
    let mut h = DebuggerTestHarness::launched()?;
    h.fake.send(&tracer(1, 0, 0))?;
    h.fake.send(&tracer(2, 0, 0))?;
    h.stopped(StopReason::Entry);
    h.stopped(StopReason::Entry);

    h.adapter.step_in()?;
    h.adapter.step_out()?;
    h.adapter.r#continue()?;
    let sent: Vec<_> = h
        .fake
        .drain(QUIET)?
        .into_iter()
        .filter(|c| {
            matches!(
                c,
                Command::StepInto(_) | Command::ContinueTrace(_) | Command::Continue(_)
            )
        })
        .collect();
    assert_eq!(
        sent,
        vec![
            Command::StepInto(WindowRef::new(2)),
            Command::ContinueTrace(WindowRef::new(2)),
            Command::Continue(WindowRef::new(2)),
        ]
    );
    Ok(())
}

#[test]
fn requests_in_wrong_state_fail() -> Result<()> {
    let (link, _fake) = FakeInterpreter::new(2)?;
    let adapter = DebugAdapter::new(MemoryConnector::new(link), AdapterSettings::default());

    let err = adapter.launch(&ConnectTarget::default()).unwrap_err();
    assert!(format!("{err:#}").contains("created"), "{err:#}");
    assert!(adapter.next().is_err());
    assert!(adapter.configuration_done().is_err());

    adapter.initialize()?;
    assert!(adapter.initialize().is_err());
    assert!(adapter.threads().is_err());
    Ok(())
}

#[test]
fn unreachable_interpreter_keeps_session_initialized() -> Result<()> {
    let adapter = DebugAdapter::new(MemoryConnector::empty(), AdapterSettings::default());
    adapter.initialize()?;

    let err = adapter.attach(&ConnectTarget::default()).unwrap_err();
    assert!(format!("{err:#}").contains("interpreter unreachable"), "{err:#}");
    assert_eq!(adapter.lifecycle(), Lifecycle::Initialized);
    Ok(())
}

#[test]
fn interpreter_disconnect_terminates_session() -> Result<()> {
    let mut h = DebuggerTestHarness::launched()?;
    h.fake.send(&Command::Disconnect(Disconnect {
        message: "shutting down".to_string(),
    }))?;

    let output = h.wait_for_event("stderr output", |e| {
        matches!(
            e,
            Event::Output {
                category: OutputCategory::Stderr,
                ..
            }
        )
    });
    let Event::Output { output, .. } = output else {
        unreachable!()
    };
    assert!(output.contains("shutting down"));
    h.wait_for_event("terminated", |e| matches!(e, Event::Terminated));
    assert_eq!(h.adapter.lifecycle(), Lifecycle::Terminated);
    assert!(h.adapter.threads().is_err());
    Ok(())
}

#[test]
fn unknown_interpreter_command_is_reported() -> Result<()> {
    let mut h = DebuggerTestHarness::launched()?;
    h.fake.send_raw(r#"["ShowHTML",{"title":"x"}]"#)?;
    h.wait_for_event("console output", |e| {
        matches!(
            e,
            Event::Output { category: OutputCategory::Console, output } if output.contains("ShowHTML")
        )
    });
    assert!(h.adapter.lifecycle().is_running());
    Ok(())
}

#[test]
fn lost_link_terminates_session() -> Result<()> {
    let h = DebuggerTestHarness::launched()?;
    let DebuggerTestHarness {
        adapter,
        event_rx,
        fake,
        ..
    } = h;
    fake.hang_up();

    let events: Vec<Event> = event_rx.iter().take_while(|e| *e != Event::Terminated).collect();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::Output {
            category: OutputCategory::Stderr,
            ..
        }
    )));
    assert_eq!(adapter.lifecycle(), Lifecycle::Terminated);
    Ok(())
}

#[test]
fn pause_uses_fallback_when_interrupt_cannot_be_sent() -> Result<()> {
    let h = DebuggerTestHarness::launched()?;
    let (calls_tx, calls_rx) = crossbeam_channel::unbounded();
    h.adapter.set_pause_fallback(Box::new(move || {
        calls_tx.send(()).unwrap();
        Ok(())
    }));

    // stop reading but keep the interpreter's side of the link open
    let DebuggerTestHarness { adapter, fake, .. } = h;
    let (reader, _writer) = fake.into_parts();
    drop(reader);

    adapter.pause()?;
    assert_eq!(calls_rx.try_iter().count(), 1);
    assert!(adapter.lifecycle().is_running());
    Ok(())
}

#[test]
fn pause_without_fallback_reports_failure() -> Result<()> {
    let h = DebuggerTestHarness::launched()?;
    let DebuggerTestHarness { adapter, fake, .. } = h;
    let (reader, _writer) = fake.into_parts();
    drop(reader);

    assert!(adapter.pause().is_err());
    assert!(adapter.lifecycle().is_running());
    Ok(())
}

#[test]
fn pause_sends_weak_interrupt() -> Result<()> {
    let mut h = DebuggerTestHarness::launched()?;
    h.fake.send(&prompt(0))?;
    h.sync();
    h.adapter.pause()?;
    h.fake
        .expect_matching(TIMEOUT, |c| matches!(c, Command::WeakInterrupt))?;
    Ok(())
}

#[test]
fn threads_fall_back_to_active_thread() -> Result<()> {
    let mut h = DebuggerTestHarness::launched()?;
    h.fake.send(&tracer(3, 0, 9))?;
    h.stopped(StopReason::Entry);

    let threads = h.adapter.threads()?;
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].id, 9);
    Ok(())
}

#[test]
fn evaluate_waits_for_output() -> Result<()> {
    let mut h = DebuggerTestHarness::launched()?;
    thread::scope(|s| -> Result<()> {
        let adapter = &h.adapter;
        let pending = s.spawn(move || adapter.evaluate("2×3"));
        let text = answer(&mut h.fake, "6\n")?;
        assert_eq!(text, "2×3\n");
        let result = pending.join().unwrap()?;
        assert_eq!(result.result, "6");
        Ok(())
    })
}

#[test]
fn evaluate_output_is_not_forwarded() -> Result<()> {
    let mut h = DebuggerTestHarness::launched()?;
    thread::scope(|s| -> Result<()> {
        let adapter = &h.adapter;
        let pending = s.spawn(move || adapter.evaluate("2×3"));
        answer(&mut h.fake, "6\n")?;
        pending.join().unwrap()?;
        Ok(())
    })?;

    // output arriving after the evaluation is the user's again
    h.sync();
    let leaked = |e: &Event| {
        matches!(e, Event::Output { category: OutputCategory::Stdout, output } if output == "6\n")
    };
    assert!(!h.event_buffer.iter().any(leaked));
    assert!(!h.event_rx.try_iter().any(|e| leaked(&e)));
    Ok(())
}

#[test]
fn scopes_and_variables_for_a_frame() -> Result<()> {
    let mut h = DebuggerTestHarness::launched()?;
    h.fake.send(&tracer(700, 1, 0))?;
    h.stopped(StopReason::Entry);

    let scopes = h.adapter.scopes(700)?;
    assert_eq!(scopes.len(), 1);
    assert_eq!(scopes[0].name, "Locals");
    assert!(h.adapter.scopes(1).is_err());

    thread::scope(|s| -> Result<()> {
        let adapter = &h.adapter;
        let reference = scopes[0].variables_reference;
        let pending = s.spawn(move || adapter.variables(reference));
        assert_eq!(answer(&mut h.fake, "a  b\n")?, ")vars\n");
        assert_eq!(answer(&mut h.fake, "1\n")?, "a\n");
        assert_eq!(answer(&mut h.fake, "1 2 3\n")?, "b\n");

        let variables = pending.join().unwrap()?;
        let pairs: Vec<_> = variables
            .iter()
            .map(|v| (v.name.as_str(), v.value.as_str()))
            .collect();
        assert_eq!(pairs, vec![("a", "1"), ("b", "1 2 3")]);
        Ok(())
    })
}

#[test]
fn source_request_returns_window_text() -> Result<()> {
    let mut h = DebuggerTestHarness::launched()?;
    h.fake.send(&tracer(700, 0, 0))?;
    h.stopped(StopReason::Entry);

    let frames = h.adapter.stack_trace(None)?;
    let source_ref = frames[0]
        .source
        .as_ref()
        .and_then(|s| s.source_reference)
        .expect("function source has a reference");
    assert_eq!(
        h.adapter.source(source_ref)?,
        "r←Foo y\na←1\nb←2\nr←a+b+y"
    );
    Ok(())
}

#[test]
fn rebind_keeps_tracer_windows() -> Result<()> {
    let mut h = DebuggerTestHarness::launched()?;
    h.fake.send(&tracer(700, 2, 0))?;
    h.stopped(StopReason::Entry);

    let (link, mut replacement) = FakeInterpreter::new(2)?;
    let connection = Connection::establish(link, &ConnectOptions::default())?;
    replacement.accept(TIMEOUT)?;
    h.adapter.rebind(connection)?;

    replacement.send(&Command::SetHighlightLine(SetHighlightLine {
        win: 700,
        line: 3,
        ..Default::default()
    }))?;
    h.stopped(StopReason::Step);
    assert_eq!(h.adapter.stack_trace(None)?[0].line, 4);

    h.adapter.next()?;
    replacement.expect_matching(TIMEOUT, |c| matches!(c, Command::RunCurrentLine(_)))?;
    assert!(h.adapter.lifecycle().is_running());
    Ok(())
}
