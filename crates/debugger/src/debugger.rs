use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender};
use eyre::WrapErr;
use protocol::{Command, DecodedMessage, WindowRef};
use session::{ConnectOptions, Connection, Dispatcher};

use crate::{
    connector::Connector,
    internals::{DebuggerInternals, Effects},
    state::{ConnectTarget, Event, Lifecycle, OutputCategory, RunMode},
    types::{
        Breakpoint, Capabilities, EvaluateResult, Scope, Source, SourceBreakpoint,
        SourceReference, StackFrame, StackFrameId, Thread, ThreadId, Variable,
        VariablesReference,
    },
};

/// Interpreter command listing the names visible in the current context.
const LIST_VARIABLES: &str = ")vars";

/// Tunables for one adapter.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub connect: ConnectOptions,
    pub subscriber_capacity: usize,
    pub evaluate_timeout: Duration,
    pub max_variables: usize,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            connect: ConnectOptions::default(),
            subscriber_capacity: 256,
            evaluate_timeout: Duration::from_secs(5),
            max_variables: 50,
        }
    }
}

/// Called when the interpreter cannot be interrupted over the link, e.g. to
/// signal the interpreter process directly.
pub type PauseFallback = Box<dyn Fn() -> eyre::Result<()> + Send + Sync>;

/// One debugging session against one interpreter.
///
/// Requests are plain method calls returning `eyre::Result`; a failed
/// request leaves the session alive. Host events arrive on [`DebugAdapter::events`].
pub struct DebugAdapter {
    internals: Arc<Mutex<DebuggerInternals>>,
    publisher: Sender<Event>,
    rx: Receiver<Event>,
    connector: Box<dyn Connector>,
    settings: AdapterSettings,
    pause_fallback: Mutex<Option<PauseFallback>>,
}

impl DebugAdapter {
    pub fn new(connector: impl Connector + 'static, settings: AdapterSettings) -> Self {
        let (publisher, rx) = crossbeam_channel::unbounded();
        Self {
            internals: Arc::new(Mutex::new(DebuggerInternals::new())),
            publisher,
            rx,
            connector: Box::new(connector),
            settings,
            pause_fallback: Mutex::new(None),
        }
    }

    /// Host events, in the order they were produced.
    pub fn events(&self) -> Receiver<Event> {
        self.rx.clone()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.with_internals(|internals| Ok(internals.lifecycle))
            .unwrap_or(Lifecycle::Terminated)
    }

    pub fn set_pause_fallback(&self, fallback: PauseFallback) {
        match self.pause_fallback.lock() {
            Ok(mut slot) => *slot = Some(fallback),
            Err(_) => tracing::error!("pause fallback mutex poisoned"),
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn initialize(&self) -> eyre::Result<Capabilities> {
        self.with_internals(|internals| {
            internals
                .lifecycle
                .require("initialize", &[Lifecycle::Created])?;
            internals.lifecycle = Lifecycle::Initialized;
            Ok(())
        })?;
        let _ = self.publisher.send(Event::Initialized);
        Ok(Capabilities::default())
    }

    #[tracing::instrument(skip(self))]
    pub fn launch(&self, target: &ConnectTarget) -> eyre::Result<()> {
        self.start(RunMode::Launched, target)
            .wrap_err("launching debug session")
    }

    #[tracing::instrument(skip(self))]
    pub fn attach(&self, target: &ConnectTarget) -> eyre::Result<()> {
        self.start(RunMode::Attached, target)
            .wrap_err("attaching debug session")
    }

    fn start(&self, mode: RunMode, target: &ConnectTarget) -> eyre::Result<()> {
        let request = match mode {
            RunMode::Launched => "launch",
            RunMode::Attached => "attach",
        };
        self.with_internals(|internals| {
            internals
                .lifecycle
                .require(request, &[Lifecycle::Initialized])
        })?;

        // connecting may retry for a while, so the model stays unlocked
        let connection = self
            .connector
            .connect(target, &self.settings.connect)
            .wrap_err("connecting to interpreter")?;
        self.install(connection, Some(mode))
    }

    /// Replace the interpreter link after a reconnect.
    ///
    /// Tracer windows, source bindings and deferred breakpoints are kept;
    /// messages still in flight from the old link are ignored.
    #[tracing::instrument(skip_all)]
    pub fn rebind(&self, connection: Connection) -> eyre::Result<()> {
        self.with_internals(|internals| internals.lifecycle.require_running("rebind"))?;
        self.install(connection, None)
    }

    /// Start `connection` and make it the session's link. With `mode` set the
    /// session must be initialized and moves to running; otherwise it must
    /// already be running.
    fn install(&self, connection: Connection, mode: Option<RunMode>) -> eyre::Result<()> {
        let subscription = connection.subscribe(self.settings.subscriber_capacity);
        let session = connection.start().wrap_err("starting interpreter session")?;

        let (generation, previous) = self.with_internals(|internals| {
            match mode {
                Some(mode) => {
                    internals
                        .lifecycle
                        .require("launch", &[Lifecycle::Initialized])?;
                    internals.lifecycle = Lifecycle::Running(mode);
                }
                None => internals.lifecycle.require_running("rebind")?,
            }
            internals.generation += 1;
            let previous = internals.session.replace(session);
            Ok((internals.generation, previous))
        })?;
        if let Some(previous) = previous {
            tracing::info!("replacing interpreter link");
            drop(previous);
        }

        let internals = Arc::clone(&self.internals);
        let publisher = self.publisher.clone();
        thread::Builder::new()
            .name("ride-events".to_string())
            .spawn(move || pump(internals, publisher, generation, subscription))
            .wrap_err("spawning event thread")?;
        Ok(())
    }

    /// Configuration is complete. Nothing is sent; the interpreter is
    /// already live by the time the host gets here.
    pub fn configuration_done(&self) -> eyre::Result<()> {
        self.with_internals(|internals| internals.lifecycle.require_running("configurationDone"))
    }

    /// End the session and close the interpreter link.
    #[tracing::instrument(skip(self))]
    pub fn disconnect(&self) -> eyre::Result<()> {
        self.finish("disconnect")?;
        Ok(())
    }

    /// Like [`DebugAdapter::disconnect`], and tells the host the session is over.
    #[tracing::instrument(skip(self))]
    pub fn terminate(&self) -> eyre::Result<()> {
        self.finish("terminate")?;
        let _ = self.publisher.send(Event::Terminated);
        Ok(())
    }

    fn finish(&self, request: &str) -> eyre::Result<()> {
        let session = self.with_internals(|internals| {
            if internals.lifecycle.is_terminated() {
                eyre::bail!("cannot handle {request}: session already terminated");
            }
            internals.lifecycle = Lifecycle::Terminated;
            Ok(internals.session.take())
        })?;
        if let Some(session) = session {
            match session.shutdown() {
                Ok(exit) => tracing::debug!(?exit, "interpreter link closed"),
                Err(e) => tracing::warn!(error = %e, "error closing interpreter link"),
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn r#continue(&self) -> eyre::Result<()> {
        self.step("continue", Command::Continue)
    }

    #[tracing::instrument(skip(self))]
    pub fn next(&self) -> eyre::Result<()> {
        self.step("next", Command::RunCurrentLine)
    }

    #[tracing::instrument(skip(self))]
    pub fn step_in(&self) -> eyre::Result<()> {
        self.step("stepIn", Command::StepInto)
    }

    #[tracing::instrument(skip(self))]
    pub fn step_out(&self) -> eyre::Result<()> {
        self.step("stepOut", Command::ContinueTrace)
    }

    fn step(&self, request: &str, command: fn(WindowRef) -> Command) -> eyre::Result<()> {
        let (dispatcher, win) = self.with_internals(|internals| {
            internals.lifecycle.require_running(request)?;
            let dispatcher = internals.require_dispatcher(request)?;
            let win = internals
                .active_window()
                .ok_or_else(|| eyre::eyre!("cannot handle {request}: no active tracer window"))?;
            Ok((dispatcher, win))
        })?;
        dispatcher
            .send(command(WindowRef::new(win)))
            .wrap_err_with(|| format!("sending {request}"))?;
        Ok(())
    }

    /// Interrupt the interpreter, falling back to the registered hook if the
    /// interrupt cannot be sent.
    #[tracing::instrument(skip(self))]
    pub fn pause(&self) -> eyre::Result<()> {
        let dispatcher = self.running_dispatcher("pause")?;
        let Err(e) = dispatcher.send(Command::WeakInterrupt) else {
            return Ok(());
        };
        tracing::warn!(error = %e, "interrupt failed, trying fallback");

        let slot = self
            .pause_fallback
            .lock()
            .map_err(|_| eyre::eyre!("pause fallback mutex poisoned"))?;
        match slot.as_ref() {
            Some(fallback) => {
                fallback().wrap_err_with(|| format!("pause fallback failed after: {e}"))
            }
            None => Err(e.wrap_err("sending interrupt")),
        }
    }

    /// Known threads. The cache is refreshed asynchronously, so this may lag
    /// the interpreter by one request.
    #[tracing::instrument(skip(self))]
    pub fn threads(&self) -> eyre::Result<Vec<Thread>> {
        let (dispatcher, threads) = self.with_internals(|internals| {
            internals.lifecycle.require_running("threads")?;
            Ok((internals.require_dispatcher("threads")?, internals.threads()))
        })?;
        dispatcher
            .send(Command::GetThreads)
            .wrap_err("requesting thread list")?;
        Ok(threads)
    }

    #[tracing::instrument(skip(self))]
    pub fn stack_trace(&self, thread_id: Option<ThreadId>) -> eyre::Result<Vec<StackFrame>> {
        self.with_internals(|internals| {
            internals.lifecycle.require_running("stackTrace")?;
            internals.stack_frames(thread_id)
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn set_breakpoints(
        &self,
        source: &Source,
        breakpoints: &[SourceBreakpoint],
    ) -> eyre::Result<Vec<Breakpoint>> {
        let (plan, dispatcher) = self.with_internals(|internals| {
            internals.lifecycle.require(
                "setBreakpoints",
                &[
                    Lifecycle::Initialized,
                    Lifecycle::Running(RunMode::Launched),
                    Lifecycle::Running(RunMode::Attached),
                ],
            )?;
            let plan = internals.plan_breakpoints(source, breakpoints)?;
            Ok((plan, internals.dispatcher()))
        })?;

        if let Some(command) = plan.command {
            dispatcher
                .as_ref()
                .ok_or_else(|| eyre::eyre!("no interpreter connection for breakpoints"))?
                .send(command)
                .wrap_err("setting line attributes")?;
        }
        if plan.resync
            && let Some(dispatcher) = dispatcher
            && let Err(e) = dispatcher.send(Command::GetWindowLayout)
        {
            tracing::warn!(error = %e, "window layout resync failed");
        }
        Ok(plan.breakpoints)
    }

    /// Run `expression` in the interpreter and return its session output.
    #[tracing::instrument(skip(self))]
    pub fn evaluate(&self, expression: &str) -> eyre::Result<EvaluateResult> {
        let dispatcher = self.running_dispatcher("evaluate")?;
        let output = self
            .quiet_execute(&dispatcher, expression)
            .wrap_err_with(|| format!("evaluating {expression:?}"))?;
        Ok(EvaluateResult {
            result: output.trim_end_matches('\n').to_string(),
            variables_reference: 0,
        })
    }

    /// A single "Locals" scope per frame, referenced by the frame's token.
    pub fn scopes(&self, frame_id: StackFrameId) -> eyre::Result<Vec<Scope>> {
        self.with_internals(|internals| {
            internals.lifecycle.require_running("scopes")?;
            if internals.tracer_window(frame_id).is_none() {
                eyre::bail!("unknown stack frame {frame_id}");
            }
            Ok(vec![Scope {
                name: "Locals".to_string(),
                presentation_hint: "locals".to_string(),
                variables_reference: frame_id,
                expensive: true,
            }])
        })
    }

    /// Names visible in the interpreter's current context with their values.
    ///
    /// The interpreter evaluates in the innermost suspended function, so every
    /// frame's scope shows the same names.
    #[tracing::instrument(skip(self))]
    pub fn variables(&self, reference: VariablesReference) -> eyre::Result<Vec<Variable>> {
        let dispatcher = self.with_internals(|internals| {
            internals.lifecycle.require_running("variables")?;
            if internals.tracer_window(reference).is_none() {
                eyre::bail!("unknown variables reference {reference}");
            }
            internals.require_dispatcher("variables")
        })?;

        let listing = self
            .quiet_execute(&dispatcher, LIST_VARIABLES)
            .wrap_err("listing variables")?;

        let names: Vec<&str> = listing
            .split_whitespace()
            .take(self.settings.max_variables)
            .collect();
        let mut variables = Vec::with_capacity(names.len());
        for name in names {
            let value = match self.quiet_execute(&dispatcher, name) {
                Ok(out) => out.trim_end_matches('\n').to_string(),
                Err(e) => {
                    tracing::debug!(%name, error = %e, "could not evaluate variable");
                    format!("<{e}>")
                }
            };
            variables.push(Variable {
                name: name.to_string(),
                value,
                variables_reference: 0,
            });
        }
        Ok(variables)
    }

    /// Text of a source the interpreter has shown in a window.
    pub fn source(&self, source_ref: SourceReference) -> eyre::Result<String> {
        self.with_internals(|internals| {
            if internals.lifecycle.is_terminated() {
                eyre::bail!("cannot handle source: session terminated");
            }
            internals.source_text(source_ref)
        })
    }

    /// Execute `text` for the adapter's own use, keeping its session output
    /// out of the host's output stream.
    fn quiet_execute(&self, dispatcher: &Dispatcher, text: &str) -> eyre::Result<String> {
        self.with_internals(|internals| {
            internals.begin_quiet_wait();
            Ok(())
        })?;
        let result = dispatcher.execute_and_wait(text, self.settings.evaluate_timeout);
        if result.is_err() {
            self.with_internals(|internals| {
                internals.abandon_quiet_wait();
                Ok(())
            })?;
        }
        result
    }

    fn running_dispatcher(&self, request: &str) -> eyre::Result<Dispatcher> {
        self.with_internals(|internals| {
            internals.lifecycle.require_running(request)?;
            internals.require_dispatcher(request)
        })
    }

    fn with_internals<F, T>(&self, f: F) -> eyre::Result<T>
    where
        F: FnOnce(&mut DebuggerInternals) -> eyre::Result<T>,
    {
        tracing::trace!("trying to lock internals");
        let mut internals = self
            .internals
            .lock()
            .map_err(|e| eyre::eyre!("debugger mutex poisoned: {}", e))?;
        let res = f(&mut internals);
        drop(internals);
        tracing::trace!("unlocked internals");
        res
    }
}

impl Drop for DebugAdapter {
    fn drop(&mut self) {
        tracing::debug!("dropping debug adapter");
        let session = self
            .internals
            .lock()
            .ok()
            .and_then(|mut internals| internals.session.take());
        drop(session);
    }
}

/// Carry out handler output now that the model is unlocked.
fn apply(effects: Effects, dispatcher: Option<&Dispatcher>, publisher: &Sender<Event>) {
    for command in effects.commands {
        match dispatcher {
            Some(d) => {
                if let Err(e) = d.send(command) {
                    tracing::warn!(error = %e, "follow-up command failed");
                }
            }
            None => tracing::debug!(command = %command.name(), "no link for follow-up command"),
        }
    }
    for event in effects.events {
        let _ = publisher.send(event);
    }
}

/// Feed inbound messages from one link generation into the model.
fn pump(
    internals: Arc<Mutex<DebuggerInternals>>,
    publisher: Sender<Event>,
    generation: u64,
    subscription: Receiver<DecodedMessage>,
) {
    tracing::debug!(generation, "event pump started");
    for message in subscription.iter() {
        let Ok(mut guard) = internals.lock() else {
            tracing::error!("debugger mutex poisoned, stopping event pump");
            return;
        };
        if guard.generation != generation || guard.lifecycle.is_terminated() {
            tracing::debug!(generation, "event pump superseded");
            return;
        }
        let effects = guard.on_message(&message);
        let dispatcher = guard.dispatcher();
        let finished = if effects.terminate {
            guard.session.take()
        } else {
            None
        };
        drop(guard);

        apply(effects, dispatcher.as_ref(), &publisher);
        if let Some(session) = finished {
            drop(session);
            return;
        }
    }

    // the reader loop ended without anyone asking it to
    let lost = match internals.lock() {
        Ok(mut guard) if guard.generation == generation && guard.lifecycle.is_running() => {
            guard.lifecycle = Lifecycle::Terminated;
            Some(guard.session.take())
        }
        _ => None,
    };
    if let Some(session) = lost {
        tracing::warn!("interpreter link lost");
        let _ = publisher.send(Event::Output {
            category: OutputCategory::Stderr,
            output: "lost connection to interpreter\n".to_string(),
        });
        let _ = publisher.send(Event::Terminated);
        drop(session);
    }
}
