use std::collections::HashMap;

use protocol::{
    Command, DecodedMessage, OUTPUT_INPUT_ECHO, PROMPT_BUSY, SetLineAttributes, ThreadInfo,
    Token, WindowContent,
};
use session::{Dispatcher, RunningSession};

use crate::sources::{DeferredBreakpoints, SourceBindings, SourceKey};
use crate::state::{Event, Lifecycle, OutputCategory, StopReason};
use crate::types::{
    Breakpoint, Source, SourceBreakpoint, SourceReference, StackFrame, Thread, ThreadId,
};

/// Thread reported by interpreters that never mention one.
const MAIN_THREAD: ThreadId = 0;

/// Work produced while handling an inbound message.
///
/// Computed with the internals locked and carried out after the lock is
/// released, so sending can never re-enter adapter state.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Effects {
    pub(crate) commands: Vec<Command>,
    pub(crate) events: Vec<Event>,
    /// The interpreter reported a fatal condition.
    pub(crate) terminate: bool,
}

/// An open debugging frame at the interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TracerWindow {
    pub(crate) token: Token,
    pub(crate) thread_id: ThreadId,
    pub(crate) name: String,
    /// 0-based
    pub(crate) line: i64,
    /// 0-based
    pub(crate) column: i64,
    activated: u64,
}

/// Where an interpreter window was last seen, tracer or not.
#[derive(Debug, Clone)]
struct WindowInfo {
    name: String,
    tid: Option<ThreadId>,
    line: i64,
    column: i64,
}

impl From<&WindowContent> for WindowInfo {
    fn from(window: &WindowContent) -> Self {
        Self {
            name: window.name.clone(),
            tid: window.tid,
            line: window.current_row,
            column: window.current_column,
        }
    }
}

/// Session output belonging to executions the adapter runs for itself.
///
/// Each wait ends at the first ready prompt after a busy one, the same rule
/// the dispatcher's completion wait uses.
#[derive(Debug, Default)]
struct QuietWaits {
    pending: usize,
    seen_busy: bool,
}

/// What a `setBreakpoints` request turned into.
#[derive(Debug, PartialEq)]
pub(crate) struct BreakpointPlan {
    pub(crate) command: Option<Command>,
    /// Ask the interpreter to resend its windows.
    pub(crate) resync: bool,
    pub(crate) breakpoints: Vec<Breakpoint>,
}

/// Identity of the source a window shows: its file if it has one, otherwise
/// the name of the function or operator it edits.
fn source_path(window: &WindowContent) -> &str {
    if window.filename.is_empty() {
        &window.name
    } else {
        &window.filename
    }
}

fn thread_name(info: &ThreadInfo) -> String {
    if info.description.is_empty() {
        format!("Thread {}", info.tid)
    } else {
        info.description.clone()
    }
}

fn line_attributes(win: Token, lines: &[i64]) -> Command {
    Command::SetLineAttributes(SetLineAttributes {
        win,
        stop: lines.iter().map(|l| l - 1).collect(),
        trace: None,
        monitor: None,
    })
}

pub(crate) struct DebuggerInternals {
    pub(crate) lifecycle: Lifecycle,
    pub(crate) session: Option<RunningSession>,
    /// Bumped on every (re)bind so pumps for a replaced link stand down.
    pub(crate) generation: u64,

    windows: HashMap<Token, TracerWindow>,
    open: HashMap<Token, WindowInfo>,
    activations: u64,
    active_window: Option<Token>,
    active_thread: Option<ThreadId>,

    sources: SourceBindings,
    texts: HashMap<SourceReference, Vec<String>>,
    deferred: DeferredBreakpoints,

    threads: Vec<Thread>,
    stack_names: HashMap<ThreadId, Vec<String>>,
    quiet: QuietWaits,
}

impl DebuggerInternals {
    pub(crate) fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Created,
            session: None,
            generation: 0,
            windows: HashMap::new(),
            open: HashMap::new(),
            activations: 0,
            active_window: None,
            active_thread: None,
            sources: SourceBindings::default(),
            texts: HashMap::new(),
            deferred: DeferredBreakpoints::default(),
            threads: Vec::new(),
            stack_names: HashMap::new(),
            quiet: QuietWaits::default(),
        }
    }

    /// Hide the session output of the next execution from the host.
    pub(crate) fn begin_quiet_wait(&mut self) {
        self.quiet.pending += 1;
    }

    /// Give up on a quiet wait that will not complete normally.
    pub(crate) fn abandon_quiet_wait(&mut self) {
        self.quiet.pending = self.quiet.pending.saturating_sub(1);
        if self.quiet.pending == 0 {
            self.quiet.seen_busy = false;
        }
    }

    fn on_prompt(&mut self, prompt: i64) {
        if self.quiet.pending == 0 {
            return;
        }
        if prompt == PROMPT_BUSY {
            self.quiet.seen_busy = true;
        } else if self.quiet.seen_busy {
            self.quiet.seen_busy = false;
            self.quiet.pending -= 1;
        }
    }

    pub(crate) fn dispatcher(&self) -> Option<Dispatcher> {
        self.session.as_ref().map(|s| s.dispatcher().clone())
    }

    pub(crate) fn require_dispatcher(&self, request: &str) -> eyre::Result<Dispatcher> {
        self.dispatcher()
            .ok_or_else(|| eyre::eyre!("cannot handle {request}: no interpreter connection"))
    }

    pub(crate) fn active_window(&self) -> Option<Token> {
        self.active_window
    }

    pub(crate) fn active_thread(&self) -> Option<ThreadId> {
        self.active_thread
    }

    fn resolved_thread(&self) -> ThreadId {
        self.active_thread.unwrap_or(MAIN_THREAD)
    }

    pub(crate) fn tracer_window(&self, token: Token) -> Option<&TracerWindow> {
        self.windows.get(&token)
    }

    fn activate(&mut self, token: Token) {
        self.activations += 1;
        if let Some(window) = self.windows.get_mut(&token) {
            window.activated = self.activations;
            self.active_thread = Some(window.thread_id);
        }
        self.active_window = Some(token);
    }

    /// Stop notification plus a refresh of the stack descriptions it invalidates.
    fn stopped(&mut self, reason: StopReason, text: Option<String>, effects: &mut Effects) {
        let thread_id = self.resolved_thread();
        self.stack_names.remove(&thread_id);
        effects.commands.push(Command::GetSIStack);
        effects.events.push(Event::Stopped {
            reason,
            thread_id,
            text,
        });
    }

    fn fatal(&mut self, text: String, effects: &mut Effects) {
        tracing::warn!(%text, "interpreter reported a fatal condition");
        effects.events.push(Event::Output {
            category: OutputCategory::Stderr,
            output: format!("{text}\n"),
        });
        effects.events.push(Event::Terminated);
        effects.terminate = true;
        self.lifecycle = Lifecycle::Terminated;
    }

    #[tracing::instrument(skip_all, level = "trace")]
    pub(crate) fn on_message(&mut self, message: &DecodedMessage) -> Effects {
        let mut effects = Effects::default();
        let command = match message {
            DecodedMessage::Command(command) => command,
            DecodedMessage::Raw(text) => {
                tracing::debug!(%text, "ignoring non-command frame");
                return effects;
            }
        };

        match command {
            Command::OpenWindow(window) => self.on_open_window(window, &mut effects),
            Command::UpdateWindow(window) => self.on_update_window(window),
            Command::CloseWindow(target) => self.on_close_window(target.win),
            Command::SetHighlightLine(highlight) => {
                match self.windows.get_mut(&highlight.win) {
                    Some(window) => {
                        window.line = highlight.line;
                        window.column = highlight.start_col;
                        self.activate(highlight.win);
                    }
                    None => {
                        tracing::warn!(win = highlight.win, "highlight for a window that is not tracing")
                    }
                }
                self.stopped(StopReason::Step, None, &mut effects);
            }
            Command::SetThread(thread) => {
                tracing::debug!(tid = thread.tid, "interpreter switched thread");
                self.active_thread = Some(thread.tid);
            }
            Command::HadError(error) => {
                self.stopped(StopReason::Exception, Some(error.text()), &mut effects)
            }
            Command::Disconnect(d) => {
                let text = if d.message.is_empty() {
                    "interpreter disconnected".to_string()
                } else {
                    format!("interpreter disconnected: {}", d.message)
                };
                self.fatal(text, &mut effects);
            }
            Command::SysError(e) => {
                self.fatal(format!("interpreter system error: {}", e.text), &mut effects)
            }
            Command::InternalError(e) => {
                let detail = [&e.error_text, &e.message, &e.dmx]
                    .into_iter()
                    .find(|s| !s.is_empty())
                    .cloned()
                    .unwrap_or_else(|| format!("error {}", e.error));
                self.fatal(format!("interpreter internal error: {detail}"), &mut effects);
            }
            Command::ReplyGetThreads(reply) => {
                let mut threads: Vec<Thread> = Vec::with_capacity(reply.threads.len());
                for info in &reply.threads {
                    if threads.iter().any(|t| t.id == info.tid) {
                        continue;
                    }
                    threads.push(Thread {
                        id: info.tid,
                        name: thread_name(info),
                    });
                }
                tracing::debug!(count = threads.len(), "thread list refreshed");
                self.threads = threads;
            }
            Command::ReplyGetSIStack(reply) => {
                let names = reply
                    .stack
                    .iter()
                    .map(|entry| entry.description.trim().to_string())
                    .collect();
                self.stack_names.insert(reply.tid, names);
            }
            Command::WindowTypeChanged(change) if change.tracer => {
                self.start_tracing(change.win)
            }
            Command::WindowTypeChanged(change) => {
                if self.windows.remove(&change.win).is_some() {
                    tracing::debug!(win = change.win, "window stopped tracing");
                    self.reselect_active_window(change.win);
                }
            }
            Command::SetPromptType(p) => self.on_prompt(p.prompt),
            Command::AppendSessionOutput(out) if out.kind != OUTPUT_INPUT_ECHO => {
                if self.quiet.pending > 0 {
                    tracing::trace!("output belongs to an adapter execution");
                } else {
                    effects.events.push(Event::Output {
                        category: OutputCategory::Stdout,
                        output: out.result.clone(),
                    });
                }
            }
            Command::UnknownCommand(rejected) => {
                effects.events.push(Event::Output {
                    category: OutputCategory::Console,
                    output: format!("interpreter did not recognise command {}\n", rejected.name),
                });
            }
            Command::Unknown { name, .. } => {
                tracing::debug!(command = %name, "unhandled interpreter command");
                effects.events.push(Event::Output {
                    category: OutputCategory::Console,
                    output: format!("unhandled interpreter command {name}\n"),
                });
            }
            other => tracing::trace!(command = %other.name(), "no adapter state for command"),
        }
        effects
    }

    /// An editor window the interpreter turned into a tracer.
    fn start_tracing(&mut self, token: Token) {
        if self.windows.contains_key(&token) {
            return;
        }
        let Some(info) = self.open.get(&token) else {
            tracing::warn!(win = token, "unknown window became a tracer");
            return;
        };
        let thread_id = info.tid.or(self.active_thread).unwrap_or(MAIN_THREAD);
        tracing::debug!(win = token, thread_id, "window started tracing");
        self.windows.insert(
            token,
            TracerWindow {
                token,
                thread_id,
                name: info.name.clone(),
                line: info.line,
                column: info.column,
                activated: 0,
            },
        );
    }

    fn on_open_window(&mut self, window: &WindowContent, effects: &mut Effects) {
        self.open.insert(window.token, WindowInfo::from(window));
        let path = source_path(window);
        let source_ref = self.sources.bind(window.token, path);
        self.texts.insert(source_ref, window.text.clone());
        tracing::debug!(token = window.token, %path, source_ref, debugger = window.debugger, "window opened");

        if window.debugger {
            let thread_id = window
                .tid
                .or(self.active_thread)
                .unwrap_or(MAIN_THREAD);
            self.windows.insert(
                window.token,
                TracerWindow {
                    token: window.token,
                    thread_id,
                    name: window.name.clone(),
                    line: window.current_row,
                    column: window.current_column,
                    activated: 0,
                },
            );
            self.activate(window.token);
            self.stopped(StopReason::Entry, None, effects);
        }

        if let Some(lines) = self.deferred.take(path, source_ref) {
            tracing::debug!(token = window.token, ?lines, "applying deferred breakpoints");
            effects.commands.push(line_attributes(window.token, &lines));
        }
    }

    fn on_update_window(&mut self, window: &WindowContent) {
        self.open.insert(window.token, WindowInfo::from(window));
        let path = source_path(window);
        let source_ref = self.sources.bind(window.token, path);
        self.texts.insert(source_ref, window.text.clone());
        if let Some(tracer) = self.windows.get_mut(&window.token) {
            tracer.name = window.name.clone();
            tracer.line = window.current_row;
            tracer.column = window.current_column;
            if let Some(tid) = window.tid {
                tracer.thread_id = tid;
            }
        }
    }

    fn on_close_window(&mut self, token: Token) {
        self.open.remove(&token);
        self.sources.unbind(token);
        if self.windows.remove(&token).is_some() {
            tracing::debug!(token, "tracer window closed");
        }
        self.reselect_active_window(token);
    }

    fn reselect_active_window(&mut self, removed: Token) {
        if self.active_window == Some(removed) {
            self.active_window = self
                .windows
                .values()
                .max_by_key(|w| w.activated)
                .map(|w| w.token);
        }
    }

    /// Cached thread list, or the active thread when no list has arrived yet.
    pub(crate) fn threads(&self) -> Vec<Thread> {
        if self.threads.is_empty()
            && let Some(id) = self.active_thread
        {
            return vec![Thread {
                id,
                name: format!("Thread {id}"),
            }];
        }
        self.threads.clone()
    }

    fn frame_source(&self, window: &TracerWindow) -> Option<Source> {
        let source_ref = self.sources.source_ref(window.token)?;
        let path = self.sources.path(source_ref)?;
        let is_file = path != window.name;
        Some(Source {
            name: Some(window.name.clone()),
            path: is_file.then(|| path.to_string()),
            source_reference: (!is_file).then_some(source_ref),
        })
    }

    /// Frames for `thread_id`, innermost (most recently activated) first.
    pub(crate) fn stack_frames(&self, thread_id: Option<ThreadId>) -> eyre::Result<Vec<StackFrame>> {
        let thread_id = thread_id
            .or(self.active_thread)
            .ok_or_else(|| eyre::eyre!("no thread to report a stack for"))?;

        let mut windows: Vec<&TracerWindow> = self
            .windows
            .values()
            .filter(|w| w.thread_id == thread_id)
            .collect();
        if windows.is_empty() {
            eyre::bail!("thread {thread_id} has no suspended functions");
        }
        windows.sort_by(|a, b| b.activated.cmp(&a.activated));

        let names = self.stack_names.get(&thread_id);
        Ok(windows
            .into_iter()
            .enumerate()
            .map(|(i, w)| StackFrame {
                id: w.token,
                name: names
                    .and_then(|n| n.get(i))
                    .filter(|n| !n.is_empty())
                    .cloned()
                    .unwrap_or_else(|| w.name.clone()),
                source: self.frame_source(w),
                line: w.line + 1,
                column: w.column + 1,
            })
            .collect())
    }

    /// Translate a breakpoint request for `source` into interpreter work.
    ///
    /// `lines` are 1-based. With no window showing the source the lines are
    /// deferred until one opens.
    pub(crate) fn plan_breakpoints(
        &mut self,
        source: &Source,
        lines: &[SourceBreakpoint],
    ) -> eyre::Result<BreakpointPlan> {
        let (key, token) = match (&source.path, source.source_reference) {
            (Some(path), _) => (SourceKey::Path(path.clone()), self.sources.token_for_path(path)),
            (None, Some(r)) if r > 0 => (SourceKey::Ref(r), self.sources.token_for_ref(r)),
            _ => eyre::bail!("breakpoint source has neither a path nor a source reference"),
        };
        let requested: Vec<i64> = lines.iter().map(|b| b.line).filter(|l| *l >= 1).collect();
        let breakpoints = lines
            .iter()
            .map(|b| {
                let message = if b.line < 1 {
                    Some(format!("invalid line {}", b.line))
                } else if token.is_none() {
                    Some("source not open in the interpreter yet".to_string())
                } else {
                    None
                };
                Breakpoint {
                    verified: message.is_none(),
                    line: b.line,
                    source: Some(source.clone()),
                    message,
                }
            })
            .collect();

        match token {
            Some(token) => Ok(BreakpointPlan {
                command: Some(line_attributes(token, &requested)),
                resync: false,
                breakpoints,
            }),
            None => {
                tracing::debug!(?key, ?requested, "deferring breakpoints for unopened source");
                self.deferred.defer(key, requested);
                Ok(BreakpointPlan {
                    command: None,
                    resync: true,
                    breakpoints,
                })
            }
        }
    }

    pub(crate) fn source_text(&self, source_ref: SourceReference) -> eyre::Result<String> {
        let lines = self
            .texts
            .get(&source_ref)
            .ok_or_else(|| eyre::eyre!("unknown source reference {source_ref}"))?;
        Ok(lines.join("\n"))
    }

    pub(crate) fn pending_deferrals(&self) -> usize {
        self.deferred.len()
    }
}
