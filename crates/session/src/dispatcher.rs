use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use eyre::WrapErr;
use protocol::{Command, DecodedMessage, Execute, OUTPUT_INPUT_ECHO, PROMPT_BUSY, Token};
use transport::{FrameReader, FrameWriter, PollResult};

use crate::fanout::Fanout;

/// How long the reader loop waits for a frame before re-checking for
/// cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Buffer used by [`Dispatcher::execute_and_wait`] for its private subscription.
const WAIT_CAPACITY: usize = 1024;

/// What happened to a command handed to [`Dispatcher::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the transport.
    Written,
    /// Queued until the interpreter reports a non-busy prompt.
    Queued,
    /// A `CloseWindow` held until the matching save is acknowledged.
    HeldForSave,
}

/// Why the reader loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunExit {
    Cancelled,
    EndOfStream,
    Failed(String),
}

/// Commands that may be written while the interpreter is busy.
fn allowed_while_busy(command: &Command) -> bool {
    matches!(
        command,
        Command::WeakInterrupt
            | Command::StrongInterrupt
            | Command::SaveChanges(_)
            | Command::CloseWindow(_)
    ) || command.name().starts_with("Reply")
}

/// Commands that run interpreter code and are abandoned after an error.
fn is_execute_class(command: &Command) -> bool {
    matches!(
        command,
        Command::Execute(_)
            | Command::Continue(_)
            | Command::RunCurrentLine(_)
            | Command::StepInto(_)
            | Command::ContinueTrace(_)
            | Command::RestartThreads
    )
}

#[derive(Debug, Default)]
struct DispatchState {
    /// `None` until the interpreter first reports a prompt; treated as ready.
    prompt: Option<i64>,
    queue: VecDeque<Command>,
    pending_saves: HashSet<Token>,
    pending_closes: HashMap<Token, Vec<Command>>,
}

impl DispatchState {
    fn is_busy(&self) -> bool {
        self.prompt == Some(PROMPT_BUSY)
    }
}

struct Shared {
    state: Mutex<DispatchState>,
    writer: FrameWriter,
    fanout: Fanout,
}

/// Owner of the outbound side of one interpreter link.
///
/// Cloning is cheap; all clones share the same queue, prompt state and
/// subscriber list. The state lock is always taken before the transport's
/// writer lock.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub fn new(writer: FrameWriter) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(DispatchState::default()),
                writer,
                fanout: Fanout::default(),
            }),
        }
    }

    fn state(&self) -> eyre::Result<MutexGuard<'_, DispatchState>> {
        self.shared
            .state
            .lock()
            .map_err(|_| eyre::eyre!("dispatcher state mutex poisoned"))
    }

    /// Most recent prompt type reported by the interpreter.
    pub fn prompt_state(&self) -> Option<i64> {
        self.state().ok().and_then(|s| s.prompt)
    }

    pub fn queued(&self) -> Vec<Command> {
        self.state()
            .map(|s| s.queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Register a subscriber with room for `capacity` undelivered messages.
    ///
    /// Delivery is best effort: when the buffer is full, new messages are
    /// dropped for this subscriber rather than stalling the reader.
    pub fn subscribe(&self, capacity: usize) -> Receiver<DecodedMessage> {
        self.shared.fanout.subscribe(capacity)
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.fanout.len()
    }

    /// Messages dropped because a subscriber's buffer was full.
    pub fn dropped_messages(&self) -> u64 {
        self.shared.fanout.dropped()
    }

    /// Send a command, or defer it when the interpreter cannot take it yet.
    ///
    /// Deferral is not an error. Only a failed write to the transport is.
    #[tracing::instrument(skip(self, command), fields(command = %command.name()), level = "debug")]
    pub fn send(&self, command: Command) -> eyre::Result<SendOutcome> {
        let mut state = self.state()?;

        match &command {
            Command::CloseWindow(target) if state.pending_saves.contains(&target.win) => {
                tracing::debug!(win = target.win, "holding close until save is acknowledged");
                state
                    .pending_closes
                    .entry(target.win)
                    .or_default()
                    .push(command);
                Ok(SendOutcome::HeldForSave)
            }
            Command::SaveChanges(save) => {
                let win = save.win;
                self.write(&command)?;
                state.pending_saves.insert(win);
                Ok(SendOutcome::Written)
            }
            _ if allowed_while_busy(&command) => {
                self.write(&command)?;
                Ok(SendOutcome::Written)
            }
            _ if state.is_busy() => {
                tracing::debug!("interpreter busy, queueing command");
                state.queue.push_back(command);
                Ok(SendOutcome::Queued)
            }
            _ if !state.queue.is_empty() => {
                // earlier commands left over from a failed replay go first
                state.queue.push_back(command);
                if let Err(e) = self.flush(&mut state) {
                    state.queue.pop_back();
                    return Err(e);
                }
                Ok(SendOutcome::Written)
            }
            _ => {
                self.write(&command)?;
                Ok(SendOutcome::Written)
            }
        }
    }

    fn write(&self, command: &Command) -> eyre::Result<()> {
        let payload = protocol::encode(command).wrap_err("encoding command")?;
        self.shared
            .writer
            .write_frame(&payload)
            .wrap_err_with(|| format!("writing {} to interpreter", command.name()))
    }

    /// Replay queued commands in order. On a write failure the failed command
    /// and everything after it stay queued, in their original order.
    fn flush(&self, state: &mut DispatchState) -> eyre::Result<()> {
        while let Some(command) = state.queue.pop_front() {
            if let Err(e) = self.write(&command) {
                state.queue.push_front(command);
                return Err(e.wrap_err("replaying queued commands"));
            }
        }
        Ok(())
    }

    fn release_closes(&self, state: &mut DispatchState, win: Token) {
        for close in state.pending_closes.remove(&win).unwrap_or_default() {
            if let Err(e) = self.write(&close) {
                tracing::error!(error = %e, win, "releasing held close failed");
            }
        }
    }

    /// Update dispatcher bookkeeping for one inbound command.
    fn observe(&self, command: &Command) {
        let Ok(mut state) = self.state() else {
            tracing::error!("dispatcher state mutex poisoned, ignoring inbound command");
            return;
        };

        match command {
            Command::SetPromptType(p) => {
                let was_busy = state.is_busy();
                state.prompt = Some(p.prompt);
                if was_busy && !state.is_busy() {
                    tracing::debug!(prompt = p.prompt, queued = state.queue.len(), "prompt ready");
                }
                if !state.is_busy()
                    && let Err(e) = self.flush(&mut state)
                {
                    tracing::error!(error = %e, queued = state.queue.len(), "replaying queued commands failed");
                }
            }
            Command::ReplySaveChanges(reply) => {
                if reply.err != 0 {
                    tracing::warn!(win = reply.win, err = reply.err, "save failed, releasing close anyway");
                }
                state.pending_saves.remove(&reply.win);
                self.release_closes(&mut state, reply.win);
            }
            Command::HadError(_) => {
                let before = state.queue.len();
                state.queue.retain(|c| !is_execute_class(c));
                tracing::debug!(cleared = before - state.queue.len(), "dropped queued execution after error");
            }
            Command::Disconnect(_) | Command::SysError(_) | Command::InternalError(_) => {
                tracing::debug!(cleared = state.queue.len(), "clearing outbound queue");
                state.queue.clear();
                state.pending_saves.clear();
                state.pending_closes.clear();
            }
            _ => {}
        }
    }

    /// Decode one inbound payload, update state and publish it.
    pub fn dispatch(&self, payload: &str) {
        let message = protocol::decode(payload);
        match &message {
            DecodedMessage::Command(command) => {
                tracing::debug!(command = %command.name(), known = command.is_known(), "received command");
                self.observe(command);
            }
            DecodedMessage::Raw(text) => tracing::debug!(%text, "received non-command frame"),
        }
        self.shared.fanout.publish(&message);
    }

    /// Read frames until the stream ends, a read fails or `shutdown` fires.
    ///
    /// Dropping the shutdown sender also counts as cancellation. Frames are
    /// dispatched only once fully read.
    pub fn run<R>(&self, mut reader: FrameReader<R>, shutdown: oneshot::Receiver<()>) -> RunExit
    where
        R: std::io::Read,
    {
        let exit = loop {
            match shutdown.try_recv() {
                Ok(()) | Err(oneshot::TryRecvError::Disconnected) => {
                    tracing::debug!("reader loop cancelled");
                    break RunExit::Cancelled;
                }
                Err(oneshot::TryRecvError::Empty) => {}
            }

            match reader.try_read_frame(POLL_INTERVAL) {
                Ok(PollResult::Frame(payload)) => self.dispatch(&payload),
                Ok(PollResult::Closed) => {
                    tracing::debug!("interpreter closed the connection");
                    break RunExit::EndOfStream;
                }
                Ok(PollResult::Timeout) => {}
                Err(e) => {
                    tracing::error!(error = %e, "error reading from interpreter, terminating");
                    break RunExit::Failed(e.to_string());
                }
            }
        };
        self.shared.fanout.close();
        exit
    }

    /// Run `text` and collect the session output it produces.
    ///
    /// Completion is the first non-busy prompt after the interpreter has gone
    /// busy, so a prompt that merely releases this command from the queue is
    /// not mistaken for the end of execution. Input echo is excluded.
    #[tracing::instrument(skip(self), level = "debug")]
    pub fn execute_and_wait(&self, text: &str, timeout: Duration) -> eyre::Result<String> {
        let rx = self.subscribe(WAIT_CAPACITY);
        let mut text = text.to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        self.send(Command::Execute(Execute { text, trace: false }))
            .wrap_err("sending execute")?;

        let deadline = Instant::now() + timeout;
        let mut seen_busy = false;
        let mut output = String::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let message = match rx.recv_timeout(remaining) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => {
                    eyre::bail!("timed out after {timeout:?} waiting for the interpreter")
                }
                Err(RecvTimeoutError::Disconnected) => {
                    eyre::bail!("interpreter link closed while waiting for a result")
                }
            };
            match message.into_command() {
                Some(Command::AppendSessionOutput(out)) if out.kind != OUTPUT_INPUT_ECHO => {
                    output.push_str(&out.result);
                }
                Some(Command::SetPromptType(p)) if p.prompt == PROMPT_BUSY => seen_busy = true,
                Some(Command::SetPromptType(_)) if seen_busy => return Ok(output),
                Some(Command::HadError(e)) => {
                    eyre::bail!("{}{}", output, e.text())
                }
                Some(Command::Disconnect(_) | Command::SysError(_) | Command::InternalError(_)) => {
                    eyre::bail!("interpreter failed while evaluating")
                }
                _ => {}
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("prompt", &self.prompt_state())
            .finish_non_exhaustive()
    }
}
