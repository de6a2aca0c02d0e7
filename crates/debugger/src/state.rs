use serde::{Deserialize, Serialize};

use crate::types::ThreadId;

/// How the interpreter process came to be debugged. Process ownership is
/// handled by whoever launched the adapter; here it only labels the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Launched,
    Attached,
}

/// Lifecycle of one debugging session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Initialized,
    Running(RunMode),
    Terminated,
}

impl Lifecycle {
    pub fn is_running(&self) -> bool {
        matches!(self, Lifecycle::Running(_))
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Lifecycle::Terminated)
    }

    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Lifecycle::Created => "created",
            Lifecycle::Initialized => "initialized",
            Lifecycle::Running(RunMode::Launched) => "running (launched)",
            Lifecycle::Running(RunMode::Attached) => "running (attached)",
            Lifecycle::Terminated => "terminated",
        }
    }

    /// Fail unless the session is in `expected`.
    pub(crate) fn require(&self, request: &str, expected: &[Lifecycle]) -> eyre::Result<()> {
        if expected.contains(self) {
            return Ok(());
        }
        eyre::bail!("cannot handle {request} while session is {}", self.describe())
    }

    pub(crate) fn require_running(&self, request: &str) -> eyre::Result<()> {
        if self.is_running() {
            return Ok(());
        }
        eyre::bail!(
            "cannot handle {request} while session is {}, expected running",
            self.describe()
        )
    }
}

/// Where to find the interpreter for `launch` and `attach`.
///
/// Unset fields fall back to the connector's configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectTarget {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Entry,
    Step,
    Exception,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputCategory {
    Console,
    Stdout,
    Stderr,
}

/// Events published to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Initialized,
    Stopped {
        reason: StopReason,
        thread_id: ThreadId,
        text: Option<String>,
    },
    Output {
        category: OutputCategory,
        output: String,
    },
    Terminated,
}
