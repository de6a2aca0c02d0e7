//! Argument shapes for the modelled subset of RIDE commands.
//!
//! Every struct is `#[serde(default)]`: a recognised command with missing
//! fields decodes with zero values rather than failing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::flag;

/// Interpreter-assigned window identifier.
pub type Token = i64;

/// Interpreter thread identifier.
pub type Tid = i64;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Identify {
    pub api_version: i64,
    pub identity: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReplyIdentify {
    pub api_version: i64,
    pub version: String,
    pub platform: String,
    pub arch: String,
    pub pid: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Connect {
    pub remote_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Execute {
    pub text: String,
    #[serde(with = "flag")]
    pub trace: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetPromptType {
    #[serde(rename = "type")]
    pub prompt: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppendSessionOutput {
    pub result: String,
    #[serde(rename = "type")]
    pub kind: i64,
    pub group: i64,
}

/// Body of `OpenWindow` and `UpdateWindow`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WindowContent {
    pub token: Token,
    pub name: String,
    pub filename: String,
    pub text: Vec<String>,
    pub current_row: i64,
    pub current_column: i64,
    #[serde(with = "flag")]
    pub debugger: bool,
    pub entity_type: i64,
    pub offset: i64,
    #[serde(with = "flag")]
    pub read_only: bool,
    pub stop: Vec<i64>,
    pub trace: Vec<i64>,
    pub monitor: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tid: Option<Tid>,
    pub tname: String,
}

/// Arguments that only name a window: `CloseWindow`, `Continue`,
/// `RunCurrentLine`, `StepInto`, `ContinueTrace`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowRef {
    pub win: Token,
}

impl WindowRef {
    pub fn new(win: Token) -> Self {
        Self { win }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetLineAttributes {
    pub win: Token,
    pub stop: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetHighlightLine {
    pub win: Token,
    pub line: i64,
    pub end_line: i64,
    pub start_col: i64,
    pub end_col: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadInfo {
    pub tid: Tid,
    pub description: String,
    pub state: String,
    pub flags: String,
    #[serde(rename = "Treq")]
    pub treq: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyGetThreads {
    pub threads: Vec<ThreadInfo>,
}

/// Body of `SetThread` (interpreter push) and `FocusThread` (adapter request).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetThread {
    pub tid: Tid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackEntry {
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyGetSIStack {
    pub stack: Vec<StackEntry>,
    pub tid: Tid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveChanges {
    pub win: Token,
    pub text: Vec<String>,
    pub stop: Vec<i64>,
    pub trace: Vec<i64>,
    pub monitor: Vec<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplySaveChanges {
    pub win: Token,
    pub err: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HadError {
    pub error: i64,
    pub error_text: String,
    pub message: String,
}

impl HadError {
    /// Best human readable description of the error.
    pub fn text(&self) -> String {
        if !self.error_text.is_empty() {
            self.error_text.clone()
        } else if !self.message.is_empty() {
            self.message.clone()
        } else {
            format!("error {}", self.error)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Disconnect {
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SysError {
    pub text: String,
    pub stack: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InternalError {
    pub error: i64,
    pub error_text: String,
    pub dmx: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnknownCommand {
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CanAcceptInput {
    #[serde(with = "flag")]
    pub can_accept_input: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowTypeChanged {
    pub win: Token,
    #[serde(with = "flag")]
    pub tracer: bool,
}

macro_rules! commands {
    (
        with_args { $( $variant:ident($args:ty) ),* $(,)? }
        without_args { $( $bare:ident ),* $(,)? }
    ) => {
        /// A decoded RIDE command.
        ///
        /// Names the codec does not model decode to [`Command::Unknown`],
        /// keeping the raw argument object.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Command {
            $( $variant($args), )*
            $( $bare, )*
            Unknown {
                name: String,
                args: Map<String, Value>,
            },
        }

        impl Command {
            /// Every command name the codec gives a typed shape.
            pub const KNOWN: &'static [&'static str] = &[
                $( stringify!($variant), )*
                $( stringify!($bare), )*
            ];

            /// Wire name of the command.
            pub fn name(&self) -> &str {
                match self {
                    $( Command::$variant(_) => stringify!($variant), )*
                    $( Command::$bare => stringify!($bare), )*
                    Command::Unknown { name, .. } => name,
                }
            }

            /// Argument object as sent on the wire.
            pub fn args(&self) -> Result<Value, serde_json::Error> {
                Ok(match self {
                    $( Command::$variant(args) => serde_json::to_value(args)?, )*
                    $( Command::$bare => Value::Object(Map::new()), )*
                    Command::Unknown { args, .. } => Value::Object(args.clone()),
                })
            }

            /// Build a command from its wire name and argument object.
            pub(crate) fn from_parts(name: &str, args: Map<String, Value>) -> Command {
                match name {
                    $(
                        stringify!($variant) => {
                            match serde_json::from_value::<$args>(Value::Object(args.clone())) {
                                Ok(parsed) => Command::$variant(parsed),
                                Err(e) => {
                                    tracing::warn!(command = name, error = %e, "malformed arguments for known command");
                                    Command::Unknown { name: name.to_string(), args }
                                }
                            }
                        }
                    )*
                    $( stringify!($bare) => Command::$bare, )*
                    _ => Command::Unknown { name: name.to_string(), args },
                }
            }
        }
    };
}

commands! {
    with_args {
        Identify(Identify),
        ReplyIdentify(ReplyIdentify),
        Connect(Connect),
        Execute(Execute),
        SetPromptType(SetPromptType),
        AppendSessionOutput(AppendSessionOutput),
        OpenWindow(WindowContent),
        UpdateWindow(WindowContent),
        CloseWindow(WindowRef),
        SetLineAttributes(SetLineAttributes),
        SetHighlightLine(SetHighlightLine),
        Continue(WindowRef),
        RunCurrentLine(WindowRef),
        StepInto(WindowRef),
        ContinueTrace(WindowRef),
        ReplyGetThreads(ReplyGetThreads),
        SetThread(SetThread),
        FocusThread(SetThread),
        ReplyGetSIStack(ReplyGetSIStack),
        SaveChanges(SaveChanges),
        ReplySaveChanges(ReplySaveChanges),
        HadError(HadError),
        Disconnect(Disconnect),
        SysError(SysError),
        InternalError(InternalError),
        UnknownCommand(UnknownCommand),
        CanAcceptInput(CanAcceptInput),
        WindowTypeChanged(WindowTypeChanged),
    }
    without_args {
        GetWindowLayout,
        RestartThreads,
        WeakInterrupt,
        StrongInterrupt,
        GetThreads,
        GetSIStack,
    }
}

impl Command {
    /// Whether the codec has a typed shape for this command.
    pub fn is_known(&self) -> bool {
        !matches!(self, Command::Unknown { .. })
    }

    /// Window the command is addressed to or reports on, if any.
    pub fn window(&self) -> Option<Token> {
        match self {
            Command::OpenWindow(w) | Command::UpdateWindow(w) => Some(w.token),
            Command::CloseWindow(r)
            | Command::Continue(r)
            | Command::RunCurrentLine(r)
            | Command::StepInto(r)
            | Command::ContinueTrace(r) => Some(r.win),
            Command::SetLineAttributes(a) => Some(a.win),
            Command::SetHighlightLine(h) => Some(h.win),
            Command::SaveChanges(s) => Some(s.win),
            Command::ReplySaveChanges(r) => Some(r.win),
            Command::WindowTypeChanged(w) => Some(w.win),
            _ => None,
        }
    }
}
