//! DAP envelopes and the request arguments the router understands.
use debugger::types::{Source, SourceBreakpoint, SourceReference, StackFrameId, ThreadId};
use debugger::{Event, StopReason};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub seq: i64,
    pub command: String,
    #[serde(default)]
    pub arguments: Value,
}

impl Request {
    /// Arguments as `T`. Missing arguments read as an empty object.
    pub fn arguments<T>(&self) -> eyre::Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let value = match &self.arguments {
            Value::Null => json!({}),
            other => other.clone(),
        };
        serde_json::from_value(value)
            .map_err(|e| eyre::eyre!("invalid arguments for {}: {e}", self.command))
    }
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub seq: i64,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct EventMessage {
    pub seq: i64,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    pub source: Source,
    #[serde(default)]
    pub breakpoints: Option<Vec<SourceBreakpoint>>,
    /// Deprecated form, used when `breakpoints` is absent.
    #[serde(default)]
    pub lines: Option<Vec<i64>>,
}

impl SetBreakpointsArguments {
    pub fn requested(&self) -> Vec<SourceBreakpoint> {
        match (&self.breakpoints, &self.lines) {
            (Some(breakpoints), _) => breakpoints.clone(),
            (None, Some(lines)) => lines
                .iter()
                .map(|&line| SourceBreakpoint { line, column: None })
                .collect(),
            (None, None) => Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceArguments {
    #[serde(default)]
    pub thread_id: Option<ThreadId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopesArguments {
    pub frame_id: StackFrameId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablesArguments {
    pub variables_reference: i64,
}

#[derive(Debug, Deserialize)]
pub struct EvaluateArguments {
    pub expression: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceArguments {
    #[serde(default)]
    pub source_reference: Option<SourceReference>,
    #[serde(default)]
    pub source: Option<Source>,
}

impl SourceArguments {
    /// `source.sourceReference` wins over the deprecated top-level field.
    pub fn reference(&self) -> Option<SourceReference> {
        self.source
            .as_ref()
            .and_then(|s| s.source_reference)
            .or(self.source_reference)
            .filter(|&r| r > 0)
    }
}

/// Event name and body for an adapter event.
pub fn event_body(event: &Event) -> (&'static str, Option<Value>) {
    match event {
        Event::Initialized => ("initialized", None),
        Event::Stopped {
            reason,
            thread_id,
            text,
        } => {
            let reason = match reason {
                StopReason::Entry => "entry",
                StopReason::Step => "step",
                StopReason::Exception => "exception",
            };
            let mut body = json!({
                "reason": reason,
                "threadId": thread_id,
                "allThreadsStopped": true,
            });
            if let Some(text) = text {
                body["text"] = json!(text);
            }
            ("stopped", Some(body))
        }
        Event::Output { category, output } => (
            "output",
            Some(json!({ "category": category, "output": output })),
        ),
        Event::Terminated => ("terminated", None),
    }
}
