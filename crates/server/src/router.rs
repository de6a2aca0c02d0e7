use debugger::{ConnectTarget, DebugAdapter};
use eyre::WrapErr;
use serde::Serialize;
use serde_json::{Value, json};

use crate::messages::{
    EvaluateArguments, Request, ScopesArguments, SetBreakpointsArguments, SourceArguments,
    StackTraceArguments, VariablesArguments,
};

fn to_body<T: Serialize>(value: T) -> eyre::Result<Option<Value>> {
    serde_json::to_value(value)
        .map(Some)
        .wrap_err("serializing response body")
}

/// Run one host request against the adapter, returning the response body.
#[tracing::instrument(skip_all, fields(command = %request.command, seq = request.seq))]
pub fn handle(adapter: &DebugAdapter, request: &Request) -> eyre::Result<Option<Value>> {
    match request.command.as_str() {
        "initialize" => to_body(adapter.initialize()?),
        "launch" => {
            let target: ConnectTarget = request.arguments()?;
            adapter.launch(&target)?;
            Ok(None)
        }
        "attach" => {
            let target: ConnectTarget = request.arguments()?;
            adapter.attach(&target)?;
            Ok(None)
        }
        "configurationDone" => adapter.configuration_done().map(|_| None),
        "disconnect" => {
            // hosts send this after a terminated event too
            if adapter.lifecycle().is_terminated() {
                return Ok(None);
            }
            adapter.disconnect().map(|_| None)
        }
        "terminate" => adapter.terminate().map(|_| None),
        "continue" => {
            adapter.r#continue()?;
            Ok(Some(json!({ "allThreadsContinued": true })))
        }
        "next" => adapter.next().map(|_| None),
        "stepIn" => adapter.step_in().map(|_| None),
        "stepOut" => adapter.step_out().map(|_| None),
        "pause" => adapter.pause().map(|_| None),
        "threads" => Ok(Some(json!({ "threads": adapter.threads()? }))),
        "stackTrace" => {
            let args: StackTraceArguments = request.arguments()?;
            let frames = adapter.stack_trace(args.thread_id)?;
            Ok(Some(json!({
                "totalFrames": frames.len(),
                "stackFrames": frames,
            })))
        }
        "setBreakpoints" => {
            let args: SetBreakpointsArguments = request.arguments()?;
            let breakpoints = adapter.set_breakpoints(&args.source, &args.requested())?;
            Ok(Some(json!({ "breakpoints": breakpoints })))
        }
        "scopes" => {
            let args: ScopesArguments = request.arguments()?;
            Ok(Some(json!({ "scopes": adapter.scopes(args.frame_id)? })))
        }
        "variables" => {
            let args: VariablesArguments = request.arguments()?;
            Ok(Some(
                json!({ "variables": adapter.variables(args.variables_reference)? }),
            ))
        }
        "evaluate" => {
            let args: EvaluateArguments = request.arguments()?;
            to_body(adapter.evaluate(&args.expression)?)
        }
        "source" => {
            let args: SourceArguments = request.arguments()?;
            let reference = args
                .reference()
                .ok_or_else(|| eyre::eyre!("source request without a source reference"))?;
            Ok(Some(json!({ "content": adapter.source(reference)? })))
        }
        other => eyre::bail!("unsupported request {other}"),
    }
}

/// Requests after which the server stops reading.
pub fn ends_session(command: &str) -> bool {
    matches!(command, "disconnect" | "terminate")
}
