use serde_json::{Map, Value};

use crate::command::Command;

/// Result of decoding one frame payload.
///
/// Decoding never fails: anything that is not a `[name, args]` array comes
/// back as [`DecodedMessage::Raw`] with the original text, e.g. the plain
/// `SupportedProtocols=2` handshake lines.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMessage {
    Command(Command),
    Raw(String),
}

impl DecodedMessage {
    pub fn command(&self) -> Option<&Command> {
        match self {
            DecodedMessage::Command(c) => Some(c),
            DecodedMessage::Raw(_) => None,
        }
    }

    pub fn into_command(self) -> Option<Command> {
        match self {
            DecodedMessage::Command(c) => Some(c),
            DecodedMessage::Raw(_) => None,
        }
    }
}

/// Decode a frame payload.
pub fn decode(payload: &str) -> DecodedMessage {
    if !payload.trim_start().starts_with('[') {
        return DecodedMessage::Raw(payload.to_string());
    }

    let parts: Vec<Value> = match serde_json::from_str(payload) {
        Ok(parts) => parts,
        Err(e) => {
            tracing::debug!(error = %e, "payload is not a JSON array, keeping raw text");
            return DecodedMessage::Raw(payload.to_string());
        }
    };

    let [name, args] = match <[Value; 2]>::try_from(parts) {
        Ok(pair) => pair,
        Err(parts) => {
            tracing::debug!(len = parts.len(), "command array must have two elements");
            return DecodedMessage::Raw(payload.to_string());
        }
    };

    let Value::String(name) = name else {
        return DecodedMessage::Raw(payload.to_string());
    };

    let args = match args {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            tracing::debug!(command = %name, args = %other, "non-object arguments, keeping raw text");
            return DecodedMessage::Raw(payload.to_string());
        }
    };

    let command = Command::from_parts(&name, args);
    if !command.is_known() {
        tracing::debug!(command = %name, "decoded unknown command");
    }
    DecodedMessage::Command(command)
}

/// Encode a command as `[name, args]`.
pub fn encode(command: &Command) -> Result<String, serde_json::Error> {
    encode_parts(command.name(), command.args()?)
}

/// Encode an arbitrary name and argument value as `[name, args]`.
///
/// `null` arguments are written as an empty object so the array always has
/// two elements.
pub fn encode_parts(name: &str, args: Value) -> Result<String, serde_json::Error> {
    let args = match args {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    serde_json::to_string(&Value::Array(vec![Value::String(name.to_string()), args]))
}
