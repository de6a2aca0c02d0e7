//! Boolean fields as the interpreter sends them.
//!
//! Interpreters emit `0`/`1` for most flags, while other peers (and older
//! builds) use JSON booleans. Both are accepted; `0`/`1` is written.

use serde::{Deserialize, Deserializer, Serializer};
use serde_json::Value;

pub fn serialize<S>(value: &bool, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u8(u8::from(*value))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Null => Ok(false),
        Value::Number(n) => match n.as_f64() {
            Some(f) => Ok(f != 0.0),
            None => Err(serde::de::Error::custom("invalid numeric flag")),
        },
        other => Err(serde::de::Error::custom(format!(
            "expected boolean or 0/1, got {other}"
        ))),
    }
}
