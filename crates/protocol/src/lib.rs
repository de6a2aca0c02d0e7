//! RIDE command codec
//!
//! Converts frame payloads into typed [`Command`]s and back. The wire form of
//! a command is a two element JSON array, `["Name", {args}]`.
//!
//! ```
//! use protocol::{Command, DecodedMessage, WindowRef, decode, encode};
//!
//! let payload = encode(&Command::RunCurrentLine(WindowRef::new(700)))?;
//! assert_eq!(payload, r#"["RunCurrentLine",{"win":700}]"#);
//!
//! match decode(&payload) {
//!     DecodedMessage::Command(Command::RunCurrentLine(r)) => assert_eq!(r.win, 700),
//!     other => panic!("unexpected {other:?}"),
//! }
//! # Ok::<(), serde_json::Error>(())
//! ```
mod codec;
mod command;
pub mod flag;

pub use codec::{DecodedMessage, decode, encode, encode_parts};
pub use command::*;

/// Prompt type reported while the interpreter is busy executing.
pub const PROMPT_BUSY: i64 = 0;

/// `AppendSessionOutput` type used for the echo of submitted input.
pub const OUTPUT_INPUT_ECHO: i64 = 14;
