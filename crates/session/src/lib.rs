//! Interpreter session management
//!
//! Sits between the transport and the debug adapter. A [`Connection`] runs
//! the version negotiation and bootstrap; its [`Dispatcher`] gates outbound
//! commands on the interpreter's prompt state, holds window closes until the
//! matching save is acknowledged, and fans decoded inbound messages out to
//! any number of subscribers.
mod connection;
mod dispatcher;
mod fanout;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use connection::{ConnectOptions, Connection, RunningSession, bootstrap_commands};
pub use dispatcher::{Dispatcher, RunExit, SendOutcome};
