//! RIDE debug adapter
//!
//! Presents an interpreter's window and token oriented tracing model as DAP
//! style threads, stack frames and breakpoints. [`DebugAdapter`] answers
//! host requests; interpreter pushes are folded into its model on a
//! background thread and surface as [`Event`]s.
mod connector;
mod debugger;
mod internals;
mod sources;
mod state;
pub mod types;

pub use connector::{Connector, TcpConnector};
pub use debugger::{AdapterSettings, DebugAdapter, PauseFallback};
pub use state::{ConnectTarget, Event, Lifecycle, OutputCategory, RunMode, StopReason};
