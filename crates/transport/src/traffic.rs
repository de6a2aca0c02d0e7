//! Passive observation of every frame crossing the link.
//!
//! A [`Tap`] is attached to both halves of a framed connection. Observers see
//! the raw payload after a frame has been fully read, or before it is written,
//! and cannot influence control flow.

use std::sync::Arc;
use std::time::SystemTime;

/// Which way a frame travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Interpreter to adapter.
    Inbound,
    /// Adapter to interpreter.
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// A single observed frame.
#[derive(Debug, Clone, Copy)]
pub struct TrafficRecord<'a> {
    pub direction: Direction,
    pub timestamp: SystemTime,
    pub payload: &'a str,
}

/// Receives a copy of every frame. Implementations must not block for long:
/// they run on the reader thread and on every writer.
pub trait TrafficObserver: Send + Sync {
    fn observe(&self, record: &TrafficRecord<'_>);
}

/// Source of timestamps for traffic records.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// An observer together with the clock used to stamp its records.
#[derive(Clone)]
pub struct Tap {
    observer: Arc<dyn TrafficObserver>,
    clock: Arc<dyn Clock>,
}

impl Tap {
    pub fn new(observer: Arc<dyn TrafficObserver>) -> Self {
        Self::with_clock(observer, Arc::new(SystemClock))
    }

    pub fn with_clock(observer: Arc<dyn TrafficObserver>, clock: Arc<dyn Clock>) -> Self {
        Self { observer, clock }
    }

    pub(crate) fn record(&self, direction: Direction, payload: &str) {
        let record = TrafficRecord {
            direction,
            timestamp: self.clock.now(),
            payload,
        };
        self.observer.observe(&record);
    }
}

impl std::fmt::Debug for Tap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tap").finish_non_exhaustive()
    }
}
