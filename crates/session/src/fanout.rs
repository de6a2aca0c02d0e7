//! Best-effort broadcast of decoded inbound messages.
//!
//! Each subscriber owns a bounded channel. Publishing never blocks: when a
//! subscriber's buffer is full that one message is dropped for that
//! subscriber only, and a subscriber whose receiver has been dropped is
//! removed on the next publish.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use protocol::DecodedMessage;

#[derive(Default)]
pub(crate) struct Fanout {
    subscribers: Mutex<Vec<Sender<DecodedMessage>>>,
    dropped: AtomicU64,
}

impl Fanout {
    pub(crate) fn subscribe(&self, capacity: usize) -> Receiver<DecodedMessage> {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push(tx),
            Err(_) => tracing::error!("subscriber list poisoned, subscription will never receive"),
        }
        rx
    }

    pub(crate) fn publish(&self, message: &DecodedMessage) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            tracing::error!("subscriber list poisoned, dropping message");
            return;
        };
        subscribers.retain(|tx| match tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("subscriber buffer full, dropping message");
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("subscriber went away, unsubscribing");
                false
            }
        });
    }

    /// Drop every sender so blocked receivers observe disconnection.
    pub(crate) fn close(&self) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.clear();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
