//! Non-blocking state-change notification bus.
//!
//! Publishes never block and tolerate the absence of subscribers; a slow
//! subscriber lags on its own receiver and can never stall a dispatch.

use crate::state_machine::{EventId, StateId};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 64;

/// A committed transition, as observed by subscribers and listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub from: StateId,
    pub to: StateId,
    pub event: EventId,
}

/// Broadcast bus the machine publishes state changes to.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StateChange>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes a state change. Never blocks; a send with no subscribers
    /// is not an error.
    pub fn publish(&self, change: StateChange) {
        let _ = self.tx.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
