//! Broadcast event bus.
//!
//! [`EventBus`] wraps `tokio::sync::broadcast`. The façade owns one bus per
//! session; clients subscribe and receive every event emitted after their
//! subscription. Emitting with no subscribers is a no-op, and a subscriber
//! that falls behind loses oldest events (the bus never blocks the engine
//! on a slow consumer).

use tokio::sync::broadcast;
use tracing::trace;

use crate::types::EngineEvent;

/// Default buffered events per subscriber.
const DEFAULT_CAPACITY: usize = 256;

/// Receiving half of the bus. Dropping it unsubscribes.
pub type EventReceiver = broadcast::Receiver<EngineEvent>;

/// Broadcast bus for [`EngineEvent`]s.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a bus with the default per-subscriber buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with an explicit per-subscriber buffer.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all events emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit an event to all current subscribers.
    ///
    /// Never blocks and never fails; an event with no subscribers is
    /// silently dropped.
    pub fn emit(&self, event: EngineEvent) {
        trace!(event = ?event, "emit");
        let _ = self.sender.send(event);
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
