//! Event bus — live fan-out half. The persisted, seq-ordered half lives in
//! [`crate::store`]; [`crate::store::Store::subscribe`] composes both to
//! satisfy the full replay-then-live contract.

use agenterm_types::Event;
use tokio::sync::broadcast;

/// Capacity matches common broadcast-channel sizing (2048); a slow consumer
/// beyond this backlog is disconnected with `RecvError::Lagged` rather than
/// blocking producers.
const CHANNEL_CAPACITY: usize = 2048;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: Event) {
        // No subscribers is not an error: events are still durable via the
        // store's JSONL log and replayable later.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
