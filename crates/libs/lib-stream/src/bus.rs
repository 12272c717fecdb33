//! # Event Bus
//!
//! Lightweight broadcast bus that fans decoded change events out to every
//! consumer path. Each consumer owns its receiver and drains it at its own
//! pace; a lagging consumer never back-pressures the feed.

use lib_core::model::event::ChangeEvent;
use tokio::sync::broadcast;

/// Default capacity of the fan-out channel.
///
/// Sized so a consumer stalled for a few seconds under normal write rates
/// does not lag out; a consumer that does lag is told so by the channel
/// (`RecvError::Lagged`) and reacts per its own contract.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// In-process fan-out of [`ChangeEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Get a receiver covering every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: ChangeEvent) {
        // A send error only means no subscriber is attached yet; the feed
        // keeps running either way.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_core::model::event::{ChangeEvent, ChangeOperation, WatchedCollection};

    fn sample_event(id: &str) -> ChangeEvent {
        ChangeEvent {
            operation: ChangeOperation::Insert,
            collection: WatchedCollection::Messages,
            document_id: id.to_string(),
            full_document: None,
            pre_image: None,
            resume_token: None,
        }
    }

    #[tokio::test]
    async fn independent_receivers_see_the_same_order() {
        let bus = EventBus::new(8);
        let mut hub_rx = bus.subscribe();
        let mut sync_rx = bus.subscribe();

        bus.publish(sample_event("a"));
        bus.publish(sample_event("b"));

        assert_eq!(hub_rx.recv().await.unwrap().document_id, "a");
        assert_eq!(hub_rx.recv().await.unwrap().document_id, "b");
        assert_eq!(sync_rx.recv().await.unwrap().document_id, "a");
        assert_eq!(sync_rx.recv().await.unwrap().document_id, "b");
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(8);
        bus.publish(sample_event("a"));
    }
}
