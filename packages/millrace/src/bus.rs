//! Internal broadcast channel feeding committed actions to effect workers.
//!
//! # Guarantees
//!
//! - **At-most-once delivery**: Slow workers may miss actions
//! - **In-memory only**: Actions are not persisted
//! - **No replay**: Lagged receivers get `RecvError::Lagged`
//!
//! The store is the only publisher. Actions are published after the reducers
//! have committed, so workers always observe actions in commit order.

use tokio::sync::broadcast;

use crate::action::ActionEnvelope;

/// Default channel capacity for the action bus.
pub(crate) const DEFAULT_CAPACITY: usize = 1024;

/// Broadcast channel carrying committed action envelopes to effect workers.
#[derive(Clone)]
pub(crate) struct ActionBus {
    sender: broadcast::Sender<ActionEnvelope>,
}

impl ActionBus {
    /// Create a new action bus with the specified capacity.
    ///
    /// The capacity determines how many actions can be buffered before
    /// slow workers start lagging.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an envelope to all workers.
    ///
    /// Returns the number of receivers that received the envelope.
    pub fn publish(&self, envelope: ActionEnvelope) -> usize {
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Subscribe to actions on this bus.
    ///
    /// Returns a receiver that will receive all envelopes published after
    /// subscription. Envelopes published before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ActionEnvelope> {
        self.sender.subscribe()
    }

    /// Returns the number of active workers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ActionBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for ActionBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionBus")
            .field("receiver_count", &self.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::CorrelationId;

    #[derive(Debug, Clone, PartialEq)]
    struct TestAction {
        value: i32,
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = ActionBus::default();
        let mut receiver = bus.subscribe();

        bus.publish(ActionEnvelope::new_random(TestAction { value: 42 }));

        let envelope = receiver.recv().await.unwrap();
        assert_eq!(
            envelope.downcast_ref::<TestAction>(),
            Some(&TestAction { value: 42 })
        );
    }

    #[tokio::test]
    async fn test_multiple_receivers_share_correlation() {
        let bus = ActionBus::default();
        let mut r1 = bus.subscribe();
        let mut r2 = bus.subscribe();

        let cid = CorrelationId::new();
        bus.publish(ActionEnvelope::new(cid, TestAction { value: 1 }));

        let e1 = r1.recv().await.unwrap();
        let e2 = r2.recv().await.unwrap();
        assert_eq!(e1.cid, cid);
        assert_eq!(e2.cid, cid);
    }

    #[tokio::test]
    async fn test_publish_returns_receiver_count() {
        let bus = ActionBus::default();

        assert_eq!(bus.publish(ActionEnvelope::new_random(TestAction { value: 1 })), 0);

        let _r1 = bus.subscribe();
        assert_eq!(bus.publish(ActionEnvelope::new_random(TestAction { value: 2 })), 1);

        let _r2 = bus.subscribe();
        assert_eq!(bus.publish(ActionEnvelope::new_random(TestAction { value: 3 })), 2);
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_actions() {
        let bus = ActionBus::default();

        bus.publish(ActionEnvelope::new_random(TestAction { value: 1 }));

        let mut receiver = bus.subscribe();
        bus.publish(ActionEnvelope::new_random(TestAction { value: 2 }));

        let envelope = receiver.recv().await.unwrap();
        assert_eq!(envelope.downcast_ref::<TestAction>().unwrap().value, 2);
    }

    #[tokio::test]
    async fn test_clone_shares_channel() {
        let bus1 = ActionBus::default();
        let bus2 = bus1.clone();
        let mut receiver = bus1.subscribe();

        bus2.publish(ActionEnvelope::new_random(TestAction { value: 55 }));

        let envelope = receiver.recv().await.unwrap();
        assert_eq!(envelope.downcast_ref::<TestAction>().unwrap().value, 55);
    }
}
