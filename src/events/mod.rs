//! Engine domain events
//!
//! The resolver publishes outcomes here; side channels (notifications)
//! subscribe instead of being called inline.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 1024;

/// Lifecycle events emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// New record stored
    TransactionRegistered { id: Uuid, fee_threshold: u64 },

    /// Node refused the payload; record stays unsent
    SubmissionRejected { id: Uuid, reason: String },

    /// Node accepted the payload
    TransactionSubmitted { id: Uuid, tx_hash: String, fee: u64 },

    /// Receipt with success status
    TransactionConfirmed {
        id: Uuid,
        tx_hash: String,
        block_number: Option<u64>,
    },

    /// Receipt with a failure status
    TransactionReverted { id: Uuid, tx_hash: String },

    /// Receipt never showed up within the retry budget
    ConfirmationTimedOut {
        id: Uuid,
        tx_hash: String,
        attempts: u32,
    },
}

impl EngineEvent {
    pub fn transaction_id(&self) -> Uuid {
        match self {
            EngineEvent::TransactionRegistered { id, .. } => *id,
            EngineEvent::SubmissionRejected { id, .. } => *id,
            EngineEvent::TransactionSubmitted { id, .. } => *id,
            EngineEvent::TransactionConfirmed { id, .. } => *id,
            EngineEvent::TransactionReverted { id, .. } => *id,
            EngineEvent::ConfirmationTimedOut { id, .. } => *id,
        }
    }

    /// Get event name for metrics
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::TransactionRegistered { .. } => "transaction_registered",
            EngineEvent::SubmissionRejected { .. } => "submission_rejected",
            EngineEvent::TransactionSubmitted { .. } => "transaction_submitted",
            EngineEvent::TransactionConfirmed { .. } => "transaction_confirmed",
            EngineEvent::TransactionReverted { .. } => "transaction_reverted",
            EngineEvent::ConfirmationTimedOut { .. } => "confirmation_timed_out",
        }
    }
}

/// Cloneable publisher over a broadcast channel
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Fire and forget; having no subscribers is fine
    pub fn publish(&self, event: EngineEvent) {
        trace!("Publishing {}", event.name());
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new();
        bus.publish(EngineEvent::TransactionRegistered {
            id: Uuid::new_v4(),
            fee_threshold: 10,
        });
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();

        bus.publish(EngineEvent::TransactionReverted {
            id,
            tx_hash: "0x01".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.transaction_id(), id);
        assert_eq!(event.name(), "transaction_reverted");
    }

    #[test]
    fn test_event_serialises_with_type_tag() {
        let event = EngineEvent::TransactionSubmitted {
            id: Uuid::nil(),
            tx_hash: "0xab".to_string(),
            fee: 7,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "transaction_submitted");
        assert_eq!(json["fee"], 7);
    }
}
