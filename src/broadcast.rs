//! Broadcast bus: fans out per-collection create/update/delete events to
//! subscribers.
//!
//! A single `tokio::sync::broadcast` channel carries a typed
//! `{collection, action, record}` envelope to every subscriber. Delivery
//! is best-effort: a subscriber that lags is dropped (`RecvError::Lagged`)
//! rather than slowing the producer.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// One event per mutated record: `{collection, action, record}`.
/// `record` carries the full
/// post-image on `create`/`update`; on `delete` it carries only `{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastEvent {
    pub collection: String,
    pub action: ChangeAction,
    pub record: serde_json::Value,
}

/// The process-wide Broadcast bus singleton. Cheap to clone (wraps a
/// `tokio::sync::broadcast::Sender`); pass the same instance to the Store,
/// the HTTP API's SSE endpoint, and the auto-resume watcher rather than
/// relying on a process-wide global.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<BroadcastEvent>,
}

impl Bus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all current subscribers. Silently drops the
    /// event if there are no subscribers attached.
    pub fn publish(&self, event: BroadcastEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_delivers_to_all_subscribers() {
        let bus = Bus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(BroadcastEvent {
            collection: "tasks".to_string(),
            action: ChangeAction::Create,
            record: serde_json::json!({"id": "abc"}),
        });

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1.collection, "tasks");
        assert_eq!(e2.record["id"], "abc");
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = Bus::new();
        bus.publish(BroadcastEvent {
            collection: "tasks".to_string(),
            action: ChangeAction::Delete,
            record: serde_json::json!({"id": "abc"}),
        });
    }

    #[tokio::test]
    async fn per_record_ordering_matches_commit_order() {
        // events for a single record must arrive in commit order.
        let bus = Bus::new();
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(BroadcastEvent {
                collection: "tasks".to_string(),
                action: ChangeAction::Update,
                record: serde_json::json!({"id": "t1", "seq": i}),
            });
        }
        for i in 0..5 {
            let e = rx.recv().await.unwrap();
            assert_eq!(e.record["seq"], i);
        }
    }
}
