//! Lifecycle notifications for queued actions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::models::{ActionStatus, QueuedAction};

pub const QUEUE_TOPIC: &str = "queue_notifications";

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct QueueEvent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub event: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl QueueEvent {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            kind: "queue_event",
            event: event.to_string(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Outbound sink for queue events. Delivery is fire-and-forget.
pub trait Notifier: Send + Sync {
    fn publish(&self, topic: &str, event: &QueueEvent);
}

/// In-process topic fan-out over tokio broadcast channels.
#[derive(Default)]
pub struct EventHub {
    topics: DashMap<String, broadcast::Sender<QueueEvent>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<QueueEvent> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

impl Notifier for EventHub {
    fn publish(&self, topic: &str, event: &QueueEvent) {
        let Some(sender) = self.topics.get(topic) else {
            tracing::debug!("No subscribers on {topic}, dropping {}", event.event);
            return;
        };
        if sender.send(event.clone()).is_err() {
            tracing::debug!("All subscribers on {topic} are gone, dropping {}", event.event);
        }
    }
}

/// Typed publisher for the queue topic.
#[derive(Clone)]
pub struct QueueEvents {
    notifier: Arc<dyn Notifier>,
}

impl QueueEvents {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    fn emit(&self, event: &str, data: Value) {
        self.notifier.publish(QUEUE_TOPIC, &QueueEvent::new(event, data));
    }

    pub fn action_queued(&self, action: &QueuedAction) {
        self.emit(
            "action_queued",
            json!({
                "action_id": action.id,
                "name": action.name,
                "action_type": action.action_type,
                "priority": action.priority,
                "correlation_id": action.correlation_id,
            }),
        );
    }

    pub fn action_updated(&self, action: &QueuedAction) {
        self.emit(
            "action_updated",
            json!({ "action_id": action.id, "status": action.status }),
        );
    }

    pub fn action_cancelled(&self, id: i64) {
        self.emit("action_cancelled", json!({ "action_id": id }));
    }

    pub fn action_deleted(&self, id: i64) {
        self.emit("action_deleted", json!({ "action_id": id }));
    }

    pub fn action_status_changed(&self, id: i64, old: ActionStatus, new: ActionStatus) {
        self.emit(
            "action_status_changed",
            json!({ "action_id": id, "old_status": old, "new_status": new }),
        );
    }

    pub fn queue_cleared(&self, deleted: u64) {
        self.emit("queue_cleared", json!({ "deleted_count": deleted }));
    }

    pub fn actions_cleaned(&self, deleted: u64) {
        self.emit("actions_cleaned", json!({ "deleted_count": deleted }));
    }
}
