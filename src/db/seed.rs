//! Reference data shared by the in-memory store and the initial migration.

use chrono::Utc;

use crate::models::setting::{
    COMPLETED_RETENTION_DAYS, DEAD_LETTER_RETENTION_DAYS, MAX_CONCURRENT_WORKERS,
    SCHEMA_VERSION, WORKER_POLL_INTERVAL_MS,
};
use crate::models::{ActionPriority, ActionType, QueueSetting};

pub const DEFAULT_PRIORITY: &str = "normal";

pub fn action_types() -> Vec<ActionType> {
    [
        ("entity_state_change", "Change the state of an entity", "entity_state", 30),
        ("service_call", "Call a domain service", "service_call", 30),
        ("scene_activation", "Activate a scene", "scene", 30),
        ("automation_trigger", "Trigger an automation", "automation", 30),
        ("system_command", "Run an allow-listed system command", "system_command", 300),
        ("script_execution", "Run an allow-listed script", "script", 600),
        ("notification_send", "Send a notification", "notification", 30),
        ("bulk_operation", "Fan out operations across entities", "bulk_operation", 600),
    ]
    .into_iter()
    .map(|(name, description, handler, timeout)| ActionType {
        name: name.to_string(),
        description: description.to_string(),
        handler_name: handler.to_string(),
        default_timeout_seconds: timeout,
        default_max_retries: 3,
        default_backoff_factor: 2.0,
        enabled: true,
    })
    .collect()
}

pub fn priorities() -> Vec<ActionPriority> {
    [
        ("low", 1, "Background work"),
        ("normal", 5, "Default priority"),
        ("high", 10, "User-facing work"),
        ("urgent", 15, "Time-sensitive work"),
        ("critical", 20, "Safety and security actions"),
    ]
    .into_iter()
    .map(|(name, weight, description)| ActionPriority {
        name: name.to_string(),
        weight,
        description: description.to_string(),
    })
    .collect()
}

pub fn settings() -> Vec<QueueSetting> {
    let now = Utc::now();
    [
        (MAX_CONCURRENT_WORKERS, "5", "Worker tasks started by the processor (restart required)", false),
        (WORKER_POLL_INTERVAL_MS, "1000", "Delay between worker polls in milliseconds", false),
        (COMPLETED_RETENTION_DAYS, "30", "Days to keep completed actions", false),
        (DEAD_LETTER_RETENTION_DAYS, "7", "Days to keep failed, cancelled and timed out actions", false),
        (SCHEMA_VERSION, "1", "Queue schema version", true),
    ]
    .into_iter()
    .map(|(key, value, description, is_readonly)| QueueSetting {
        key: key.to_string(),
        value: value.to_string(),
        value_type: "integer".to_string(),
        description: description.to_string(),
        is_readonly,
        updated_at: now,
    })
    .collect()
}
