use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_CONCURRENT_WORKERS: &str = "max_concurrent_workers";
pub const WORKER_POLL_INTERVAL_MS: &str = "worker_poll_interval_ms";
pub const COMPLETED_RETENTION_DAYS: &str = "completed_action_retention_days";
pub const DEAD_LETTER_RETENTION_DAYS: &str = "dead_letter_retention_days";
pub const SCHEMA_VERSION: &str = "schema_version";

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct QueueSetting {
    pub key: String,
    pub value: String,
    pub value_type: String,
    pub description: String,
    pub is_readonly: bool,
    pub updated_at: DateTime<Utc>,
}

impl QueueSetting {
    pub fn as_i64(&self) -> Option<i64> {
        self.value.trim().parse().ok()
    }
}
