use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ActionStatus;

/// Append-only audit record of one execution attempt.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ActionResult {
    pub id: i64,
    pub action_id: i64,
    pub attempt_number: i32,
    #[sqlx(try_from = "String")]
    pub status: ActionStatus,
    pub success: bool,
    pub result_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub worker_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

#[derive(Debug, Clone)]
pub struct NewActionResult {
    pub action_id: i64,
    pub attempt_number: i32,
    pub status: ActionStatus,
    pub success: bool,
    pub result_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub worker_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}
