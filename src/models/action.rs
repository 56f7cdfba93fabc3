use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ActionDependency, ActionResult, ActionStatus};

/// A queued action joined with its type's handler name and its priority weight.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub action_type: String,
    pub handler_name: String,
    pub priority: String,
    pub priority_weight: i32,
    #[sqlx(try_from = "String")]
    pub status: ActionStatus,
    pub payload: serde_json::Value,
    pub target_entity_id: Option<String>,
    pub correlation_id: Option<String>,
    pub parent_action_id: Option<i64>,
    pub created_by: String,
    pub timeout_seconds: Option<i32>,
    pub max_retries: i32,
    pub retry_count: i32,
    pub backoff_factor: f64,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub execute_after: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub result_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
    pub execution_duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueuedAction {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Attempt number of the next (or current) execution.
    pub fn attempt_number(&self) -> i32 {
        self.retry_count + 1
    }

    /// True when every time window (schedule, execute-after, backoff) has opened
    /// and the deadline has not passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let opened = |at: Option<DateTime<Utc>>| at.is_none_or(|t| t <= now);
        opened(self.scheduled_at)
            && opened(self.execute_after)
            && opened(self.next_retry_at)
            && self.deadline.is_none_or(|d| d > now)
    }
}

/// An action with its dependency edges and attempt history.
#[derive(Debug, Clone, Serialize)]
pub struct ActionDetail {
    #[serde(flatten)]
    pub action: QueuedAction,
    pub dependencies: Vec<ActionDependency>,
    pub results: Vec<ActionResult>,
}

/// Fully resolved values for inserting an action.
#[derive(Debug, Clone)]
pub struct NewAction {
    pub name: String,
    pub description: Option<String>,
    pub action_type: String,
    pub priority: String,
    pub payload: serde_json::Value,
    pub target_entity_id: Option<String>,
    pub correlation_id: Option<String>,
    pub parent_action_id: Option<i64>,
    pub created_by: String,
    pub timeout_seconds: Option<i32>,
    pub max_retries: i32,
    pub backoff_factor: f64,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub execute_after: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
}

/// Operator edits applied to a non-terminal action. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct ActionPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub status: Option<ActionStatus>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub execute_after: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
}

impl ActionPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.status.is_none()
            && self.scheduled_at.is_none()
            && self.execute_after.is_none()
            && self.deadline.is_none()
    }
}

/// Final outcome written by the worker that holds the claim.
#[derive(Debug, Clone)]
pub struct Completion {
    pub status: ActionStatus,
    pub result_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
    pub duration_ms: i64,
}

/// Retry scheduled by the worker that holds the claim.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    pub next_retry_at: DateTime<Utc>,
    pub error_message: String,
    pub error_details: Option<serde_json::Value>,
    pub duration_ms: i64,
}
