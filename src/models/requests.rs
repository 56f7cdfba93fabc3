use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ActionStatus, NewDependency, QueuedAction};

pub const DEFAULT_LIST_LIMIT: i64 = 100;
pub const MAX_LIST_LIMIT: i64 = 1000;
pub const DEFAULT_MANUAL_BATCH: i64 = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateActionRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(alias = "type")]
    pub action_type: String,
    pub priority: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub target_entity_id: Option<String>,
    pub correlation_id: Option<String>,
    pub parent_action_id: Option<i64>,
    pub timeout_seconds: Option<i32>,
    pub max_retries: Option<i32>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub execute_after: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dependencies: Vec<NewDependency>,
}

impl CreateActionRequest {
    pub fn new(action_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: None,
            description: None,
            action_type: action_type.into(),
            priority: None,
            payload,
            target_entity_id: None,
            correlation_id: None,
            parent_action_id: None,
            timeout_seconds: None,
            max_retries: None,
            scheduled_at: None,
            execute_after: None,
            deadline: None,
            dependencies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkActionRequest {
    pub actions: Vec<CreateActionRequest>,
    pub priority: Option<String>,
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub sequential: bool,
    #[serde(default)]
    pub stop_on_error: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkFailure {
    pub index: usize,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkEnqueueResult {
    pub correlation_id: String,
    pub actions: Vec<QueuedAction>,
    pub failures: Vec<BulkFailure>,
    pub aborted: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateActionRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub status: Option<ActionStatus>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub execute_after: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessRequest {
    #[serde(default)]
    pub action_ids: Vec<i64>,
    pub priority: Option<String>,
    pub action_type: Option<String>,
    pub max_actions: Option<i64>,
    #[serde(default)]
    pub force_retry: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessSummary {
    pub examined: usize,
    pub executed: usize,
    pub completed: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClearRequest {
    #[serde(default)]
    pub status: Vec<ActionStatus>,
    pub older_than: Option<DateTime<Utc>>,
    pub action_type: Option<String>,
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub confirm_clear: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    #[default]
    CreatedAt,
    Priority,
    ScheduledAt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone)]
pub struct QueueFilter {
    pub status: Vec<ActionStatus>,
    pub priority: Vec<String>,
    pub action_type: Vec<String>,
    pub correlation_id: Option<String>,
    pub target_entity_id: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
    pub order_by: OrderBy,
    pub order_direction: OrderDirection,
}

impl Default for QueueFilter {
    fn default() -> Self {
        Self {
            status: Vec::new(),
            priority: Vec::new(),
            action_type: Vec::new(),
            correlation_id: None,
            target_entity_id: None,
            created_after: None,
            created_before: None,
            limit: DEFAULT_LIST_LIMIT,
            offset: 0,
            order_by: OrderBy::default(),
            order_direction: OrderDirection::default(),
        }
    }
}

impl QueueFilter {
    /// Clamp paging to sane bounds.
    pub fn normalized(mut self) -> Self {
        if self.limit <= 0 {
            self.limit = DEFAULT_LIST_LIMIT;
        }
        self.limit = self.limit.min(MAX_LIST_LIMIT);
        self.offset = self.offset.max(0);
        self
    }

    pub fn matches(&self, action: &QueuedAction) -> bool {
        (self.status.is_empty() || self.status.contains(&action.status))
            && (self.priority.is_empty() || self.priority.contains(&action.priority))
            && (self.action_type.is_empty() || self.action_type.contains(&action.action_type))
            && self
                .correlation_id
                .as_ref()
                .is_none_or(|c| action.correlation_id.as_ref() == Some(c))
            && self
                .target_entity_id
                .as_ref()
                .is_none_or(|t| action.target_entity_id.as_ref() == Some(t))
            && self.created_after.is_none_or(|t| action.created_at >= t)
            && self.created_before.is_none_or(|t| action.created_at <= t)
    }
}
