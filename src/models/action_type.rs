use serde::{Deserialize, Serialize};

/// Reference data describing how an action type is dispatched and retried.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ActionType {
    pub name: String,
    pub description: String,
    pub handler_name: String,
    pub default_timeout_seconds: i32,
    pub default_max_retries: i32,
    pub default_backoff_factor: f64,
    pub enabled: bool,
}

/// A named priority level; higher weight is claimed first.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ActionPriority {
    pub name: String,
    pub weight: i32,
    pub description: String,
}
