//! Boundary to the device layer that actually changes entity state.

pub mod dry_run;
pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use dry_run::DryRunExecutor;
pub use http::HttpControlExecutor;

/// Where a control request originated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceContext {
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlAction {
    pub entity_id: String,
    pub action: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub context: Option<SourceContext>,
}

impl ControlAction {
    pub fn new(entity_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            action: action.into(),
            parameters: serde_json::Map::new(),
            context: None,
        }
    }

    /// Set a parameter, skipping JSON nulls.
    pub fn param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        let value = value.into();
        if !value.is_null() {
            self.parameters.insert(key.to_string(), value);
        }
        self
    }

    pub fn from_queue(mut self, description: impl Into<String>) -> Self {
        self.context = Some(SourceContext {
            source: "action_queue".to_string(),
            timestamp: Utc::now(),
            description: Some(description.into()),
        });
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlFailure {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResult {
    pub success: bool,
    pub new_state: Option<serde_json::Value>,
    pub error: Option<ControlFailure>,
    pub processed_at: DateTime<Utc>,
}

impl ControlResult {
    pub fn ok(new_state: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            new_state,
            error: None,
            processed_at: Utc::now(),
        }
    }

    pub fn rejected(code: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            new_state: None,
            error: Some(ControlFailure {
                code: code.to_string(),
                message: message.into(),
                details: None,
            }),
            processed_at: Utc::now(),
        }
    }
}

/// The executor could not be reached or did not answer with a usable result.
#[derive(Debug, Clone, thiserror::Error)]
#[error("control executor unavailable: {0}")]
pub struct ControlError(pub String);

#[async_trait]
pub trait ControlExecutor: Send + Sync {
    async fn execute_action(&self, action: ControlAction) -> Result<ControlResult, ControlError>;
}
