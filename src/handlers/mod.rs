pub mod automation;
pub mod bulk;
pub mod entity_state;
pub mod notification;
pub mod scene;
pub mod script;
pub mod service_call;
pub mod system_command;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::control::{ControlError, ControlExecutor, ControlResult};
use crate::models::QueuedAction;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Control executor error codes that will not succeed on a later attempt.
pub const NON_RETRYABLE_CODES: &[&str] = &[
    "INVALID_ACTION",
    "INVALID_TARGET",
    "INVALID_SCENE",
    "INVALID_AUTOMATION",
    "NOT_FOUND",
    "UNSUPPORTED",
];

/// Per-attempt information handed to a handler.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub worker_id: String,
    pub attempt: i32,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub data: Option<Value>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub should_retry: bool,
}

impl ExecutionResult {
    pub fn succeeded(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error_code: None,
            error_message: None,
            should_retry: false,
        }
    }

    pub fn failed(code: &str, message: impl Into<String>, should_retry: bool, data: Value) -> Self {
        Self {
            success: false,
            data: Some(data),
            error_code: Some(code.to_string()),
            error_message: Some(message.into()),
            should_retry,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct HandlerError {
    pub code: String,
    pub message: String,
    pub should_retry: bool,
    pub details: Option<Value>,
}

impl HandlerError {
    pub fn retryable(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            should_retry: true,
            details: None,
        }
    }

    pub fn terminal(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            should_retry: false,
            details: None,
        }
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::terminal("INVALID_PAYLOAD", message)
    }
}

impl From<ControlError> for HandlerError {
    fn from(err: ControlError) -> Self {
        HandlerError::retryable("CONTROL_UNAVAILABLE", err.to_string())
    }
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Registry key; matches `ActionType::handler_name`.
    fn name(&self) -> &str;

    fn default_timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        action: &QueuedAction,
    ) -> Result<ExecutionResult, HandlerError>;
}

pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with every built-in handler wired to `control`.
    pub fn with_builtins(control: Arc<dyn ControlExecutor>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(entity_state::EntityStateHandler::new(control.clone())));
        registry.register(Arc::new(service_call::ServiceCallHandler::new(control.clone())));
        registry.register(Arc::new(scene::SceneHandler::new(control.clone())));
        registry.register(Arc::new(automation::AutomationHandler::new(control.clone())));
        registry.register(Arc::new(notification::NotificationHandler::new(control.clone())));
        registry.register(Arc::new(bulk::BulkOperationHandler::new(control)));
        registry.register(Arc::new(system_command::SystemCommandHandler));
        registry.register(Arc::new(script::ScriptHandler));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        let name = handler.name().to_string();
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::warn!("Handler {name} replaced an existing registration");
        }
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Deserialize the payload into a handler's typed shape.
pub(crate) fn parse_payload<T: DeserializeOwned>(action: &QueuedAction) -> Result<T, HandlerError> {
    serde_json::from_value(action.payload.clone())
        .map_err(|e| HandlerError::invalid_payload(format!("invalid {} payload: {e}", action.action_type)))
}

pub(crate) fn require(field: &str, value: &str) -> Result<(), HandlerError> {
    if value.trim().is_empty() {
        return Err(HandlerError::invalid_payload(format!("{field} is required")));
    }
    Ok(())
}

/// Prefix `id` with `domain.` unless it already carries it.
pub(crate) fn qualify(domain: &str, id: &str) -> String {
    if id.starts_with(&format!("{domain}.")) {
        id.to_string()
    } else {
        format!("{domain}.{id}")
    }
}

/// Fold a control executor outcome into an execution result.
pub(crate) fn map_control_outcome(
    outcome: Result<ControlResult, ControlError>,
    mut data: Map<String, Value>,
) -> Result<ExecutionResult, HandlerError> {
    let result = outcome?;
    data.insert("processed_at".to_string(), Value::from(result.processed_at.to_rfc3339()));

    if result.success {
        data.insert("new_state".to_string(), result.new_state.unwrap_or(Value::Null));
        return Ok(ExecutionResult::succeeded(Value::Object(data)));
    }

    let (code, message) = match result.error {
        Some(failure) => {
            if let Some(details) = failure.details {
                data.insert("details".to_string(), details);
            }
            (failure.code, failure.message)
        }
        None => ("CONTROL_FAILED".to_string(), "control action reported failure".to_string()),
    };
    let should_retry = !NON_RETRYABLE_CODES.contains(&code.as_str());
    Ok(ExecutionResult::failed(&code, message, should_retry, Value::Object(data)))
}
