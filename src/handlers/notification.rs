use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{
    map_control_outcome, parse_payload, qualify, require, ActionHandler, ExecutionContext,
    ExecutionResult, HandlerError,
};
use crate::control::{ControlAction, ControlExecutor};
use crate::models::QueuedAction;

#[derive(Debug, Deserialize)]
struct NotificationPayload {
    message: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

pub struct NotificationHandler {
    control: Arc<dyn ControlExecutor>,
}

impl NotificationHandler {
    pub fn new(control: Arc<dyn ControlExecutor>) -> Self {
        Self { control }
    }
}

#[async_trait]
impl ActionHandler for NotificationHandler {
    fn name(&self) -> &str {
        "notification"
    }

    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        action: &QueuedAction,
    ) -> Result<ExecutionResult, HandlerError> {
        let payload: NotificationPayload = parse_payload(action)?;
        require("message", &payload.message)?;

        let notification_id = format!("notif_{}", Uuid::now_v7().simple());
        let target = payload.target.as_deref().unwrap_or("default");
        let request = ControlAction::new(qualify("notify", target), "send_notification")
            .param("notification_id", notification_id.as_str())
            .param("message", payload.message.as_str())
            .param("title", payload.title.clone())
            .param("priority", payload.priority.clone())
            .param("data", payload.data)
            .from_queue(format!("queued action {}", action.id));

        let mut data = Map::new();
        data.insert("notification_id".to_string(), Value::from(notification_id));
        data.insert("message".to_string(), Value::from(payload.message));
        data.insert("title".to_string(), payload.title.map(Value::from).unwrap_or(Value::Null));
        data.insert("target".to_string(), Value::from(target));

        map_control_outcome(self.control.execute_action(request).await, data)
    }
}
