use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{
    map_control_outcome, parse_payload, require, ActionHandler, ExecutionContext,
    ExecutionResult, HandlerError,
};
use crate::control::{ControlAction, ControlExecutor};
use crate::models::QueuedAction;

#[derive(Debug, Deserialize)]
struct ServiceCallPayload {
    domain: String,
    service: String,
    #[serde(default)]
    entity_id: Option<String>,
    #[serde(default)]
    service_data: Option<Map<String, Value>>,
    #[serde(default)]
    target: Option<Value>,
}

impl ServiceCallPayload {
    fn target_entity(&self) -> String {
        self.entity_id
            .clone()
            .or_else(|| {
                self.target
                    .as_ref()
                    .and_then(|t| t.get("entity_id"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| format!("{}.{}", self.domain, self.service))
    }
}

pub struct ServiceCallHandler {
    control: Arc<dyn ControlExecutor>,
}

impl ServiceCallHandler {
    pub fn new(control: Arc<dyn ControlExecutor>) -> Self {
        Self { control }
    }
}

#[async_trait]
impl ActionHandler for ServiceCallHandler {
    fn name(&self) -> &str {
        "service_call"
    }

    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        action: &QueuedAction,
    ) -> Result<ExecutionResult, HandlerError> {
        let payload: ServiceCallPayload = parse_payload(action)?;
        require("domain", &payload.domain)?;
        require("service", &payload.service)?;

        let entity_id = payload.target_entity();
        let request = ControlAction::new(&entity_id, "call_service")
            .param("domain", payload.domain.as_str())
            .param("service", payload.service.as_str())
            .param("service_data", payload.service_data.clone().map(Value::Object))
            .param("target", payload.target.clone())
            .from_queue(format!("queued action {}", action.id));

        let mut data = Map::new();
        data.insert("domain".to_string(), Value::from(payload.domain));
        data.insert("service".to_string(), Value::from(payload.service));
        data.insert("entity_id".to_string(), Value::from(entity_id));

        map_control_outcome(self.control.execute_action(request).await, data)
    }
}
