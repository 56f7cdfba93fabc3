use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{
    map_control_outcome, parse_payload, qualify, require, ActionHandler, ExecutionContext,
    ExecutionResult, HandlerError,
};
use crate::control::{ControlAction, ControlExecutor};
use crate::models::QueuedAction;

#[derive(Debug, Deserialize)]
struct AutomationPayload {
    automation_id: String,
    #[serde(default)]
    variables: Option<Map<String, Value>>,
    #[serde(default)]
    skip_condition: bool,
}

pub struct AutomationHandler {
    control: Arc<dyn ControlExecutor>,
}

impl AutomationHandler {
    pub fn new(control: Arc<dyn ControlExecutor>) -> Self {
        Self { control }
    }
}

#[async_trait]
impl ActionHandler for AutomationHandler {
    fn name(&self) -> &str {
        "automation"
    }

    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        action: &QueuedAction,
    ) -> Result<ExecutionResult, HandlerError> {
        let payload: AutomationPayload = parse_payload(action)?;
        require("automation_id", &payload.automation_id)?;

        let entity_id = qualify("automation", &payload.automation_id);
        let request = ControlAction::new(&entity_id, "trigger")
            .param("variables", payload.variables.map(Value::Object))
            .param("skip_condition", payload.skip_condition)
            .from_queue(format!("queued action {}", action.id));

        let mut data = Map::new();
        data.insert("automation_id".to_string(), Value::from(payload.automation_id));
        data.insert("entity_id".to_string(), Value::from(entity_id));

        map_control_outcome(self.control.execute_action(request).await, data)
    }
}
