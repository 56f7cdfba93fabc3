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
struct EntityStatePayload {
    entity_id: String,
    state: Value,
    #[serde(default)]
    attributes: Option<Map<String, Value>>,
    #[serde(default)]
    transition: Option<f64>,
}

/// Sets an entity to a target state.
pub struct EntityStateHandler {
    control: Arc<dyn ControlExecutor>,
}

impl EntityStateHandler {
    pub fn new(control: Arc<dyn ControlExecutor>) -> Self {
        Self { control }
    }
}

#[async_trait]
impl ActionHandler for EntityStateHandler {
    fn name(&self) -> &str {
        "entity_state"
    }

    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        action: &QueuedAction,
    ) -> Result<ExecutionResult, HandlerError> {
        let payload: EntityStatePayload = parse_payload(action)?;
        require("entity_id", &payload.entity_id)?;
        if payload.state.is_null() {
            return Err(HandlerError::invalid_payload("state is required"));
        }

        let request = ControlAction::new(&payload.entity_id, "set_state")
            .param("state", payload.state.clone())
            .param("attributes", payload.attributes.map(Value::Object))
            .param("transition", payload.transition)
            .from_queue(format!("queued action {}", action.id));

        let mut data = Map::new();
        data.insert("entity_id".to_string(), Value::from(payload.entity_id));
        data.insert("state".to_string(), payload.state);

        map_control_outcome(self.control.execute_action(request).await, data)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::handlers::testing::{action, context, ScriptedExecutor};

    #[tokio::test]
    async fn sets_state_through_control_executor() {
        let control = Arc::new(ScriptedExecutor::default());
        let handler = EntityStateHandler::new(control.clone());

        let result = handler
            .execute(
                &context(),
                &action("entity_state_change", json!({ "entity_id": "light.kitchen", "state": "on", "transition": 2.0 })),
            )
            .await
            .unwrap();

        assert!(result.success);
        let calls = control.calls();
        assert_eq!(calls[0].action, "set_state");
        assert_eq!(calls[0].parameters["state"], json!("on"));
        assert_eq!(calls[0].parameters["transition"], json!(2.0));
        assert!(!calls[0].parameters.contains_key("attributes"));
    }

    #[tokio::test]
    async fn missing_state_is_not_retried() {
        let handler = EntityStateHandler::new(Arc::new(ScriptedExecutor::default()));
        let err = handler
            .execute(&context(), &action("entity_state_change", json!({ "entity_id": "light.kitchen" })))
            .await
            .unwrap_err();
        assert_eq!(err.code, "INVALID_PAYLOAD");
        assert!(!err.should_retry);
    }

    #[tokio::test]
    async fn transport_failure_is_retried() {
        let handler = EntityStateHandler::new(Arc::new(ScriptedExecutor::default()));
        let err = handler
            .execute(
                &context(),
                &action("entity_state_change", json!({ "entity_id": "offline.lamp", "state": "off" })),
            )
            .await
            .unwrap_err();
        assert!(err.should_retry);
    }
}
