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
struct ScenePayload {
    scene_id: String,
    #[serde(default)]
    transition: Option<f64>,
}

pub struct SceneHandler {
    control: Arc<dyn ControlExecutor>,
}

impl SceneHandler {
    pub fn new(control: Arc<dyn ControlExecutor>) -> Self {
        Self { control }
    }
}

#[async_trait]
impl ActionHandler for SceneHandler {
    fn name(&self) -> &str {
        "scene"
    }

    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        action: &QueuedAction,
    ) -> Result<ExecutionResult, HandlerError> {
        let payload: ScenePayload = parse_payload(action)?;
        require("scene_id", &payload.scene_id)?;

        let entity_id = qualify("scene", &payload.scene_id);
        let request = ControlAction::new(&entity_id, "activate")
            .param("transition", payload.transition)
            .from_queue(format!("queued action {}", action.id));

        let mut data = Map::new();
        data.insert("scene_id".to_string(), Value::from(payload.scene_id));
        data.insert("entity_id".to_string(), Value::from(entity_id));

        map_control_outcome(self.control.execute_action(request).await, data)
    }
}
