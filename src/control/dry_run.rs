use async_trait::async_trait;

use super::{ControlAction, ControlError, ControlExecutor, ControlResult};

/// Logs every request and reports success without touching any device.
#[derive(Debug, Default)]
pub struct DryRunExecutor;

#[async_trait]
impl ControlExecutor for DryRunExecutor {
    async fn execute_action(&self, action: ControlAction) -> Result<ControlResult, ControlError> {
        tracing::info!(
            entity_id = %action.entity_id,
            action = %action.action,
            "Dry-run control action"
        );
        Ok(ControlResult::ok(None))
    }
}
