use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::{parse_payload, ActionHandler, ExecutionContext, ExecutionResult, HandlerError};
use crate::control::{ControlAction, ControlExecutor};
use crate::models::QueuedAction;

const DEFAULT_CONCURRENCY: usize = 5;
const MAX_CONCURRENCY: usize = 20;
const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;
const MAX_OPERATION_TIMEOUT_SECS: u64 = 180;

#[derive(Debug, Clone, Deserialize)]
struct BulkOperation {
    entity_id: String,
    action: String,
    #[serde(default)]
    parameters: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct BulkPayload {
    operations: Vec<BulkOperation>,
    #[serde(default)]
    max_concurrent: Option<usize>,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    stop_on_error: bool,
}

struct OperationOutcome {
    index: usize,
    success: bool,
    report: Value,
}

/// Fans a list of entity operations out to the control executor.
///
/// Concurrency is bounded by a semaphore. With `stop_on_error` the first failure
/// aborts everything still in flight and those slots stay `null` in `results`.
pub struct BulkOperationHandler {
    control: Arc<dyn ControlExecutor>,
}

impl BulkOperationHandler {
    pub fn new(control: Arc<dyn ControlExecutor>) -> Self {
        Self { control }
    }
}

async fn run_operation(
    control: Arc<dyn ControlExecutor>,
    semaphore: Arc<Semaphore>,
    index: usize,
    operation: BulkOperation,
    timeout: Duration,
    description: String,
) -> OperationOutcome {
    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            return OperationOutcome {
                index,
                success: false,
                report: json!({
                    "index": index,
                    "entity_id": operation.entity_id,
                    "success": false,
                    "error": "operation pool closed",
                }),
            };
        }
    };

    let mut request = ControlAction::new(&operation.entity_id, &operation.action).from_queue(description);
    request.parameters = operation.parameters;

    let (success, detail) = match tokio::time::timeout(timeout, control.execute_action(request)).await {
        Ok(Ok(result)) if result.success => (true, json!({ "new_state": result.new_state })),
        Ok(Ok(result)) => {
            let error = result
                .error
                .map(|e| format!("{}: {}", e.code, e.message))
                .unwrap_or_else(|| "control action reported failure".to_string());
            (false, json!({ "error": error }))
        }
        Ok(Err(e)) => (false, json!({ "error": e.to_string() })),
        Err(_) => (
            false,
            json!({ "error": format!("operation timed out after {}s", timeout.as_secs()) }),
        ),
    };

    let mut report = json!({
        "index": index,
        "entity_id": operation.entity_id,
        "action": operation.action,
        "success": success,
    });
    if let (Some(fields), Value::Object(detail)) = (report.as_object_mut(), detail) {
        fields.extend(detail);
    }

    OperationOutcome { index, success, report }
}

#[async_trait]
impl ActionHandler for BulkOperationHandler {
    fn name(&self) -> &str {
        "bulk_operation"
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_secs(10 * 60)
    }

    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        action: &QueuedAction,
    ) -> Result<ExecutionResult, HandlerError> {
        let payload: BulkPayload = parse_payload(action)?;
        if payload.operations.is_empty() {
            return Err(HandlerError::invalid_payload("operations must not be empty"));
        }
        if let Some(bad) = payload.operations.iter().position(|op| op.entity_id.trim().is_empty()) {
            return Err(HandlerError::invalid_payload(format!(
                "operation {bad} is missing entity_id"
            )));
        }

        let concurrency = payload
            .max_concurrent
            .unwrap_or(DEFAULT_CONCURRENCY)
            .clamp(1, MAX_CONCURRENCY);
        let timeout = Duration::from_secs(
            payload
                .timeout
                .filter(|t| (1..=MAX_OPERATION_TIMEOUT_SECS).contains(t))
                .unwrap_or(DEFAULT_OPERATION_TIMEOUT_SECS),
        );
        let total = payload.operations.len();
        let semaphore = Arc::new(Semaphore::new(concurrency));

        let mut tasks = JoinSet::new();
        for (index, operation) in payload.operations.into_iter().enumerate() {
            tasks.spawn(run_operation(
                self.control.clone(),
                semaphore.clone(),
                index,
                operation,
                timeout,
                format!("bulk action {} operation {index}", action.id),
            ));
        }

        let mut results = vec![Value::Null; total];
        let mut success_count = 0usize;
        let mut failure_count = 0usize;
        let mut aborted = false;

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(action_id = action.id, "Bulk sub-operation task failed: {e}");
                    failure_count += 1;
                    if payload.stop_on_error {
                        tasks.abort_all();
                        aborted = true;
                        break;
                    }
                    continue;
                }
            };

            results[outcome.index] = outcome.report;
            if outcome.success {
                success_count += 1;
            } else {
                failure_count += 1;
                if payload.stop_on_error {
                    tasks.abort_all();
                    aborted = true;
                    break;
                }
            }
        }

        let success = failure_count == 0 || (!payload.stop_on_error && success_count > 0);
        let data = json!({
            "total_operations": total,
            "success_count": success_count,
            "failure_count": failure_count,
            "max_concurrent": concurrency,
            "stop_on_error": payload.stop_on_error,
            "aborted": aborted,
            "results": results,
        });

        tracing::info!(
            action_id = action.id,
            "Bulk operation finished: {success_count}/{total} succeeded"
        );

        if success {
            Ok(ExecutionResult::succeeded(data))
        } else {
            Ok(ExecutionResult::failed(
                "BULK_OPERATION_FAILED",
                format!("{failure_count} of {total} operations failed"),
                false,
                data,
            ))
        }
    }
}
