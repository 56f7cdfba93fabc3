use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::retry::backoff_delay;
use crate::db::{ActionStore, StoreError};
use crate::events::QueueEvents;
use crate::handlers::{ExecutionContext, ExecutionResult, HandlerError, HandlerRegistry};
use crate::models::{ActionStatus, Completion, NewActionResult, QueuedAction, RetrySchedule};

const FALLBACK_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// What happened to a claimed action after one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Retrying { next_retry_at: DateTime<Utc> },
    Failed,
    /// The claim was lost (cancelled or expired) before the outcome could be written.
    Discarded,
}

impl Outcome {
    fn status(&self) -> ActionStatus {
        match self {
            Outcome::Completed => ActionStatus::Completed,
            Outcome::Retrying { .. } => ActionStatus::Retrying,
            Outcome::Failed | Outcome::Discarded => ActionStatus::Failed,
        }
    }
}

struct Failure {
    code: String,
    message: String,
    should_retry: bool,
    data: Option<Value>,
    details: Option<Value>,
}

impl From<HandlerError> for Failure {
    fn from(err: HandlerError) -> Self {
        Failure {
            code: err.code,
            message: err.message,
            should_retry: err.should_retry,
            data: None,
            details: err.details,
        }
    }
}

/// Runs claimed actions through their handlers and records the outcome.
pub struct Dispatcher {
    store: Arc<dyn ActionStore>,
    registry: Arc<HandlerRegistry>,
    events: QueueEvents,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn ActionStore>, registry: Arc<HandlerRegistry>, events: QueueEvents) -> Self {
        Self {
            store,
            registry,
            events,
        }
    }

    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<QueuedAction>, StoreError> {
        let claimed = self.store.claim_next(worker_id, Utc::now()).await?;
        if let Some(action) = &claimed {
            self.events
                .action_status_changed(action.id, status_before_claim(action), ActionStatus::Processing);
        }
        Ok(claimed)
    }

    pub async fn claim(&self, id: i64, worker_id: &str) -> Result<Option<QueuedAction>, StoreError> {
        let claimed = self.store.claim(id, worker_id, Utc::now()).await?;
        if let Some(action) = &claimed {
            self.events
                .action_status_changed(action.id, status_before_claim(action), ActionStatus::Processing);
        }
        Ok(claimed)
    }

    /// Execute one attempt of an action this worker has claimed.
    pub async fn execute(&self, action: &QueuedAction, worker_id: &str) -> Result<Outcome, StoreError> {
        let started_at = Utc::now();
        let clock = Instant::now();

        let attempt = match self.registry.resolve(&action.handler_name) {
            Some(handler) => {
                let timeout = action_timeout(action).unwrap_or_else(|| handler.default_timeout());
                let ctx = ExecutionContext {
                    worker_id: worker_id.to_string(),
                    attempt: action.attempt_number(),
                    started_at,
                };

                tracing::debug!(
                    action_id = action.id,
                    worker_id,
                    "Executing {} with handler {} (attempt {})",
                    action.action_type,
                    action.handler_name,
                    ctx.attempt
                );

                match tokio::time::timeout(timeout, handler.execute(&ctx, action)).await {
                    Ok(result) => result,
                    Err(_) => Err(HandlerError::retryable(
                        "HANDLER_TIMEOUT",
                        format!("handler timed out after {}s", timeout.as_secs()),
                    )),
                }
            }
            None => {
                tracing::error!(action_id = action.id, "No handler registered for {}", action.handler_name);
                Err(HandlerError::terminal(
                    "HANDLER_NOT_REGISTERED",
                    format!("handler not registered: {}", action.handler_name),
                ))
            }
        };

        let attempt: Result<Option<Value>, Failure> = match attempt {
            Ok(ExecutionResult { success: true, data, .. }) => Ok(data),
            Ok(result) => Err(Failure {
                code: result.error_code.unwrap_or_else(|| "EXECUTION_FAILED".to_string()),
                message: result
                    .error_message
                    .unwrap_or_else(|| "handler reported failure".to_string()),
                should_retry: result.should_retry,
                data: result.data,
                details: None,
            }),
            Err(err) => Err(err.into()),
        };

        let duration_ms = clock.elapsed().as_millis() as i64;
        match self.record(action, worker_id, started_at, duration_ms, attempt).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.release(action, worker_id).await;
                Err(e)
            }
        }
    }

    /// Upper bound on one attempt of `action`, used to age out abandoned claims.
    pub fn attempt_timeout(&self, action: &QueuedAction) -> Duration {
        action_timeout(action)
            .or_else(|| self.registry.resolve(&action.handler_name).map(|h| h.default_timeout()))
            .unwrap_or(FALLBACK_ATTEMPT_TIMEOUT)
    }

    /// Put a claim this worker can no longer finish back in the queue.
    async fn release(&self, action: &QueuedAction, worker_id: &str) {
        match self.store.release_claim(action.id, worker_id, Utc::now()).await {
            Ok(true) => {
                tracing::warn!(action_id = action.id, worker_id, "Outcome write failed, claim released");
                self.events
                    .action_status_changed(action.id, ActionStatus::Processing, status_before_claim(action));
            }
            Ok(false) => {}
            Err(e) => tracing::error!(action_id = action.id, worker_id, "Failed to release claim: {e}"),
        }
    }

    async fn record(
        &self,
        action: &QueuedAction,
        worker_id: &str,
        started_at: DateTime<Utc>,
        duration_ms: i64,
        attempt: Result<Option<Value>, Failure>,
    ) -> Result<Outcome, StoreError> {
        let now = Utc::now();

        let (outcome, written, result_data, error) = match attempt {
            Ok(data) => {
                let completion = Completion {
                    status: ActionStatus::Completed,
                    result_data: data.clone(),
                    error_message: None,
                    error_details: None,
                    duration_ms,
                };
                let written = self.store.complete(action.id, worker_id, &completion, now).await?;
                (Outcome::Completed, written, data, None)
            }
            Err(failure) if failure.should_retry && action.retry_count < action.max_retries => {
                let next_retry_at = now + backoff_delay(action.backoff_factor, action.retry_count);
                let retry = RetrySchedule {
                    next_retry_at,
                    error_message: failure.message.clone(),
                    error_details: error_details(&failure),
                    duration_ms,
                };
                let written = self.store.schedule_retry(action.id, worker_id, &retry, now).await?;
                tracing::info!(
                    action_id = action.id,
                    "Attempt {} failed ({}), retrying at {next_retry_at}",
                    action.attempt_number(),
                    failure.code
                );
                (Outcome::Retrying { next_retry_at }, written, failure.data.clone(), Some(failure))
            }
            Err(failure) => {
                let completion = Completion {
                    status: ActionStatus::Failed,
                    result_data: failure.data.clone(),
                    error_message: Some(failure.message.clone()),
                    error_details: error_details(&failure),
                    duration_ms,
                };
                let written = self.store.complete(action.id, worker_id, &completion, now).await?;
                tracing::warn!(
                    action_id = action.id,
                    "Action failed after attempt {}: {}",
                    action.attempt_number(),
                    failure.message
                );
                (Outcome::Failed, written, failure.data.clone(), Some(failure))
            }
        };

        self.store
            .insert_result(NewActionResult {
                action_id: action.id,
                attempt_number: action.attempt_number(),
                status: outcome.status(),
                success: error.is_none(),
                result_data,
                error_message: error.as_ref().map(|f| f.message.clone()),
                error_code: error.as_ref().map(|f| f.code.clone()),
                worker_id: worker_id.to_string(),
                started_at,
                completed_at: now,
                duration_ms,
            })
            .await?;

        if !written {
            tracing::warn!(
                action_id = action.id,
                worker_id,
                "Claim lost before the outcome was written, discarding late result"
            );
            return Ok(Outcome::Discarded);
        }

        self.events
            .action_status_changed(action.id, ActionStatus::Processing, outcome.status());
        Ok(outcome)
    }
}

fn error_details(failure: &Failure) -> Option<Value> {
    Some(json!({
        "code": failure.code,
        "should_retry": failure.should_retry,
        "details": failure.details,
    }))
}

fn action_timeout(action: &QueuedAction) -> Option<Duration> {
    action
        .timeout_seconds
        .filter(|secs| *secs > 0)
        .map(|secs| Duration::from_secs(secs as u64))
}

/// Status a freshly claimed action held before the claim. Only retries carry a backoff.
pub(super) fn status_before_claim(action: &QueuedAction) -> ActionStatus {
    if action.next_retry_at.is_some() {
        ActionStatus::Retrying
    } else {
        ActionStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::TimeDelta;
    use serde_json::json;

    use super::*;
    use crate::db::testing::FlakyStore;
    use crate::db::MemoryStore;
    use crate::events::EventHub;
    use crate::handlers::testing::ScriptedExecutor;
    use crate::handlers::ActionHandler;
    use crate::models::{ActionType, NewAction};

    struct SleepyHandler;

    #[async_trait]
    impl ActionHandler for SleepyHandler {
        fn name(&self) -> &str {
            "sleepy"
        }

        async fn execute(
            &self,
            _ctx: &ExecutionContext,
            _action: &QueuedAction,
        ) -> Result<ExecutionResult, HandlerError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ExecutionResult::succeeded(Value::Null))
        }
    }

    fn setup() -> (Arc<MemoryStore>, Dispatcher) {
        let store = Arc::new(MemoryStore::new());
        let mut registry = HandlerRegistry::with_builtins(Arc::new(ScriptedExecutor::default()));
        registry.register(Arc::new(SleepyHandler));
        let events = QueueEvents::new(Arc::new(EventHub::new()));
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(registry), events);
        (store, dispatcher)
    }

    fn new_action(action_type: &str, payload: Value, max_retries: i32) -> NewAction {
        NewAction {
            name: "test".to_string(),
            description: None,
            action_type: action_type.to_string(),
            priority: "normal".to_string(),
            payload,
            target_entity_id: None,
            correlation_id: None,
            parent_action_id: None,
            created_by: "system".to_string(),
            timeout_seconds: None,
            max_retries,
            backoff_factor: 2.0,
            scheduled_at: None,
            execute_after: None,
            deadline: None,
        }
    }

    fn custom_type(name: &str, handler: &str) -> ActionType {
        ActionType {
            name: name.to_string(),
            description: String::new(),
            handler_name: handler.to_string(),
            default_timeout_seconds: 30,
            default_max_retries: 3,
            default_backoff_factor: 2.0,
            enabled: true,
        }
    }

    /// Claim ignoring backoff by pretending the clock has moved on.
    async fn claim_later(store: &MemoryStore, id: i64) -> QueuedAction {
        store
            .claim(id, "worker-1", Utc::now() + TimeDelta::hours(1))
            .await
            .unwrap()
            .expect("action should be claimable")
    }

    #[tokio::test]
    async fn success_completes_and_records_attempt() {
        let (store, dispatcher) = setup();
        let payload = json!({ "entity_id": "light.kitchen", "state": "on" });
        let id = store
            .insert_action(new_action("entity_state_change", payload, 3), &[])
            .await
            .unwrap()
            .id;

        let action = dispatcher.claim_next("worker-1").await.unwrap().unwrap();
        assert_eq!(action.id, id);
        assert_eq!(dispatcher.execute(&action, "worker-1").await.unwrap(), Outcome::Completed);

        let stored = store.get_action(id).await.unwrap().unwrap();
        assert_eq!(stored.status, ActionStatus::Completed);
        assert_eq!(stored.result_data.unwrap()["new_state"], json!("on"));

        let results = store.results_for(id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(results[0].attempt_number, 1);
    }

    #[tokio::test]
    async fn retries_exactly_max_retries_times_with_backoff() {
        let (store, dispatcher) = setup();
        let payload = json!({ "entity_id": "busy.lamp", "state": "on" });
        let id = store
            .insert_action(new_action("entity_state_change", payload, 2), &[])
            .await
            .unwrap()
            .id;

        let mut delays = Vec::new();
        for _ in 0..2 {
            let action = claim_later(&store, id).await;
            let before = Utc::now();
            match dispatcher.execute(&action, "worker-1").await.unwrap() {
                Outcome::Retrying { next_retry_at } => delays.push((next_retry_at - before).num_milliseconds()),
                other => panic!("expected a retry, got {other:?}"),
            }
        }
        let action = claim_later(&store, id).await;
        assert_eq!(dispatcher.execute(&action, "worker-1").await.unwrap(), Outcome::Failed);

        assert!((1000..1500).contains(&delays[0]), "first delay {}", delays[0]);
        assert!((2000..2500).contains(&delays[1]), "second delay {}", delays[1]);

        let stored = store.get_action(id).await.unwrap().unwrap();
        assert_eq!(stored.status, ActionStatus::Failed);
        assert_eq!(stored.retry_count, 2);
        assert_eq!(stored.error_message.as_deref(), Some("try again"));

        let results = store.results_for(id).await.unwrap();
        let statuses: Vec<_> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![ActionStatus::Retrying, ActionStatus::Retrying, ActionStatus::Failed]
        );
        let attempts: Vec<_> = results.iter().map(|r| r.attempt_number).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn non_retryable_failure_fails_immediately() {
        let (store, dispatcher) = setup();
        let id = store
            .insert_action(new_action("entity_state_change", json!({ "entity_id": "invalid.x", "state": "on" }), 3), &[])
            .await
            .unwrap()
            .id;

        let action = dispatcher.claim_next("worker-1").await.unwrap().unwrap();
        assert_eq!(dispatcher.execute(&action, "worker-1").await.unwrap(), Outcome::Failed);
        let results = store.results_for(id).await.unwrap();
        assert_eq!(results[0].error_code.as_deref(), Some("INVALID_TARGET"));
    }

    #[tokio::test]
    async fn unregistered_handler_fails_without_retry() {
        let (store, dispatcher) = setup();
        store.upsert_action_type(custom_type("custom", "missing")).await;
        let id = store
            .insert_action(new_action("custom", json!({}), 3), &[])
            .await
            .unwrap()
            .id;

        let action = dispatcher.claim_next("worker-1").await.unwrap().unwrap();
        assert_eq!(dispatcher.execute(&action, "worker-1").await.unwrap(), Outcome::Failed);

        let stored = store.get_action(id).await.unwrap().unwrap();
        assert_eq!(stored.status, ActionStatus::Failed);
        assert_eq!(stored.retry_count, 0);
        let results = store.results_for(id).await.unwrap();
        assert!(!results[0].success);
        assert_eq!(results[0].error_code.as_deref(), Some("HANDLER_NOT_REGISTERED"));
    }

    #[tokio::test]
    async fn handler_timeout_is_retryable() {
        let (store, dispatcher) = setup();
        store.upsert_action_type(custom_type("slow", "sleepy")).await;
        let mut new = new_action("slow", json!({}), 1);
        new.timeout_seconds = Some(1);
        let id = store.insert_action(new, &[]).await.unwrap().id;

        let action = dispatcher.claim_next("worker-1").await.unwrap().unwrap();
        let outcome = dispatcher.execute(&action, "worker-1").await.unwrap();
        assert!(matches!(outcome, Outcome::Retrying { .. }));

        let results = store.results_for(id).await.unwrap();
        assert_eq!(results[0].error_code.as_deref(), Some("HANDLER_TIMEOUT"));
    }

    #[tokio::test]
    async fn failed_outcome_write_returns_the_action_to_the_queue() {
        let store = Arc::new(FlakyStore::failing_completions(1));
        let registry = HandlerRegistry::with_builtins(Arc::new(ScriptedExecutor::default()));
        let events = QueueEvents::new(Arc::new(EventHub::new()));
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(registry), events);
        let id = store
            .insert_action(
                new_action("scene_activation", json!({ "scene_id": "evening" }), 3),
                &[],
            )
            .await
            .unwrap()
            .id;

        let action = dispatcher.claim_next("worker-1").await.unwrap().unwrap();
        assert!(dispatcher.execute(&action, "worker-1").await.is_err());

        let stored = store.get_action(id).await.unwrap().unwrap();
        assert_eq!(stored.status, ActionStatus::Pending);
        assert!(stored.claimed_by.is_none());
        assert_eq!(stored.retry_count, 0);

        let action = dispatcher.claim_next("worker-2").await.unwrap().unwrap();
        assert_eq!(dispatcher.execute(&action, "worker-2").await.unwrap(), Outcome::Completed);
    }

    #[tokio::test]
    async fn cancelled_while_processing_stays_cancelled() {
        let (store, dispatcher) = setup();
        let id = store
            .insert_action(
                new_action("scene_activation", json!({ "scene_id": "evening" }), 3),
                &[],
            )
            .await
            .unwrap()
            .id;

        let action = dispatcher.claim_next("worker-1").await.unwrap().unwrap();
        store
            .transition(id, &ActionStatus::ACTIVE, ActionStatus::Cancelled, None, Utc::now())
            .await
            .unwrap();

        assert_eq!(dispatcher.execute(&action, "worker-1").await.unwrap(), Outcome::Discarded);
        let stored = store.get_action(id).await.unwrap().unwrap();
        assert_eq!(stored.status, ActionStatus::Cancelled);
        assert_eq!(store.results_for(id).await.unwrap().len(), 1);
    }
}
