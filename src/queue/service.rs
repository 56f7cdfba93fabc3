use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::settings::{self, RuntimeSettings, SettingUpdate, SettingsReport};
use super::{validation, Processor, QueueError};
use crate::db::seed::DEFAULT_PRIORITY;
use crate::db::ActionStore;
use crate::events::{EventHub, QueueEvent, QueueEvents, QUEUE_TOPIC};
use crate::handlers::HandlerRegistry;
use crate::models::setting::{COMPLETED_RETENTION_DAYS, DEAD_LETTER_RETENTION_DAYS};
use crate::models::{
    ActionDependency, ActionDetail, ActionPatch, ActionPriority, ActionStatus, ActionType,
    BulkActionRequest, BulkEnqueueResult, BulkFailure, ClearRequest, CreateActionRequest,
    DependencyType, NewAction, NewDependency, ProcessRequest, ProcessSummary, QueueFilter,
    QueueHealth, QueueSetting, QueueStatistics, QueuedAction, UpdateActionRequest, WorkerState,
};

const DEFAULT_COMPLETED_RETENTION_DAYS: i64 = 30;
const DEFAULT_DEAD_LETTER_RETENTION_DAYS: i64 = 7;
const MAX_RETENTION_DAYS: i64 = 3650;

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub processor_running: bool,
    pub queue_health: QueueHealth,
    pub pending_actions: i64,
    pub processing_actions: i64,
    pub active_workers: usize,
}

/// Entry point for everything outside the worker pool.
pub struct QueueService {
    store: Arc<dyn ActionStore>,
    processor: Processor,
    events: QueueEvents,
    hub: Arc<EventHub>,
}

impl QueueService {
    pub fn new(
        store: Arc<dyn ActionStore>,
        registry: HandlerRegistry,
        hub: Arc<EventHub>,
        settings: RuntimeSettings,
    ) -> Self {
        let events = QueueEvents::new(hub.clone());
        let processor = Processor::new(store.clone(), Arc::new(registry), events.clone(), settings);
        Self {
            store,
            processor,
            events,
            hub,
        }
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    pub async fn start(&self) -> Result<(), QueueError> {
        self.processor.start().await
    }

    pub async fn stop(&self) {
        self.processor.stop().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.hub.subscribe(QUEUE_TOPIC)
    }

    pub async fn enqueue_action(
        &self,
        request: CreateActionRequest,
        actor: Option<&str>,
    ) -> Result<QueuedAction, QueueError> {
        let now = Utc::now();
        validation::validate_request(&request, now).map_err(QueueError::Validation)?;

        let action_type = self
            .store
            .action_type(&request.action_type)
            .await?
            .filter(|t| t.enabled)
            .ok_or_else(|| {
                QueueError::Validation(format!(
                    "unknown or disabled action type: {}",
                    request.action_type
                ))
            })?;

        let priority = request
            .priority
            .clone()
            .unwrap_or_else(|| DEFAULT_PRIORITY.to_string());
        if self.store.priority(&priority).await?.is_none() {
            return Err(QueueError::Validation(format!("unknown priority: {priority}")));
        }

        for dependency in &request.dependencies {
            self.require_existing(dependency.depends_on_action_id, "dependency").await?;
        }
        if let Some(parent) = request.parent_action_id {
            self.require_existing(parent, "parent action").await?;
        }

        let target_entity_id = request.target_entity_id.clone().or_else(|| {
            request
                .payload
                .get("entity_id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        });

        let action = NewAction {
            name: request
                .name
                .unwrap_or_else(|| action_type.name.replace('_', " ")),
            description: request.description,
            action_type: action_type.name.clone(),
            priority,
            payload: request.payload,
            target_entity_id,
            correlation_id: request.correlation_id,
            parent_action_id: request.parent_action_id,
            created_by: actor.unwrap_or("system").to_string(),
            timeout_seconds: Some(
                request
                    .timeout_seconds
                    .unwrap_or(action_type.default_timeout_seconds),
            ),
            max_retries: request.max_retries.unwrap_or(action_type.default_max_retries),
            backoff_factor: action_type.default_backoff_factor,
            scheduled_at: request.scheduled_at,
            execute_after: request.execute_after,
            deadline: request.deadline,
        };

        let created = self.store.insert_action(action, &request.dependencies).await?;
        tracing::info!(
            action_id = created.id,
            "Queued {} action with {} priority",
            created.action_type,
            created.priority
        );
        self.events.action_queued(&created);
        Ok(created)
    }

    async fn require_existing(&self, id: i64, what: &str) -> Result<(), QueueError> {
        match self.store.get_action(id).await? {
            Some(_) => Ok(()),
            None => Err(QueueError::Validation(format!("{what} {id} does not exist"))),
        }
    }

    pub async fn enqueue_bulk(
        &self,
        request: BulkActionRequest,
        actor: Option<&str>,
    ) -> Result<BulkEnqueueResult, QueueError> {
        if request.actions.is_empty() {
            return Err(QueueError::Validation("actions must not be empty".to_string()));
        }

        let correlation_id = request
            .correlation_id
            .unwrap_or_else(|| format!("bulk_{}", Uuid::now_v7()));
        let mut result = BulkEnqueueResult {
            correlation_id: correlation_id.clone(),
            actions: Vec::new(),
            failures: Vec::new(),
            aborted: false,
        };
        let mut previous: Option<i64> = None;

        for (index, mut item) in request.actions.into_iter().enumerate() {
            if let Some(priority) = &request.priority {
                item.priority = Some(priority.clone());
            }
            item.correlation_id = Some(correlation_id.clone());
            if let (true, Some(previous)) = (request.sequential, previous) {
                item.dependencies.push(NewDependency {
                    depends_on_action_id: previous,
                    dependency_type: DependencyType::Completion,
                });
            }

            match self.enqueue_action(item, actor).await {
                Ok(action) => {
                    previous = Some(action.id);
                    result.actions.push(action);
                }
                Err(QueueError::Store(e)) => return Err(e.into()),
                Err(e) => {
                    tracing::warn!("Bulk item {index} rejected: {e}");
                    result.failures.push(BulkFailure {
                        index,
                        error: e.to_string(),
                    });
                    if request.stop_on_error {
                        result.aborted = true;
                        break;
                    }
                }
            }
        }

        Ok(result)
    }

    async fn find(&self, id: i64) -> Result<QueuedAction, QueueError> {
        self.store
            .get_action(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(format!("action {id} not found")))
    }

    pub async fn get_action(&self, id: i64) -> Result<ActionDetail, QueueError> {
        let action = self.find(id).await?;
        let dependencies = self.store.dependencies_of(id).await?;
        let results = self.store.results_for(id).await?;
        Ok(ActionDetail {
            action,
            dependencies,
            results,
        })
    }

    pub async fn list_actions(&self, filter: QueueFilter) -> Result<Vec<QueuedAction>, QueueError> {
        Ok(self.store.list_actions(&filter.normalized()).await?)
    }

    pub async fn update_action(
        &self,
        id: i64,
        changes: UpdateActionRequest,
    ) -> Result<QueuedAction, QueueError> {
        let now = Utc::now();
        let action = self.find(id).await?;
        if action.is_terminal() {
            return Err(QueueError::Conflict(format!(
                "action {id} is {} and can no longer be changed",
                action.status
            )));
        }

        if let Some(status) = changes.status {
            if !matches!(status, ActionStatus::Pending | ActionStatus::Cancelled) {
                return Err(QueueError::Validation(format!(
                    "status can only be set to pending or cancelled, not {status}"
                )));
            }
            if action.status == ActionStatus::Processing {
                return Err(QueueError::Conflict(format!(
                    "action {id} is processing; its status cannot be changed"
                )));
            }
        }
        if let Some(priority) = &changes.priority {
            if self.store.priority(priority).await?.is_none() {
                return Err(QueueError::Validation(format!("unknown priority: {priority}")));
            }
        }
        if changes.deadline.is_some_and(|d| d <= now) {
            return Err(QueueError::Validation("deadline must be in the future".to_string()));
        }

        let patch = ActionPatch {
            name: changes.name,
            description: changes.description,
            priority: changes.priority,
            status: changes.status,
            scheduled_at: changes.scheduled_at,
            execute_after: changes.execute_after,
            deadline: changes.deadline,
        };
        if patch.is_empty() {
            return Ok(action);
        }

        let updated = self
            .store
            .patch_action(id, &patch, now)
            .await?
            .ok_or_else(|| QueueError::Conflict(format!("action {id} finished before the update")))?;

        self.events.action_updated(&updated);
        if updated.status != action.status {
            self.events
                .action_status_changed(id, action.status, updated.status);
        }
        Ok(updated)
    }

    pub async fn cancel_action(&self, id: i64) -> Result<QueuedAction, QueueError> {
        let action = self.find(id).await?;
        if action.is_terminal() {
            return Err(QueueError::Conflict(format!(
                "action {id} is already {}",
                action.status
            )));
        }

        let cancelled = self
            .store
            .transition(id, &ActionStatus::ACTIVE, ActionStatus::Cancelled, None, Utc::now())
            .await?;
        if !cancelled {
            return Err(QueueError::Conflict(format!("action {id} finished before it could be cancelled")));
        }

        tracing::info!(action_id = id, "Cancelled action (was {})", action.status);
        self.events.action_cancelled(id);
        self.events
            .action_status_changed(id, action.status, ActionStatus::Cancelled);
        self.find(id).await
    }

    pub async fn delete_action(&self, id: i64) -> Result<(), QueueError> {
        let action = self.find(id).await?;
        if !(action.is_terminal() || action.status == ActionStatus::Pending) {
            return Err(QueueError::Conflict(format!(
                "action {id} is {}; only pending or finished actions can be deleted",
                action.status
            )));
        }
        if action.status == ActionStatus::Pending {
            let mut waiting = Vec::new();
            for edge in self.store.dependents_of(id).await? {
                let dependent = self.store.get_action(edge.action_id).await?;
                if dependent.is_some_and(|d| !d.is_terminal()) {
                    waiting.push(edge.action_id);
                }
            }
            if !waiting.is_empty() {
                return Err(QueueError::Conflict(format!(
                    "action {id} is still a prerequisite of pending actions {waiting:?}"
                )));
            }
        }
        if !self.store.delete_action(id).await? {
            return Err(QueueError::NotFound(format!("action {id} not found")));
        }
        self.events.action_deleted(id);
        Ok(())
    }

    pub async fn add_dependency(
        &self,
        action_id: i64,
        dependency: NewDependency,
    ) -> Result<ActionDependency, QueueError> {
        let depends_on = dependency.depends_on_action_id;
        if action_id == depends_on {
            return Err(QueueError::Validation("an action cannot depend on itself".to_string()));
        }

        let action = self.find(action_id).await?;
        if action.is_terminal() {
            return Err(QueueError::Validation(format!(
                "cannot add a dependency to a {} action",
                action.status
            )));
        }
        self.find(depends_on).await?;

        let existing = self.store.dependencies_of(action_id).await?;
        if existing.iter().any(|d| d.depends_on_action_id == depends_on) {
            return Err(QueueError::Validation(format!(
                "action {action_id} already depends on {depends_on}"
            )));
        }
        self.store
            .insert_dependency(action_id, dependency)
            .await?
            .ok_or_else(|| {
                QueueError::Validation(format!(
                    "dependency {action_id} -> {depends_on} would create a cycle"
                ))
            })
    }

    pub async fn process_queue(&self, request: ProcessRequest) -> Result<ProcessSummary, QueueError> {
        self.processor.process_manually(&request).await
    }

    /// Reset a failed action and run it once more right away.
    pub async fn retry_action(&self, id: i64) -> Result<ProcessSummary, QueueError> {
        self.find(id).await?;
        self.processor
            .process_manually(&ProcessRequest {
                action_ids: vec![id],
                force_retry: true,
                ..ProcessRequest::default()
            })
            .await
    }

    pub async fn clear_queue(&self, criteria: ClearRequest) -> Result<u64, QueueError> {
        if !criteria.confirm_clear {
            return Err(QueueError::Validation(
                "confirm_clear must be true to clear the queue".to_string(),
            ));
        }
        let deleted = self.store.clear(&criteria).await?;
        tracing::warn!("Cleared {deleted} actions from the queue");
        self.events.queue_cleared(deleted);
        Ok(deleted)
    }

    pub async fn statistics(&self) -> Result<QueueStatistics, QueueError> {
        let counts = self.store.counts().await?;
        Ok(QueueStatistics::from_counts(counts, self.processor.worker_status()))
    }

    pub async fn health(&self) -> Result<HealthReport, QueueError> {
        let stats = self.statistics().await?;
        let processor_running = self.processor.is_running().await;
        Ok(HealthReport {
            healthy: processor_running && stats.queue_health != QueueHealth::Critical,
            processor_running,
            queue_health: stats.queue_health,
            pending_actions: stats.pending_actions,
            processing_actions: stats.processing_actions,
            active_workers: stats
                .worker_status
                .iter()
                .filter(|w| w.state != WorkerState::Stopped)
                .count(),
        })
    }

    pub async fn action_types(&self) -> Result<Vec<ActionType>, QueueError> {
        Ok(self.store.action_types().await?)
    }

    pub async fn priorities(&self) -> Result<Vec<ActionPriority>, QueueError> {
        let mut priorities = self.store.priorities().await?;
        priorities.sort_by_key(|p| p.weight);
        Ok(priorities)
    }

    pub async fn settings(&self) -> Result<Vec<QueueSetting>, QueueError> {
        Ok(self.store.settings().await?)
    }

    pub async fn update_setting(&self, key: &str, value: &str) -> Result<SettingUpdate, QueueError> {
        let existing = self
            .store
            .setting(key)
            .await?
            .ok_or_else(|| QueueError::Validation(format!("unknown setting: {key}")))?;
        if existing.is_readonly {
            return Err(QueueError::Validation(format!("setting {key} is read-only")));
        }
        let parsed = settings::validate(key, value).map_err(QueueError::Validation)?;

        let setting = self
            .store
            .update_setting(key, &parsed.to_string(), Utc::now())
            .await?
            .ok_or_else(|| QueueError::Validation(format!("setting {key} is read-only")))?;
        let effect = self.processor.on_setting_changed(key, &setting.value).await;

        Ok(SettingUpdate { setting, effect })
    }

    /// Apply several settings; each key succeeds or fails on its own.
    pub async fn update_settings(
        &self,
        changes: BTreeMap<String, String>,
    ) -> Result<SettingsReport, QueueError> {
        let mut report = SettingsReport::default();
        for (key, value) in changes {
            match self.update_setting(&key, &value).await {
                Ok(update) => report.updated.push(update),
                Err(QueueError::Store(e)) => return Err(e.into()),
                Err(e) => {
                    report.errors.insert(key, e.to_string());
                }
            }
        }
        Ok(report)
    }

    async fn retention_days(&self, key: &str, default: i64) -> Result<i64, QueueError> {
        Ok(self
            .store
            .setting(key)
            .await?
            .and_then(|s| s.as_i64())
            .filter(|days| (1..=MAX_RETENTION_DAYS).contains(days))
            .unwrap_or(default))
    }

    /// Purge finished actions past their retention window.
    pub async fn cleanup_old_actions(&self) -> Result<u64, QueueError> {
        let now = Utc::now();
        let completed_days = self
            .retention_days(COMPLETED_RETENTION_DAYS, DEFAULT_COMPLETED_RETENTION_DAYS)
            .await?;
        let dead_letter_days = self
            .retention_days(DEAD_LETTER_RETENTION_DAYS, DEFAULT_DEAD_LETTER_RETENTION_DAYS)
            .await?;

        let completed = self
            .store
            .delete_terminal_before(&[ActionStatus::Completed], now - TimeDelta::days(completed_days))
            .await?;
        let dead_letter = self
            .store
            .delete_terminal_before(&ActionStatus::DEAD_LETTER, now - TimeDelta::days(dead_letter_days))
            .await?;

        let deleted = completed + dead_letter;
        tracing::info!("Retention cleanup removed {completed} completed and {dead_letter} dead-letter actions");
        self.events.actions_cleaned(deleted);
        Ok(deleted)
    }
}
