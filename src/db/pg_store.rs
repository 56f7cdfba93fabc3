use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::queued_actions::GroupColumn;
use super::{
    action_dependencies, action_results, queued_actions, reference, settings, ActionStore,
    ReadyFilter, StoreError,
};
use crate::models::{
    ActionDependency, ActionPatch, ActionPriority, ActionResult, ActionStatus, ActionType,
    ClearRequest, Completion, NewAction, NewActionResult, NewDependency, QueueCounts,
    QueueFilter, QueueSetting, QueuedAction, RetrySchedule,
};

/// Postgres-backed store. Claims rely on `FOR UPDATE SKIP LOCKED`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn reload(&self, id: Option<i64>) -> Result<Option<QueuedAction>, StoreError> {
        match id {
            Some(id) => Ok(queued_actions::find_by_id(&self.pool, id).await?),
            None => Ok(None),
        }
    }

    /// Reload a freshly claimed row, releasing the claim if the read fails.
    async fn reload_claimed(
        &self,
        id: Option<i64>,
        worker_id: &str,
    ) -> Result<Option<QueuedAction>, StoreError> {
        match self.reload(id).await {
            Ok(action) => Ok(action),
            Err(e) => {
                if let Some(id) = id {
                    if let Err(release) =
                        queued_actions::release(&self.pool, id, worker_id, Utc::now()).await
                    {
                        tracing::error!(action_id = id, "Failed to release claim after reload error: {release}");
                    }
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl ActionStore for PgStore {
    async fn action_types(&self) -> Result<Vec<ActionType>, StoreError> {
        Ok(reference::list_types(&self.pool).await?)
    }

    async fn action_type(&self, name: &str) -> Result<Option<ActionType>, StoreError> {
        Ok(reference::find_type(&self.pool, name).await?)
    }

    async fn priorities(&self) -> Result<Vec<ActionPriority>, StoreError> {
        Ok(reference::list_priorities(&self.pool).await?)
    }

    async fn priority(&self, name: &str) -> Result<Option<ActionPriority>, StoreError> {
        Ok(reference::find_priority(&self.pool, name).await?)
    }

    async fn insert_action(
        &self,
        action: NewAction,
        dependencies: &[NewDependency],
    ) -> Result<QueuedAction, StoreError> {
        let mut tx = self.pool.begin().await?;
        let id = queued_actions::insert(&mut *tx, &action).await?;
        for dependency in dependencies {
            action_dependencies::create(&mut *tx, id, dependency).await?;
        }
        tx.commit().await?;

        queued_actions::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("action {id} vanished after insert")))
    }

    async fn get_action(&self, id: i64) -> Result<Option<QueuedAction>, StoreError> {
        Ok(queued_actions::find_by_id(&self.pool, id).await?)
    }

    async fn list_actions(&self, filter: &QueueFilter) -> Result<Vec<QueuedAction>, StoreError> {
        Ok(queued_actions::list(&self.pool, filter).await?)
    }

    async fn patch_action(
        &self,
        id: i64,
        patch: &ActionPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<QueuedAction>, StoreError> {
        let updated = queued_actions::patch(&self.pool, id, patch, now).await?;
        self.reload(updated).await
    }

    async fn delete_action(&self, id: i64) -> Result<bool, StoreError> {
        Ok(queued_actions::delete(&self.pool, id).await?)
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueuedAction>, StoreError> {
        let claimed = queued_actions::claim_next(&self.pool, worker_id, now).await?;
        self.reload_claimed(claimed, worker_id).await
    }

    async fn claim(
        &self,
        id: i64,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueuedAction>, StoreError> {
        let claimed = queued_actions::claim(&self.pool, id, worker_id, now).await?;
        self.reload_claimed(claimed, worker_id).await
    }

    async fn ready_actions(
        &self,
        filter: &ReadyFilter,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueuedAction>, StoreError> {
        Ok(queued_actions::ready(
            &self.pool,
            filter.priority.as_deref(),
            filter.action_type.as_deref(),
            limit,
            now,
        )
        .await?)
    }

    async fn complete(
        &self,
        id: i64,
        worker_id: &str,
        completion: &Completion,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(queued_actions::complete(&self.pool, id, worker_id, completion, now).await?)
    }

    async fn schedule_retry(
        &self,
        id: i64,
        worker_id: &str,
        retry: &RetrySchedule,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(queued_actions::schedule_retry(&self.pool, id, worker_id, retry, now).await?)
    }

    async fn transition(
        &self,
        id: i64,
        from: &[ActionStatus],
        to: ActionStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(queued_actions::transition(&self.pool, id, from, to, error_message, now).await?)
    }

    async fn release_claim(
        &self,
        id: i64,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(queued_actions::release(&self.pool, id, worker_id, now).await?)
    }

    async fn claimed_actions(&self) -> Result<Vec<QueuedAction>, StoreError> {
        Ok(queued_actions::claimed(&self.pool).await?)
    }

    async fn overdue_actions(&self, now: DateTime<Utc>) -> Result<Vec<QueuedAction>, StoreError> {
        Ok(queued_actions::overdue(&self.pool, now).await?)
    }

    async fn insert_dependency(
        &self,
        action_id: i64,
        dependency: NewDependency,
    ) -> Result<Option<ActionDependency>, StoreError> {
        Ok(action_dependencies::create_acyclic(&self.pool, action_id, &dependency).await?)
    }

    async fn dependencies_of(&self, action_id: i64) -> Result<Vec<ActionDependency>, StoreError> {
        Ok(action_dependencies::list_for_action(&self.pool, action_id).await?)
    }

    async fn dependents_of(&self, action_id: i64) -> Result<Vec<ActionDependency>, StoreError> {
        Ok(action_dependencies::list_dependents(&self.pool, action_id).await?)
    }

    async fn insert_result(&self, result: NewActionResult) -> Result<ActionResult, StoreError> {
        Ok(action_results::create(&self.pool, &result).await?)
    }

    async fn results_for(&self, action_id: i64) -> Result<Vec<ActionResult>, StoreError> {
        Ok(action_results::list_for_action(&self.pool, action_id).await?)
    }

    async fn delete_terminal_before(
        &self,
        statuses: &[ActionStatus],
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(queued_actions::delete_terminal_before(&self.pool, statuses, cutoff).await?)
    }

    async fn clear(&self, criteria: &ClearRequest) -> Result<u64, StoreError> {
        Ok(queued_actions::clear(&self.pool, criteria).await?)
    }

    async fn counts(&self) -> Result<QueueCounts, StoreError> {
        let mut counts = QueueCounts::default();

        for (status, count) in queued_actions::count_by(&self.pool, GroupColumn::Status).await? {
            let status: ActionStatus = status
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("{e}")))?;
            counts.by_status.insert(status, count);
        }
        counts.by_priority = queued_actions::count_by(&self.pool, GroupColumn::Priority)
            .await?
            .into_iter()
            .collect();
        counts.by_type = queued_actions::count_by(&self.pool, GroupColumn::ActionType)
            .await?
            .into_iter()
            .collect();
        counts.avg_execution_ms = queued_actions::average_duration(&self.pool).await?;
        counts.oldest_pending = queued_actions::oldest_pending(&self.pool).await?;
        counts.last_processed = queued_actions::last_processed(&self.pool).await?;

        Ok(counts)
    }

    async fn settings(&self) -> Result<Vec<QueueSetting>, StoreError> {
        Ok(settings::list(&self.pool).await?)
    }

    async fn setting(&self, key: &str) -> Result<Option<QueueSetting>, StoreError> {
        Ok(settings::find(&self.pool, key).await?)
    }

    async fn update_setting(
        &self,
        key: &str,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueSetting>, StoreError> {
        Ok(settings::update(&self.pool, key, value, now).await?)
    }
}
