use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ActionStore, MemoryStore, ReadyFilter, StoreError};
use crate::models::{
    ActionDependency, ActionPatch, ActionPriority, ActionResult, ActionStatus, ActionType,
    ClearRequest, Completion, NewAction, NewActionResult, NewDependency, QueueCounts,
    QueueFilter, QueueSetting, QueuedAction, RetrySchedule,
};

/// Memory store whose outcome writes fail a set number of times.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    complete_failures: AtomicUsize,
}

impl FlakyStore {
    pub fn failing_completions(times: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            complete_failures: AtomicUsize::new(times),
        }
    }

    fn take_failure(&self) -> bool {
        self.complete_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ActionStore for FlakyStore {
    async fn action_types(&self) -> Result<Vec<ActionType>, StoreError> {
        self.inner.action_types().await
    }

    async fn action_type(&self, name: &str) -> Result<Option<ActionType>, StoreError> {
        self.inner.action_type(name).await
    }

    async fn priorities(&self) -> Result<Vec<ActionPriority>, StoreError> {
        self.inner.priorities().await
    }

    async fn priority(&self, name: &str) -> Result<Option<ActionPriority>, StoreError> {
        self.inner.priority(name).await
    }

    async fn insert_action(
        &self,
        action: NewAction,
        dependencies: &[NewDependency],
    ) -> Result<QueuedAction, StoreError> {
        self.inner.insert_action(action, dependencies).await
    }

    async fn get_action(&self, id: i64) -> Result<Option<QueuedAction>, StoreError> {
        self.inner.get_action(id).await
    }

    async fn list_actions(&self, filter: &QueueFilter) -> Result<Vec<QueuedAction>, StoreError> {
        self.inner.list_actions(filter).await
    }

    async fn patch_action(
        &self,
        id: i64,
        patch: &ActionPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<QueuedAction>, StoreError> {
        self.inner.patch_action(id, patch, now).await
    }

    async fn delete_action(&self, id: i64) -> Result<bool, StoreError> {
        self.inner.delete_action(id).await
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueuedAction>, StoreError> {
        self.inner.claim_next(worker_id, now).await
    }

    async fn claim(
        &self,
        id: i64,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueuedAction>, StoreError> {
        self.inner.claim(id, worker_id, now).await
    }

    async fn ready_actions(
        &self,
        filter: &ReadyFilter,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueuedAction>, StoreError> {
        self.inner.ready_actions(filter, limit, now).await
    }

    async fn complete(
        &self,
        id: i64,
        worker_id: &str,
        completion: &Completion,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if self.take_failure() {
            return Err(StoreError::Corrupt("connection reset during write".to_string()));
        }
        self.inner.complete(id, worker_id, completion, now).await
    }

    async fn schedule_retry(
        &self,
        id: i64,
        worker_id: &str,
        retry: &RetrySchedule,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.schedule_retry(id, worker_id, retry, now).await
    }

    async fn transition(
        &self,
        id: i64,
        from: &[ActionStatus],
        to: ActionStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.transition(id, from, to, error_message, now).await
    }

    async fn release_claim(
        &self,
        id: i64,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.release_claim(id, worker_id, now).await
    }

    async fn claimed_actions(&self) -> Result<Vec<QueuedAction>, StoreError> {
        self.inner.claimed_actions().await
    }

    async fn overdue_actions(&self, now: DateTime<Utc>) -> Result<Vec<QueuedAction>, StoreError> {
        self.inner.overdue_actions(now).await
    }

    async fn insert_dependency(
        &self,
        action_id: i64,
        dependency: NewDependency,
    ) -> Result<Option<ActionDependency>, StoreError> {
        self.inner.insert_dependency(action_id, dependency).await
    }

    async fn dependencies_of(&self, action_id: i64) -> Result<Vec<ActionDependency>, StoreError> {
        self.inner.dependencies_of(action_id).await
    }

    async fn dependents_of(&self, action_id: i64) -> Result<Vec<ActionDependency>, StoreError> {
        self.inner.dependents_of(action_id).await
    }

    async fn insert_result(&self, result: NewActionResult) -> Result<ActionResult, StoreError> {
        self.inner.insert_result(result).await
    }

    async fn results_for(&self, action_id: i64) -> Result<Vec<ActionResult>, StoreError> {
        self.inner.results_for(action_id).await
    }

    async fn delete_terminal_before(
        &self,
        statuses: &[ActionStatus],
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.inner.delete_terminal_before(statuses, cutoff).await
    }

    async fn clear(&self, criteria: &ClearRequest) -> Result<u64, StoreError> {
        self.inner.clear(criteria).await
    }

    async fn counts(&self) -> Result<QueueCounts, StoreError> {
        self.inner.counts().await
    }

    async fn settings(&self) -> Result<Vec<QueueSetting>, StoreError> {
        self.inner.settings().await
    }

    async fn setting(&self, key: &str) -> Result<Option<QueueSetting>, StoreError> {
        self.inner.setting(key).await
    }

    async fn update_setting(
        &self,
        key: &str,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueSetting>, StoreError> {
        self.inner.update_setting(key, value, now).await
    }
}
