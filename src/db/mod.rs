pub mod action_dependencies;
pub mod action_results;
pub mod memory;
pub mod pg_store;
pub mod queued_actions;
pub mod reference;
pub mod seed;
pub mod settings;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    ActionDependency, ActionPatch, ActionPriority, ActionResult, ActionStatus, ActionType,
    ClearRequest, Completion, NewAction, NewActionResult, NewDependency, QueueCounts,
    QueueFilter, QueueSetting, QueuedAction, RetrySchedule,
};

pub use memory::MemoryStore;
pub use pg_store::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Narrowing for manual processing candidates.
#[derive(Debug, Clone, Default)]
pub struct ReadyFilter {
    pub priority: Option<String>,
    pub action_type: Option<String>,
}

/// Persistence contract for the queue.
///
/// Every method that moves an action out of `processing` is guarded by the claiming
/// worker id, so a late writer never overwrites a cancellation or deadline expiry.
#[async_trait]
pub trait ActionStore: Send + Sync {
    async fn action_types(&self) -> Result<Vec<ActionType>, StoreError>;
    async fn action_type(&self, name: &str) -> Result<Option<ActionType>, StoreError>;
    async fn priorities(&self) -> Result<Vec<ActionPriority>, StoreError>;
    async fn priority(&self, name: &str) -> Result<Option<ActionPriority>, StoreError>;

    /// Insert an action and its dependency edges atomically.
    async fn insert_action(
        &self,
        action: NewAction,
        dependencies: &[NewDependency],
    ) -> Result<QueuedAction, StoreError>;
    async fn get_action(&self, id: i64) -> Result<Option<QueuedAction>, StoreError>;
    async fn list_actions(&self, filter: &QueueFilter) -> Result<Vec<QueuedAction>, StoreError>;
    /// Apply a patch to a non-terminal action. `None` when missing or terminal.
    async fn patch_action(
        &self,
        id: i64,
        patch: &ActionPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<QueuedAction>, StoreError>;
    async fn delete_action(&self, id: i64) -> Result<bool, StoreError>;

    /// Claim the highest-priority ready action for `worker_id`.
    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueuedAction>, StoreError>;
    /// Claim one specific action if it is ready.
    async fn claim(
        &self,
        id: i64,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueuedAction>, StoreError>;
    async fn ready_actions(
        &self,
        filter: &ReadyFilter,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueuedAction>, StoreError>;
    async fn complete(
        &self,
        id: i64,
        worker_id: &str,
        completion: &Completion,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
    async fn schedule_retry(
        &self,
        id: i64,
        worker_id: &str,
        retry: &RetrySchedule,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
    /// Compare-and-set the status from any of `from` to `to`.
    async fn transition(
        &self,
        id: i64,
        from: &[ActionStatus],
        to: ActionStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
    /// Hand a claim back without recording an attempt. The action returns to
    /// `retrying` when a retry time is set and to `pending` otherwise.
    async fn release_claim(
        &self,
        id: i64,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
    /// Every action currently in `processing`.
    async fn claimed_actions(&self) -> Result<Vec<QueuedAction>, StoreError>;
    /// Non-terminal actions whose deadline has passed.
    async fn overdue_actions(&self, now: DateTime<Utc>) -> Result<Vec<QueuedAction>, StoreError>;

    /// Insert an edge unless it would close a cycle, checked under the same lock
    /// as the insert. `None` when a cycle was found.
    async fn insert_dependency(
        &self,
        action_id: i64,
        dependency: NewDependency,
    ) -> Result<Option<ActionDependency>, StoreError>;
    async fn dependencies_of(&self, action_id: i64) -> Result<Vec<ActionDependency>, StoreError>;
    /// Edges whose prerequisite is `action_id`.
    async fn dependents_of(&self, action_id: i64) -> Result<Vec<ActionDependency>, StoreError>;

    async fn insert_result(&self, result: NewActionResult) -> Result<ActionResult, StoreError>;
    async fn results_for(&self, action_id: i64) -> Result<Vec<ActionResult>, StoreError>;

    /// Delete actions in `statuses` last touched before `cutoff`.
    async fn delete_terminal_before(
        &self,
        statuses: &[ActionStatus],
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
    async fn clear(&self, criteria: &ClearRequest) -> Result<u64, StoreError>;
    async fn counts(&self) -> Result<QueueCounts, StoreError>;

    async fn settings(&self) -> Result<Vec<QueueSetting>, StoreError>;
    async fn setting(&self, key: &str) -> Result<Option<QueueSetting>, StoreError>;
    /// `None` when the key is unknown or read-only.
    async fn update_setting(
        &self,
        key: &str,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueSetting>, StoreError>;
}
