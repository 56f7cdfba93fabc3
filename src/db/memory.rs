use std::cmp::Reverse;
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{seed, ActionStore, ReadyFilter, StoreError};
use crate::models::{
    closes_cycle, ActionDependency, ActionPatch, ActionPriority, ActionResult, ActionStatus, ActionType,
    ClearRequest, Completion, NewAction, NewActionResult, NewDependency, OrderBy,
    OrderDirection, QueueCounts, QueueFilter, QueueSetting, QueuedAction, RetrySchedule,
};

/// Store that keeps the whole queue in process memory behind one async mutex.
///
/// Used when no database is configured and by the test suite. Claim exclusivity
/// follows from every mutation running under the same lock.
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

struct MemoryState {
    next_action_id: i64,
    next_dependency_id: i64,
    next_result_id: i64,
    actions: BTreeMap<i64, QueuedAction>,
    dependencies: Vec<ActionDependency>,
    results: Vec<ActionResult>,
    types: BTreeMap<String, ActionType>,
    priorities: BTreeMap<String, ActionPriority>,
    settings: BTreeMap<String, QueueSetting>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let state = MemoryState {
            next_action_id: 1,
            next_dependency_id: 1,
            next_result_id: 1,
            actions: BTreeMap::new(),
            dependencies: Vec::new(),
            results: Vec::new(),
            types: seed::action_types()
                .into_iter()
                .map(|t| (t.name.clone(), t))
                .collect(),
            priorities: seed::priorities()
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
            settings: seed::settings()
                .into_iter()
                .map(|s| (s.key.clone(), s))
                .collect(),
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Add or replace an action type in the reference catalogue.
    pub async fn upsert_action_type(&self, action_type: ActionType) {
        let mut state = self.state.lock().await;
        state.types.insert(action_type.name.clone(), action_type);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryState {
    fn dependencies_met(&self, action_id: i64) -> bool {
        self.dependencies
            .iter()
            .filter(|d| d.action_id == action_id)
            .all(|d| match self.actions.get(&d.depends_on_action_id) {
                Some(prerequisite) => d.dependency_type.is_met_by(prerequisite.status),
                None => true,
            })
    }

    fn is_ready(&self, action: &QueuedAction, now: DateTime<Utc>) -> bool {
        matches!(action.status, ActionStatus::Pending | ActionStatus::Retrying)
            && action.is_due(now)
            && self.dependencies_met(action.id)
    }

    fn ready_ids(&self, filter: &ReadyFilter, now: DateTime<Utc>) -> Vec<i64> {
        let mut ready: Vec<&QueuedAction> = self
            .actions
            .values()
            .filter(|a| filter.priority.as_ref().is_none_or(|p| &a.priority == p))
            .filter(|a| filter.action_type.as_ref().is_none_or(|t| &a.action_type == t))
            .filter(|a| self.is_ready(a, now))
            .collect();
        ready.sort_by_key(|a| (Reverse(a.priority_weight), a.created_at, a.id));
        ready.into_iter().map(|a| a.id).collect()
    }

    fn claim(&mut self, id: i64, worker_id: &str, now: DateTime<Utc>) -> Option<QueuedAction> {
        let ready = self.actions.get(&id).is_some_and(|a| self.is_ready(a, now));
        if !ready {
            return None;
        }
        let action = self.actions.get_mut(&id)?;
        action.status = ActionStatus::Processing;
        action.claimed_by = Some(worker_id.to_string());
        action.started_at = Some(now);
        action.last_attempt_at = Some(now);
        action.updated_at = now;
        Some(action.clone())
    }

    fn held_by(&mut self, id: i64, worker_id: &str) -> Option<&mut QueuedAction> {
        self.actions.get_mut(&id).filter(|a| {
            a.status == ActionStatus::Processing && a.claimed_by.as_deref() == Some(worker_id)
        })
    }

    fn remove_actions(&mut self, ids: &[i64]) -> u64 {
        for id in ids {
            self.actions.remove(id);
        }
        self.dependencies
            .retain(|d| !ids.contains(&d.action_id) && !ids.contains(&d.depends_on_action_id));
        self.results.retain(|r| !ids.contains(&r.action_id));
        ids.len() as u64
    }
}

fn set_status(action: &mut QueuedAction, status: ActionStatus, now: DateTime<Utc>) {
    action.status = status;
    if status == ActionStatus::Pending {
        action.next_retry_at = None;
        action.claimed_by = None;
    }
    if status.is_terminal() {
        action.completed_at = Some(now);
    }
    action.updated_at = now;
}

#[async_trait]
impl ActionStore for MemoryStore {
    async fn action_types(&self) -> Result<Vec<ActionType>, StoreError> {
        Ok(self.state.lock().await.types.values().cloned().collect())
    }

    async fn action_type(&self, name: &str) -> Result<Option<ActionType>, StoreError> {
        Ok(self.state.lock().await.types.get(name).cloned())
    }

    async fn priorities(&self) -> Result<Vec<ActionPriority>, StoreError> {
        let mut priorities: Vec<ActionPriority> =
            self.state.lock().await.priorities.values().cloned().collect();
        priorities.sort_by_key(|p| p.weight);
        Ok(priorities)
    }

    async fn priority(&self, name: &str) -> Result<Option<ActionPriority>, StoreError> {
        Ok(self.state.lock().await.priorities.get(name).cloned())
    }

    async fn insert_action(
        &self,
        action: NewAction,
        dependencies: &[NewDependency],
    ) -> Result<QueuedAction, StoreError> {
        let mut state = self.state.lock().await;

        let handler_name = state
            .types
            .get(&action.action_type)
            .map(|t| t.handler_name.clone())
            .ok_or_else(|| StoreError::Corrupt(format!("unknown action type {}", action.action_type)))?;
        let priority_weight = state
            .priorities
            .get(&action.priority)
            .map(|p| p.weight)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown priority {}", action.priority)))?;
        if let Some(missing) = dependencies
            .iter()
            .find(|d| !state.actions.contains_key(&d.depends_on_action_id))
        {
            return Err(StoreError::Corrupt(format!(
                "dependency target {} does not exist",
                missing.depends_on_action_id
            )));
        }

        let now = Utc::now();
        let id = state.next_action_id;
        state.next_action_id += 1;

        let queued = QueuedAction {
            id,
            name: action.name,
            description: action.description,
            action_type: action.action_type,
            handler_name,
            priority: action.priority,
            priority_weight,
            status: ActionStatus::Pending,
            payload: action.payload,
            target_entity_id: action.target_entity_id,
            correlation_id: action.correlation_id,
            parent_action_id: action.parent_action_id,
            created_by: action.created_by,
            timeout_seconds: action.timeout_seconds,
            max_retries: action.max_retries,
            retry_count: 0,
            backoff_factor: action.backoff_factor,
            scheduled_at: action.scheduled_at,
            execute_after: action.execute_after,
            deadline: action.deadline,
            next_retry_at: None,
            claimed_by: None,
            started_at: None,
            completed_at: None,
            last_attempt_at: None,
            result_data: None,
            error_message: None,
            error_details: None,
            execution_duration_ms: None,
            created_at: now,
            updated_at: now,
        };
        state.actions.insert(id, queued.clone());

        for dependency in dependencies {
            let dependency_id = state.next_dependency_id;
            state.next_dependency_id += 1;
            state.dependencies.push(ActionDependency {
                id: dependency_id,
                action_id: id,
                depends_on_action_id: dependency.depends_on_action_id,
                dependency_type: dependency.dependency_type,
                created_at: now,
            });
        }

        Ok(queued)
    }

    async fn get_action(&self, id: i64) -> Result<Option<QueuedAction>, StoreError> {
        Ok(self.state.lock().await.actions.get(&id).cloned())
    }

    async fn list_actions(&self, filter: &QueueFilter) -> Result<Vec<QueuedAction>, StoreError> {
        let state = self.state.lock().await;
        let mut actions: Vec<QueuedAction> = state
            .actions
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();

        match filter.order_by {
            OrderBy::CreatedAt => actions.sort_by_key(|a| (a.created_at, a.id)),
            OrderBy::Priority => actions.sort_by_key(|a| (a.priority_weight, a.created_at, a.id)),
            OrderBy::ScheduledAt => actions.sort_by_key(|a| (a.scheduled_at, a.id)),
        }
        if filter.order_direction == OrderDirection::Desc {
            actions.reverse();
        }

        Ok(actions
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn patch_action(
        &self,
        id: i64,
        patch: &ActionPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<QueuedAction>, StoreError> {
        let mut state = self.state.lock().await;
        let weight = match &patch.priority {
            Some(name) => Some(
                state
                    .priorities
                    .get(name)
                    .map(|p| p.weight)
                    .ok_or_else(|| StoreError::Corrupt(format!("unknown priority {name}")))?,
            ),
            None => None,
        };

        let Some(action) = state.actions.get_mut(&id).filter(|a| !a.is_terminal()) else {
            return Ok(None);
        };
        if let Some(name) = &patch.name {
            action.name = name.clone();
        }
        if let Some(description) = &patch.description {
            action.description = Some(description.clone());
        }
        if let (Some(priority), Some(weight)) = (&patch.priority, weight) {
            action.priority = priority.clone();
            action.priority_weight = weight;
        }
        if patch.scheduled_at.is_some() {
            action.scheduled_at = patch.scheduled_at;
        }
        if patch.execute_after.is_some() {
            action.execute_after = patch.execute_after;
        }
        if patch.deadline.is_some() {
            action.deadline = patch.deadline;
        }
        match patch.status {
            Some(status) => set_status(action, status, now),
            None => action.updated_at = now,
        }
        Ok(Some(action.clone()))
    }

    async fn delete_action(&self, id: i64) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if !state.actions.contains_key(&id) {
            return Ok(false);
        }
        state.remove_actions(&[id]);
        Ok(true)
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueuedAction>, StoreError> {
        let mut state = self.state.lock().await;
        let next = state.ready_ids(&ReadyFilter::default(), now).first().copied();
        Ok(next.and_then(|id| state.claim(id, worker_id, now)))
    }

    async fn claim(
        &self,
        id: i64,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueuedAction>, StoreError> {
        Ok(self.state.lock().await.claim(id, worker_id, now))
    }

    async fn ready_actions(
        &self,
        filter: &ReadyFilter,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueuedAction>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .ready_ids(filter, now)
            .into_iter()
            .take(limit.max(0) as usize)
            .filter_map(|id| state.actions.get(&id).cloned())
            .collect())
    }

    async fn complete(
        &self,
        id: i64,
        worker_id: &str,
        completion: &Completion,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(action) = state.held_by(id, worker_id) else {
            return Ok(false);
        };
        action.result_data = completion.result_data.clone();
        action.error_message = completion.error_message.clone();
        action.error_details = completion.error_details.clone();
        action.execution_duration_ms = Some(completion.duration_ms);
        set_status(action, completion.status, now);
        Ok(true)
    }

    async fn schedule_retry(
        &self,
        id: i64,
        worker_id: &str,
        retry: &RetrySchedule,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(action) = state.held_by(id, worker_id) else {
            return Ok(false);
        };
        action.retry_count += 1;
        action.next_retry_at = Some(retry.next_retry_at);
        action.error_message = Some(retry.error_message.clone());
        action.error_details = retry.error_details.clone();
        action.execution_duration_ms = Some(retry.duration_ms);
        set_status(action, ActionStatus::Retrying, now);
        Ok(true)
    }

    async fn transition(
        &self,
        id: i64,
        from: &[ActionStatus],
        to: ActionStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(action) = state
            .actions
            .get_mut(&id)
            .filter(|a| from.contains(&a.status))
        else {
            return Ok(false);
        };
        if let Some(message) = error_message {
            action.error_message = Some(message.to_string());
        }
        set_status(action, to, now);
        Ok(true)
    }

    async fn release_claim(
        &self,
        id: i64,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(action) = state.held_by(id, worker_id) else {
            return Ok(false);
        };
        action.claimed_by = None;
        action.status = if action.next_retry_at.is_some() {
            ActionStatus::Retrying
        } else {
            ActionStatus::Pending
        };
        action.updated_at = now;
        Ok(true)
    }

    async fn claimed_actions(&self) -> Result<Vec<QueuedAction>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .actions
            .values()
            .filter(|a| a.status == ActionStatus::Processing)
            .cloned()
            .collect())
    }

    async fn overdue_actions(&self, now: DateTime<Utc>) -> Result<Vec<QueuedAction>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .actions
            .values()
            .filter(|a| !a.is_terminal() && a.deadline.is_some_and(|d| d < now))
            .cloned()
            .collect())
    }

    async fn insert_dependency(
        &self,
        action_id: i64,
        dependency: NewDependency,
    ) -> Result<Option<ActionDependency>, StoreError> {
        let mut state = self.state.lock().await;
        for id in [action_id, dependency.depends_on_action_id] {
            if !state.actions.contains_key(&id) {
                return Err(StoreError::Corrupt(format!("action {id} does not exist")));
            }
        }
        if closes_cycle(&state.dependencies, action_id, dependency.depends_on_action_id) {
            return Ok(None);
        }
        let id = state.next_dependency_id;
        state.next_dependency_id += 1;
        let edge = ActionDependency {
            id,
            action_id,
            depends_on_action_id: dependency.depends_on_action_id,
            dependency_type: dependency.dependency_type,
            created_at: Utc::now(),
        };
        state.dependencies.push(edge.clone());
        Ok(Some(edge))
    }

    async fn dependencies_of(&self, action_id: i64) -> Result<Vec<ActionDependency>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .dependencies
            .iter()
            .filter(|d| d.action_id == action_id)
            .cloned()
            .collect())
    }

    async fn dependents_of(&self, action_id: i64) -> Result<Vec<ActionDependency>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .dependencies
            .iter()
            .filter(|d| d.depends_on_action_id == action_id)
            .cloned()
            .collect())
    }

    async fn insert_result(&self, result: NewActionResult) -> Result<ActionResult, StoreError> {
        let mut state = self.state.lock().await;
        let id = state.next_result_id;
        state.next_result_id += 1;
        let row = ActionResult {
            id,
            action_id: result.action_id,
            attempt_number: result.attempt_number,
            status: result.status,
            success: result.success,
            result_data: result.result_data,
            error_message: result.error_message,
            error_code: result.error_code,
            worker_id: result.worker_id,
            started_at: result.started_at,
            completed_at: result.completed_at,
            duration_ms: result.duration_ms,
        };
        state.results.push(row.clone());
        Ok(row)
    }

    async fn results_for(&self, action_id: i64) -> Result<Vec<ActionResult>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .results
            .iter()
            .filter(|r| r.action_id == action_id)
            .cloned()
            .collect())
    }

    async fn delete_terminal_before(
        &self,
        statuses: &[ActionStatus],
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let ids: Vec<i64> = state
            .actions
            .values()
            .filter(|a| statuses.contains(&a.status) && a.updated_at < cutoff)
            .map(|a| a.id)
            .collect();
        Ok(state.remove_actions(&ids))
    }

    async fn clear(&self, criteria: &ClearRequest) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let ids: Vec<i64> = state
            .actions
            .values()
            .filter(|a| criteria.status.is_empty() || criteria.status.contains(&a.status))
            .filter(|a| criteria.older_than.is_none_or(|t| a.created_at < t))
            .filter(|a| criteria.action_type.as_ref().is_none_or(|t| &a.action_type == t))
            .filter(|a| {
                criteria
                    .correlation_id
                    .as_ref()
                    .is_none_or(|c| a.correlation_id.as_ref() == Some(c))
            })
            .map(|a| a.id)
            .collect();
        Ok(state.remove_actions(&ids))
    }

    async fn counts(&self) -> Result<QueueCounts, StoreError> {
        let state = self.state.lock().await;
        let mut counts = QueueCounts::default();
        let mut durations = Vec::new();

        for action in state.actions.values() {
            *counts.by_status.entry(action.status).or_default() += 1;
            *counts.by_priority.entry(action.priority.clone()).or_default() += 1;
            *counts.by_type.entry(action.action_type.clone()).or_default() += 1;

            if action.status == ActionStatus::Completed {
                durations.extend(action.execution_duration_ms);
            }
            if action.status == ActionStatus::Pending {
                counts.oldest_pending = Some(match counts.oldest_pending {
                    Some(oldest) => oldest.min(action.created_at),
                    None => action.created_at,
                });
            }
            if let Some(done) = action.completed_at {
                counts.last_processed = Some(counts.last_processed.map_or(done, |l| l.max(done)));
            }
        }

        if !durations.is_empty() {
            counts.avg_execution_ms =
                Some(durations.iter().sum::<i64>() as f64 / durations.len() as f64);
        }
        Ok(counts)
    }

    async fn settings(&self) -> Result<Vec<QueueSetting>, StoreError> {
        Ok(self.state.lock().await.settings.values().cloned().collect())
    }

    async fn setting(&self, key: &str) -> Result<Option<QueueSetting>, StoreError> {
        Ok(self.state.lock().await.settings.get(key).cloned())
    }

    async fn update_setting(
        &self,
        key: &str,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueSetting>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(setting) = state.settings.get_mut(key).filter(|s| !s.is_readonly) else {
            return Ok(None);
        };
        setting.value = value.to_string();
        setting.updated_at = now;
        Ok(Some(setting.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::models::DependencyType;

    fn new_action(action_type: &str, priority: &str) -> NewAction {
        NewAction {
            name: format!("{action_type} test"),
            description: None,
            action_type: action_type.to_string(),
            priority: priority.to_string(),
            payload: json!({}),
            target_entity_id: None,
            correlation_id: None,
            parent_action_id: None,
            created_by: "system".to_string(),
            timeout_seconds: None,
            max_retries: 3,
            backoff_factor: 2.0,
            scheduled_at: None,
            execute_after: None,
            deadline: None,
        }
    }

    #[tokio::test]
    async fn concurrent_claims_on_one_action_yield_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let action = store
            .insert_action(new_action("scene_activation", "normal"), &[])
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .claim(action.id, &format!("worker-{i}"), Utc::now())
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn claim_next_prefers_weight_then_age() {
        let store = MemoryStore::new();
        let low = store.insert_action(new_action("scene_activation", "low"), &[]).await.unwrap();
        let first_high = store.insert_action(new_action("scene_activation", "high"), &[]).await.unwrap();
        let second_high = store.insert_action(new_action("scene_activation", "high"), &[]).await.unwrap();

        let now = Utc::now();
        let order: Vec<i64> = [
            store.claim_next("w", now).await.unwrap(),
            store.claim_next("w", now).await.unwrap(),
            store.claim_next("w", now).await.unwrap(),
        ]
        .into_iter()
        .map(|a| a.unwrap().id)
        .collect();

        assert_eq!(order, vec![first_high.id, second_high.id, low.id]);
        assert!(store.claim_next("w", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn completion_dependency_gates_claim() {
        let store = MemoryStore::new();
        let first = store.insert_action(new_action("scene_activation", "low"), &[]).await.unwrap();
        let second = store
            .insert_action(
                new_action("scene_activation", "critical"),
                &[NewDependency {
                    depends_on_action_id: first.id,
                    dependency_type: DependencyType::Completion,
                }],
            )
            .await
            .unwrap();

        let now = Utc::now();
        assert!(store.claim(second.id, "w", now).await.unwrap().is_none());

        let claimed = store.claim_next("w", now).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);

        let done = Completion {
            status: ActionStatus::Completed,
            result_data: None,
            error_message: None,
            error_details: None,
            duration_ms: 5,
        };
        assert!(store.complete(first.id, "w", &done, now).await.unwrap());
        assert_eq!(store.claim_next("w", now).await.unwrap().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn outcome_write_requires_the_claiming_worker() {
        let store = MemoryStore::new();
        let action = store.insert_action(new_action("scene_activation", "normal"), &[]).await.unwrap();
        let now = Utc::now();
        store.claim(action.id, "worker-1", now).await.unwrap().unwrap();

        let done = Completion {
            status: ActionStatus::Completed,
            result_data: None,
            error_message: None,
            error_details: None,
            duration_ms: 1,
        };
        assert!(!store.complete(action.id, "worker-2", &done, now).await.unwrap());

        assert!(store
            .transition(action.id, &ActionStatus::ACTIVE, ActionStatus::Cancelled, None, now)
            .await
            .unwrap());
        assert!(!store.complete(action.id, "worker-1", &done, now).await.unwrap());
        let stored = store.get_action(action.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ActionStatus::Cancelled);
    }

    #[tokio::test]
    async fn retrying_action_waits_for_backoff() {
        let store = MemoryStore::new();
        let action = store.insert_action(new_action("scene_activation", "normal"), &[]).await.unwrap();
        let now = Utc::now();
        store.claim(action.id, "w", now).await.unwrap().unwrap();

        let retry = RetrySchedule {
            next_retry_at: now + Duration::seconds(1),
            error_message: "boom".to_string(),
            error_details: None,
            duration_ms: 3,
        };
        assert!(store.schedule_retry(action.id, "w", &retry, now).await.unwrap());
        assert!(store.claim_next("w", now).await.unwrap().is_none());

        let later = now + Duration::seconds(2);
        let reclaimed = store.claim_next("w", later).await.unwrap().unwrap();
        assert_eq!(reclaimed.retry_count, 1);
        assert_eq!(reclaimed.status, ActionStatus::Processing);
    }

    #[tokio::test]
    async fn delete_cascades_edges_and_results() {
        let store = MemoryStore::new();
        let first = store.insert_action(new_action("scene_activation", "normal"), &[]).await.unwrap();
        let second = store
            .insert_action(
                new_action("scene_activation", "normal"),
                &[NewDependency {
                    depends_on_action_id: first.id,
                    dependency_type: DependencyType::Completion,
                }],
            )
            .await
            .unwrap();

        assert!(store.delete_action(first.id).await.unwrap());
        assert!(store.dependencies_of(second.id).await.unwrap().is_empty());
        assert!(store.dependents_of(first.id).await.unwrap().is_empty());
        let claimed = store.claim_next("w", Utc::now()).await.unwrap().unwrap();
        assert_eq!(claimed.id, second.id);
    }

    #[tokio::test]
    async fn released_claim_returns_to_its_prior_state() {
        let store = MemoryStore::new();
        let fresh = store.insert_action(new_action("scene_activation", "high"), &[]).await.unwrap();
        let retried = store.insert_action(new_action("scene_activation", "normal"), &[]).await.unwrap();
        let now = Utc::now();

        store.claim(retried.id, "w", now).await.unwrap().unwrap();
        let retry = RetrySchedule {
            next_retry_at: now,
            error_message: "boom".to_string(),
            error_details: None,
            duration_ms: 3,
        };
        assert!(store.schedule_retry(retried.id, "w", &retry, now).await.unwrap());
        store.claim(retried.id, "w", now).await.unwrap().unwrap();
        store.claim(fresh.id, "w", now).await.unwrap().unwrap();
        assert_eq!(store.claimed_actions().await.unwrap().len(), 2);

        assert!(!store.release_claim(fresh.id, "other", now).await.unwrap());
        assert!(store.release_claim(fresh.id, "w", now).await.unwrap());
        assert!(store.release_claim(retried.id, "w", now).await.unwrap());
        assert!(!store.release_claim(fresh.id, "w", now).await.unwrap());

        let fresh = store.get_action(fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, ActionStatus::Pending);
        assert!(fresh.claimed_by.is_none());
        let retried = store.get_action(retried.id).await.unwrap().unwrap();
        assert_eq!(retried.status, ActionStatus::Retrying);
        assert_eq!(retried.retry_count, 1);
        assert!(store.results_for(retried.id).await.unwrap().is_empty());
        assert!(store.claimed_actions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dependency_insert_refuses_cycles() {
        let store = MemoryStore::new();
        let first = store.insert_action(new_action("scene_activation", "normal"), &[]).await.unwrap();
        let second = store
            .insert_action(
                new_action("scene_activation", "normal"),
                &[NewDependency {
                    depends_on_action_id: first.id,
                    dependency_type: DependencyType::Completion,
                }],
            )
            .await
            .unwrap();

        let closing = NewDependency {
            depends_on_action_id: second.id,
            dependency_type: DependencyType::Completion,
        };
        assert!(store.insert_dependency(first.id, closing).await.unwrap().is_none());
        assert!(store.dependencies_of(first.id).await.unwrap().is_empty());

        let third = store.insert_action(new_action("scene_activation", "normal"), &[]).await.unwrap();
        let edge = store.insert_dependency(third.id, closing).await.unwrap().unwrap();
        assert_eq!(edge.depends_on_action_id, second.id);
        assert_eq!(store.dependents_of(second.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn read_only_settings_reject_updates() {
        let store = MemoryStore::new();
        let now = Utc::now();
        assert!(store.update_setting("schema_version", "9", now).await.unwrap().is_none());
        assert!(store.update_setting("no_such_key", "1", now).await.unwrap().is_none());
        let updated = store
            .update_setting("worker_poll_interval_ms", "250", now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.as_i64(), Some(250));
    }
}
