use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::future::join_all;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use super::dispatch::{status_before_claim, Dispatcher, Outcome};
use super::settings::{RuntimeSettings, SettingEffect};
use super::{worker, QueueError};
use crate::db::{ActionStore, ReadyFilter, StoreError};
use crate::events::QueueEvents;
use crate::handlers::HandlerRegistry;
use crate::models::requests::{DEFAULT_MANUAL_BATCH, MAX_LIST_LIMIT};
use crate::models::{ActionStatus, ProcessRequest, ProcessSummary, WorkerState, WorkerStatus};

/// Worker id recorded on claims made by operator-triggered processing.
pub const MANUAL_WORKER: &str = "manual";

pub(super) const DEADLINE_MESSAGE: &str = "action exceeded its deadline";

/// State shared between the processor handle and its spawned tasks.
pub(super) struct Shared {
    pub(super) store: Arc<dyn ActionStore>,
    pub(super) dispatcher: Dispatcher,
    pub(super) events: QueueEvents,
    workers: RwLock<BTreeMap<String, WorkerStatus>>,
    settings: RwLock<RuntimeSettings>,
}

impl Shared {
    pub(super) fn settings(&self) -> RuntimeSettings {
        *self.settings.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn update_worker(&self, worker_id: &str, update: impl FnOnce(&mut WorkerStatus)) {
        let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);
        let status = workers
            .entry(worker_id.to_string())
            .or_insert_with(|| WorkerStatus::idle(worker_id));
        update(status);
        status.last_activity = Utc::now();
    }

    /// Force every non-terminal action past its deadline to `timeout`.
    pub(super) async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut expired = 0;
        for action in self.store.overdue_actions(now).await? {
            let moved = self
                .store
                .transition(
                    action.id,
                    &ActionStatus::ACTIVE,
                    ActionStatus::Timeout,
                    Some(DEADLINE_MESSAGE),
                    now,
                )
                .await?;
            if moved {
                expired += 1;
                self.events
                    .action_status_changed(action.id, action.status, ActionStatus::Timeout);
            }
        }
        Ok(expired)
    }

    /// Hand back claims no live worker of this processor is working on.
    ///
    /// A pool claim is stale once no worker lists it as its current action and it
    /// is older than `grace`. Manual claims have no worker entry, so they are only
    /// released once their attempt timeout has also run out.
    pub(super) async fn release_stale_claims(
        &self,
        now: DateTime<Utc>,
        grace: TimeDelta,
    ) -> Result<u64, StoreError> {
        let held: HashSet<(String, i64)> = self
            .workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter_map(|w| w.current_action_id.map(|id| (w.worker_id.clone(), id)))
            .collect();

        let mut released = 0;
        for action in self.store.claimed_actions().await? {
            let Some(owner) = action.claimed_by.clone() else {
                continue;
            };
            let since = action.last_attempt_at.unwrap_or(action.updated_at);
            let stale = if owner == MANUAL_WORKER {
                let timeout = self.dispatcher.attempt_timeout(&action).as_secs() as i64;
                since + TimeDelta::seconds(timeout) + grace <= now
            } else {
                !held.contains(&(owner.clone(), action.id)) && since + grace <= now
            };
            if !stale || !self.store.release_claim(action.id, &owner, now).await? {
                continue;
            }

            released += 1;
            tracing::warn!(action_id = action.id, "Released abandoned claim held by {owner}");
            self.events.action_status_changed(
                action.id,
                ActionStatus::Processing,
                status_before_claim(&action),
            );
        }
        Ok(released)
    }
}

struct RunningPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Owns the worker pool, the deadline-cleanup task and the live settings.
pub struct Processor {
    shared: Arc<Shared>,
    pool: Mutex<Option<RunningPool>>,
}

impl Processor {
    pub fn new(
        store: Arc<dyn ActionStore>,
        registry: Arc<HandlerRegistry>,
        events: QueueEvents,
        settings: RuntimeSettings,
    ) -> Self {
        let dispatcher = Dispatcher::new(store.clone(), registry, events.clone());
        Self {
            shared: Arc::new(Shared {
                store,
                dispatcher,
                events,
                workers: RwLock::new(BTreeMap::new()),
                settings: RwLock::new(settings),
            }),
            pool: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> Result<(), QueueError> {
        let mut pool = self.pool.lock().await;
        if pool.is_some() {
            return Err(QueueError::Conflict("processor is already running".to_string()));
        }

        match self.shared.store.settings().await {
            Ok(stored) => {
                let mut settings = self.shared.settings.write().unwrap_or_else(PoisonError::into_inner);
                for setting in stored {
                    settings.apply(&setting.key, &setting.value, false);
                }
            }
            Err(e) => tracing::error!("Failed to load queue settings, using defaults: {e}"),
        }

        let settings = {
            let mut settings = self.shared.settings.write().unwrap_or_else(PoisonError::into_inner);
            settings.take_pending();
            *settings
        };

        let (shutdown, rx) = watch::channel(false);
        let worker_ids: Vec<String> = (1..=settings.worker_count).map(|n| format!("worker-{n}")).collect();

        {
            let mut workers = self.shared.workers.write().unwrap_or_else(PoisonError::into_inner);
            workers.clear();
            for id in &worker_ids {
                workers.insert(id.clone(), WorkerStatus::idle(id.clone()));
            }
        }

        match self.shared.release_stale_claims(Utc::now(), TimeDelta::zero()).await {
            Ok(0) => {}
            Ok(released) => tracing::info!("Returned {released} abandoned claims to the queue"),
            Err(e) => tracing::error!("Failed to recover abandoned claims: {e}"),
        }

        let mut handles = Vec::with_capacity(worker_ids.len() + 1);
        for id in worker_ids {
            handles.push(tokio::spawn(worker::run(id, self.shared.clone(), rx.clone())));
        }
        handles.push(tokio::spawn(worker::run_cleanup(self.shared.clone(), rx)));

        *pool = Some(RunningPool { shutdown, handles });

        tracing::info!(
            "Queue processor started ({} workers, poll every {}ms)",
            settings.worker_count,
            settings.poll_interval.as_millis()
        );
        Ok(())
    }

    /// Signal every task to stop and wait, bounded, for them to exit.
    pub async fn stop(&self) {
        let Some(running) = self.pool.lock().await.take() else {
            return;
        };

        tracing::info!("Stopping queue processor");
        let _ = running.shutdown.send(true);

        let bound = self.shared.settings().shutdown_timeout;
        let aborts: Vec<_> = running.handles.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(bound, join_all(running.handles)).await.is_err() {
            tracing::warn!(
                "Queue tasks still running after {}s, aborting them",
                bound.as_secs()
            );
            for abort in aborts {
                abort.abort();
            }
        }

        let mut workers = self.shared.workers.write().unwrap_or_else(PoisonError::into_inner);
        for status in workers.values_mut() {
            status.state = WorkerState::Stopped;
            status.current_action_id = None;
        }
        tracing::info!("Queue processor stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.pool.lock().await.is_some()
    }

    pub fn worker_status(&self) -> Vec<WorkerStatus> {
        self.shared
            .workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn settings(&self) -> RuntimeSettings {
        self.shared.settings()
    }

    /// Apply a persisted setting change to the running processor.
    pub async fn on_setting_changed(&self, key: &str, value: &str) -> SettingEffect {
        let running = self.is_running().await;
        let effect = self
            .shared
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(key, value, running);
        match effect {
            SettingEffect::OnRestart => {
                tracing::info!("Setting {key}={value} recorded, applies on next start")
            }
            SettingEffect::Live => tracing::info!("Setting {key}={value} applied"),
            SettingEffect::Stored => {}
        }
        effect
    }

    /// Run ready actions outside the poll loop, claiming them as `manual`.
    pub async fn process_manually(&self, request: &ProcessRequest) -> Result<ProcessSummary, QueueError> {
        let store = &self.shared.store;
        let now = Utc::now();

        let candidates: Vec<i64> = if request.action_ids.is_empty() {
            let filter = ReadyFilter {
                priority: request.priority.clone(),
                action_type: request.action_type.clone(),
            };
            let limit = request
                .max_actions
                .unwrap_or(DEFAULT_MANUAL_BATCH)
                .clamp(1, MAX_LIST_LIMIT);
            store
                .ready_actions(&filter, limit, now)
                .await?
                .into_iter()
                .map(|a| a.id)
                .collect()
        } else {
            let mut ids = Vec::with_capacity(request.action_ids.len());
            for &id in &request.action_ids {
                let Some(action) = store.get_action(id).await? else {
                    tracing::warn!(action_id = id, "Action not found for manual processing");
                    continue;
                };
                if request.force_retry && action.status == ActionStatus::Failed {
                    let reset = store
                        .transition(id, &[ActionStatus::Failed], ActionStatus::Pending, None, now)
                        .await?;
                    if reset {
                        self.shared
                            .events
                            .action_status_changed(id, ActionStatus::Failed, ActionStatus::Pending);
                    }
                }
                ids.push(id);
            }
            ids
        };

        let mut summary = ProcessSummary {
            examined: candidates.len(),
            ..ProcessSummary::default()
        };

        for id in candidates {
            let Some(action) = self.shared.dispatcher.claim(id, MANUAL_WORKER).await? else {
                tracing::debug!(action_id = id, "Action not ready, skipping");
                continue;
            };
            summary.executed += 1;
            if self.shared.dispatcher.execute(&action, MANUAL_WORKER).await? == Outcome::Completed {
                summary.completed += 1;
            }
        }

        tracing::info!(
            "Manual processing finished: {} examined, {} executed, {} completed",
            summary.examined,
            summary.executed,
            summary.completed
        );
        Ok(summary)
    }

    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, QueueError> {
        Ok(self.shared.expire_overdue(now).await?)
    }
}
