use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use tokio::sync::watch;

use super::dispatch::Outcome;
use super::processor::Shared;
use crate::db::StoreError;
use crate::models::WorkerState;

/// Seconds a claim may go unlisted by any worker before cleanup takes it back.
const CLAIM_GRACE_SECS: i64 = 60;

/// A single worker loop: claim one ready action per tick and run it.
pub(super) async fn run(worker_id: String, shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("Worker {worker_id} started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match process_next(&worker_id, &shared).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                shared.update_worker(&worker_id, |w| {
                    w.state = WorkerState::Idle;
                    w.current_action_id = None;
                    w.error_count += 1;
                });
                tracing::error!("Worker {worker_id} error: {e}");
            }
        }

        // Re-read every tick so interval changes apply without a restart.
        let interval = shared.settings().poll_interval;
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    shared.update_worker(&worker_id, |w| {
        w.state = WorkerState::Stopped;
        w.current_action_id = None;
    });
    tracing::info!("Worker {worker_id} stopped");
}

/// Claim and execute the next ready action. Returns true if one was run.
async fn process_next(worker_id: &str, shared: &Shared) -> Result<bool, StoreError> {
    let Some(action) = shared.dispatcher.claim_next(worker_id).await? else {
        shared.update_worker(worker_id, |w| {
            w.state = WorkerState::Idle;
            w.current_action_id = None;
        });
        return Ok(false);
    };

    shared.update_worker(worker_id, |w| {
        w.state = WorkerState::Processing;
        w.current_action_id = Some(action.id);
    });

    let outcome = shared.dispatcher.execute(&action, worker_id).await?;

    shared.update_worker(worker_id, |w| {
        w.state = WorkerState::Idle;
        w.current_action_id = None;
        w.processed_count += 1;
        if outcome != Outcome::Completed {
            w.error_count += 1;
        }
    });
    Ok(true)
}

/// Periodic deadline scan and abandoned-claim recovery.
pub(super) async fn run_cleanup(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    tracing::debug!("Deadline cleanup task started");

    loop {
        let interval = shared.settings().cleanup_interval;
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        if *shutdown.borrow() {
            break;
        }

        match shared.expire_overdue(Utc::now()).await {
            Ok(0) => {}
            Ok(expired) => tracing::info!("Marked {expired} overdue actions as timeout"),
            Err(e) => tracing::error!("Deadline cleanup failed: {e}"),
        }

        match shared.release_stale_claims(Utc::now(), TimeDelta::seconds(CLAIM_GRACE_SECS)).await {
            Ok(0) => {}
            Ok(released) => tracing::info!("Returned {released} abandoned claims to the queue"),
            Err(e) => tracing::error!("Claim recovery failed: {e}"),
        }
    }

    tracing::debug!("Deadline cleanup task stopped");
}
