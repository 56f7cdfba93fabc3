use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ActionStatus;

/// Raw aggregates read from the store.
#[derive(Debug, Clone, Default)]
pub struct QueueCounts {
    pub by_status: BTreeMap<ActionStatus, i64>,
    pub by_priority: BTreeMap<String, i64>,
    pub by_type: BTreeMap<String, i64>,
    pub avg_execution_ms: Option<f64>,
    pub oldest_pending: Option<DateTime<Utc>>,
    pub last_processed: Option<DateTime<Utc>>,
}

impl QueueCounts {
    pub fn count(&self, status: ActionStatus) -> i64 {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueHealth {
    Healthy,
    Active,
    Warning,
    Critical,
}

impl QueueHealth {
    pub fn from_load(pending: i64, processing: i64) -> Self {
        if pending > 100 {
            QueueHealth::Critical
        } else if pending > 50 {
            QueueHealth::Warning
        } else if pending > 0 || processing > 0 {
            QueueHealth::Active
        } else {
            QueueHealth::Healthy
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Processing,
    Stopped,
}

/// Process-local view of one worker; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub state: WorkerState,
    pub current_action_id: Option<i64>,
    pub last_activity: DateTime<Utc>,
    pub processed_count: u64,
    pub error_count: u64,
}

impl WorkerStatus {
    pub fn idle(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            state: WorkerState::Idle,
            current_action_id: None,
            last_activity: Utc::now(),
            processed_count: 0,
            error_count: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatistics {
    pub total_actions: i64,
    pub pending_actions: i64,
    pub processing_actions: i64,
    pub retrying_actions: i64,
    pub completed_actions: i64,
    pub failed_actions: i64,
    pub cancelled_actions: i64,
    pub timeout_actions: i64,
    pub actions_by_status: BTreeMap<String, i64>,
    pub actions_by_priority: BTreeMap<String, i64>,
    pub actions_by_type: BTreeMap<String, i64>,
    pub avg_execution_time_ms: f64,
    pub success_rate: f64,
    pub queue_health: QueueHealth,
    pub oldest_pending_action: Option<DateTime<Utc>>,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub worker_status: Vec<WorkerStatus>,
}

impl QueueStatistics {
    pub fn from_counts(counts: QueueCounts, workers: Vec<WorkerStatus>) -> Self {
        let completed = counts.count(ActionStatus::Completed);
        let failed = counts.count(ActionStatus::Failed);
        let pending = counts.count(ActionStatus::Pending);
        let processing = counts.count(ActionStatus::Processing);

        let success_rate = if completed + failed > 0 {
            completed as f64 / (completed + failed) as f64 * 100.0
        } else {
            0.0
        };

        Self {
            total_actions: counts.by_status.values().sum(),
            pending_actions: pending,
            processing_actions: processing,
            retrying_actions: counts.count(ActionStatus::Retrying),
            completed_actions: completed,
            failed_actions: failed,
            cancelled_actions: counts.count(ActionStatus::Cancelled),
            timeout_actions: counts.count(ActionStatus::Timeout),
            actions_by_status: counts
                .by_status
                .iter()
                .map(|(status, count)| (status.to_string(), *count))
                .collect(),
            actions_by_priority: counts.by_priority,
            actions_by_type: counts.by_type,
            avg_execution_time_ms: counts.avg_execution_ms.unwrap_or(0.0),
            success_rate,
            queue_health: QueueHealth::from_load(pending, processing),
            oldest_pending_action: counts.oldest_pending,
            last_processed_at: counts.last_processed,
            worker_status: workers,
        }
    }
}
