use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::models::setting::{
    COMPLETED_RETENTION_DAYS, DEAD_LETTER_RETENTION_DAYS, MAX_CONCURRENT_WORKERS,
    WORKER_POLL_INTERVAL_MS,
};
use crate::models::QueueSetting;

pub const MAX_WORKERS: usize = 20;
pub const MIN_POLL_INTERVAL_MS: i64 = 10;

/// Processor tuning. `poll_interval` is read on every tick; `worker_count` only at start.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeSettings {
    pub worker_count: usize,
    /// Worker count recorded while running, applied by the next `start`.
    pub pending_worker_count: Option<usize>,
    pub poll_interval: Duration,
    pub cleanup_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            worker_count: 5,
            pending_worker_count: None,
            poll_interval: Duration::from_millis(1000),
            cleanup_interval: Duration::from_secs(10 * 60),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// When an accepted setting change takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingEffect {
    Live,
    OnRestart,
    Stored,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettingUpdate {
    pub setting: QueueSetting,
    pub effect: SettingEffect,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SettingsReport {
    pub updated: Vec<SettingUpdate>,
    pub errors: BTreeMap<String, String>,
}

impl RuntimeSettings {
    /// Fold a stored value into the live settings. Invalid values are ignored.
    pub fn apply(&mut self, key: &str, value: &str, running: bool) -> SettingEffect {
        let Ok(parsed) = validate(key, value) else {
            return SettingEffect::Stored;
        };
        match key {
            MAX_CONCURRENT_WORKERS => {
                let count = parsed as usize;
                if running {
                    self.pending_worker_count = Some(count);
                    SettingEffect::OnRestart
                } else {
                    self.worker_count = count;
                    self.pending_worker_count = None;
                    SettingEffect::Live
                }
            }
            WORKER_POLL_INTERVAL_MS => {
                self.poll_interval = Duration::from_millis(parsed as u64);
                SettingEffect::Live
            }
            _ => SettingEffect::Stored,
        }
    }

    /// Promote a recorded worker count; called when the pool starts.
    pub fn take_pending(&mut self) {
        if let Some(count) = self.pending_worker_count.take() {
            self.worker_count = count;
        }
    }
}

/// Parse and range-check a value for one of the known queue settings.
pub fn validate(key: &str, value: &str) -> Result<i64, String> {
    let parsed: i64 = value
        .trim()
        .parse()
        .map_err(|_| format!("{key} must be an integer"))?;

    let (min, max) = match key {
        MAX_CONCURRENT_WORKERS => (1, MAX_WORKERS as i64),
        WORKER_POLL_INTERVAL_MS => (MIN_POLL_INTERVAL_MS, i64::from(u32::MAX)),
        COMPLETED_RETENTION_DAYS | DEAD_LETTER_RETENTION_DAYS => (1, 3650),
        _ => return Err(format!("unknown setting: {key}")),
    };

    if !(min..=max).contains(&parsed) {
        return Err(format!("{key} must be between {min} and {max}"));
    }
    Ok(parsed)
}
