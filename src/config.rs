use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use crate::models::setting::{MAX_CONCURRENT_WORKERS, WORKER_POLL_INTERVAL_MS};
use crate::queue::settings::{MAX_WORKERS, MIN_POLL_INTERVAL_MS};
use crate::queue::RuntimeSettings;

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection; `None` runs the queue in memory.
    pub database_url: Option<String>,
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub admin_token: Option<String>,
    pub max_body_size: usize,
    /// Set only when the environment names it; then it overrides the stored setting.
    pub worker_count: Option<usize>,
    pub poll_interval: Option<Duration>,
    pub cleanup_interval: Duration,
    pub shutdown_timeout: Duration,
    pub control: Option<ControlConfig>,
}

#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env_optional("DATABASE_URL");

        let host: IpAddr = env_or("HOMEQUEUE_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid HOMEQUEUE_HOST: {e}"))?;

        let port: u16 = env_or("HOMEQUEUE_PORT", "3000")
            .parse()
            .map_err(|e| format!("Invalid HOMEQUEUE_PORT: {e}"))?;

        let log_level = env_or("HOMEQUEUE_LOG_LEVEL", "info");
        let admin_token = env_optional("HOMEQUEUE_ADMIN_TOKEN");

        let max_body_size: usize = env_or("HOMEQUEUE_MAX_BODY_SIZE", "1048576")
            .parse()
            .map_err(|e| format!("Invalid HOMEQUEUE_MAX_BODY_SIZE: {e}"))?;

        let worker_count = match env_optional("HOMEQUEUE_WORKER_COUNT") {
            Some(raw) => {
                let count: usize = raw
                    .parse()
                    .map_err(|e| format!("Invalid HOMEQUEUE_WORKER_COUNT: {e}"))?;
                if !(1..=MAX_WORKERS).contains(&count) {
                    return Err(format!("HOMEQUEUE_WORKER_COUNT must be between 1 and {MAX_WORKERS}"));
                }
                Some(count)
            }
            None => None,
        };

        let poll_interval = match env_optional("HOMEQUEUE_POLL_INTERVAL_MS") {
            Some(raw) => {
                let millis: u64 = raw
                    .parse()
                    .map_err(|e| format!("Invalid HOMEQUEUE_POLL_INTERVAL_MS: {e}"))?;
                if millis < MIN_POLL_INTERVAL_MS as u64 {
                    return Err(format!(
                        "HOMEQUEUE_POLL_INTERVAL_MS must be at least {MIN_POLL_INTERVAL_MS}"
                    ));
                }
                Some(Duration::from_millis(millis))
            }
            None => None,
        };
        let cleanup_interval = Duration::from_secs(
            env_or("HOMEQUEUE_CLEANUP_INTERVAL_SECS", "600")
                .parse()
                .map_err(|e| format!("Invalid HOMEQUEUE_CLEANUP_INTERVAL_SECS: {e}"))?,
        );
        let shutdown_timeout = Duration::from_secs(
            env_or("HOMEQUEUE_SHUTDOWN_TIMEOUT_SECS", "30")
                .parse()
                .map_err(|e| format!("Invalid HOMEQUEUE_SHUTDOWN_TIMEOUT_SECS: {e}"))?,
        );

        let control = match env_optional("HOMEQUEUE_CONTROL_URL") {
            Some(base_url) => Some(ControlConfig {
                base_url,
                timeout: Duration::from_secs(
                    env_or("HOMEQUEUE_CONTROL_TIMEOUT_SECS", "30")
                        .parse()
                        .map_err(|e| format!("Invalid HOMEQUEUE_CONTROL_TIMEOUT_SECS: {e}"))?,
                ),
            }),
            None => None,
        };

        Ok(Config {
            database_url,
            host,
            port,
            log_level,
            admin_token,
            max_body_size,
            worker_count,
            poll_interval,
            cleanup_interval,
            shutdown_timeout,
            control,
        })
    }

    /// Processor settings before the stored queue settings are loaded.
    pub fn runtime_settings(&self) -> RuntimeSettings {
        let defaults = RuntimeSettings::default();
        RuntimeSettings {
            worker_count: self.worker_count.unwrap_or(defaults.worker_count),
            pending_worker_count: None,
            poll_interval: self.poll_interval.unwrap_or(defaults.poll_interval),
            cleanup_interval: self.cleanup_interval,
            shutdown_timeout: self.shutdown_timeout,
        }
    }

    /// Queue settings the environment pins. Written to the store before the
    /// processor starts so they take precedence over stored values.
    pub fn setting_overrides(&self) -> BTreeMap<String, String> {
        let mut overrides = BTreeMap::new();
        if let Some(count) = self.worker_count {
            overrides.insert(MAX_CONCURRENT_WORKERS.to_string(), count.to_string());
        }
        if let Some(interval) = self.poll_interval {
            overrides.insert(WORKER_POLL_INTERVAL_MS.to_string(), interval.as_millis().to_string());
        }
        overrides
    }
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
