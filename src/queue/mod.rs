//! Scheduling core: validation, dispatch, the worker pool and the service façade.

pub mod dispatch;
pub mod processor;
pub mod retry;
pub mod service;
pub mod settings;
pub mod validation;
mod worker;

pub use dispatch::{Dispatcher, Outcome};
pub use processor::Processor;
pub use service::QueueService;
pub use settings::{RuntimeSettings, SettingEffect, SettingUpdate, SettingsReport};

use crate::db::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
