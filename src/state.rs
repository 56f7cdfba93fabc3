use std::sync::Arc;

use crate::config::Config;
use crate::queue::QueueService;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub service: Arc<QueueService>,
    pub config: Config,
}
