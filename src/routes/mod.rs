pub mod actions;
pub mod events;
pub mod queue;
pub mod settings;

use axum::routing::{get, post};
use axum::Router;

use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        // Queue
        .route("/api/v1/queue/status", get(queue::status))
        .route("/api/v1/queue/statistics", get(queue::statistics))
        .route("/api/v1/queue/health", get(queue::health))
        .route("/api/v1/queue/process", post(queue::process))
        .route("/api/v1/queue/clear", post(queue::clear))
        .route("/api/v1/queue/cleanup", post(queue::cleanup))
        .route("/api/v1/queue/types", get(queue::types))
        .route("/api/v1/queue/priorities", get(queue::priorities))
        // Actions
        .route(
            "/api/v1/queue/actions",
            get(actions::list).post(actions::create),
        )
        .route("/api/v1/queue/actions/bulk", post(actions::bulk_create))
        .route(
            "/api/v1/queue/actions/{id}",
            get(actions::get)
                .put(actions::update)
                .delete(actions::delete),
        )
        .route("/api/v1/queue/actions/{id}/cancel", post(actions::cancel))
        .route("/api/v1/queue/actions/{id}/retry", post(actions::retry))
        .route(
            "/api/v1/queue/actions/{id}/dependencies",
            post(actions::add_dependency),
        )
        // Settings
        .route(
            "/api/v1/queue/settings",
            get(settings::list).put(settings::update),
        )
        // Events
        .route("/api/v1/queue/events", get(events::stream))
}
