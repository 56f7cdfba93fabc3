pub mod auth;
pub mod config;
pub mod control;
pub mod db;
pub mod error;
pub mod events;
pub mod handlers;
pub mod models;
pub mod queue;
pub mod routes;
pub mod state;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub fn build_app(state: SharedState) -> Router {
    let max_body_size = state.config.max_body_size;

    Router::new()
        .merge(routes::api_routes())
        .route("/health", axum::routing::get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(max_body_size)),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
