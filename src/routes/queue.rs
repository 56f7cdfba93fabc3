use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::auth::extractor::AdminAuth;
use crate::error::AppError;
use crate::models::{
    ActionPriority, ActionType, ClearRequest, ProcessRequest, ProcessSummary, QueueStatistics,
};
use crate::queue::service::HealthReport;
use crate::state::SharedState;

pub async fn status(
    _auth: AdminAuth,
    State(state): State<SharedState>,
) -> Result<Json<Value>, AppError> {
    let running = state.service.processor().is_running().await;
    let statistics = state.service.statistics().await?;
    Ok(Json(json!({
        "running": running,
        "statistics": statistics,
    })))
}

pub async fn statistics(
    _auth: AdminAuth,
    State(state): State<SharedState>,
) -> Result<Json<QueueStatistics>, AppError> {
    Ok(Json(state.service.statistics().await?))
}

pub async fn health(
    _auth: AdminAuth,
    State(state): State<SharedState>,
) -> Result<(StatusCode, Json<HealthReport>), AppError> {
    let report = state.service.health().await?;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((status, Json(report)))
}

pub async fn process(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Json(req): Json<ProcessRequest>,
) -> Result<Json<ProcessSummary>, AppError> {
    Ok(Json(state.service.process_queue(req).await?))
}

pub async fn clear(
    auth: AdminAuth,
    State(state): State<SharedState>,
    Json(req): Json<ClearRequest>,
) -> Result<Json<Value>, AppError> {
    let deleted = state.service.clear_queue(req).await?;
    tracing::warn!("Queue cleared by {}", auth.actor().unwrap_or("anonymous"));
    Ok(Json(json!({ "deleted_count": deleted })))
}

pub async fn cleanup(
    _auth: AdminAuth,
    State(state): State<SharedState>,
) -> Result<Json<Value>, AppError> {
    let deleted = state.service.cleanup_old_actions().await?;
    Ok(Json(json!({ "deleted_count": deleted })))
}

pub async fn types(
    _auth: AdminAuth,
    State(state): State<SharedState>,
) -> Result<Json<Vec<ActionType>>, AppError> {
    Ok(Json(state.service.action_types().await?))
}

pub async fn priorities(
    _auth: AdminAuth,
    State(state): State<SharedState>,
) -> Result<Json<Vec<ActionPriority>>, AppError> {
    Ok(Json(state.service.priorities().await?))
}
