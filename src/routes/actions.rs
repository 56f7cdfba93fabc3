use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::extractor::AdminAuth;
use crate::error::AppError;
use crate::models::{
    ActionDependency, ActionDetail, ActionStatus, BulkActionRequest, BulkEnqueueResult,
    CreateActionRequest, NewDependency, OrderBy, OrderDirection, ProcessSummary, QueueFilter,
    QueuedAction, UpdateActionRequest,
};
use crate::state::SharedState;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// Comma-separated statuses.
    pub status: Option<String>,
    pub priority: Option<String>,
    pub action_type: Option<String>,
    pub correlation_id: Option<String>,
    pub target_entity_id: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub order_by: Option<OrderBy>,
    pub order_direction: Option<OrderDirection>,
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl ListParams {
    fn into_filter(self) -> Result<QueueFilter, AppError> {
        let status = split_list(self.status.as_deref())
            .iter()
            .map(|s| ActionStatus::from_str(s))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        let defaults = QueueFilter::default();
        Ok(QueueFilter {
            status,
            priority: split_list(self.priority.as_deref()),
            action_type: split_list(self.action_type.as_deref()),
            correlation_id: self.correlation_id,
            target_entity_id: self.target_entity_id,
            created_after: self.created_after,
            created_before: self.created_before,
            limit: self.limit.unwrap_or(defaults.limit),
            offset: self.offset.unwrap_or(defaults.offset),
            order_by: self.order_by.unwrap_or(defaults.order_by),
            order_direction: self.order_direction.unwrap_or(defaults.order_direction),
        })
    }
}

pub async fn list(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<QueuedAction>>, AppError> {
    let actions = state.service.list_actions(params.into_filter()?).await?;
    Ok(Json(actions))
}

pub async fn create(
    auth: AdminAuth,
    State(state): State<SharedState>,
    Json(req): Json<CreateActionRequest>,
) -> Result<(StatusCode, Json<QueuedAction>), AppError> {
    let action = state.service.enqueue_action(req, auth.actor()).await?;
    Ok((StatusCode::CREATED, Json(action)))
}

pub async fn bulk_create(
    auth: AdminAuth,
    State(state): State<SharedState>,
    Json(req): Json<BulkActionRequest>,
) -> Result<(StatusCode, Json<BulkEnqueueResult>), AppError> {
    let result = state.service.enqueue_bulk(req, auth.actor()).await?;
    let status = if result.aborted {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(result)))
}

pub async fn get(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<ActionDetail>, AppError> {
    Ok(Json(state.service.get_action(id).await?))
}

pub async fn update(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateActionRequest>,
) -> Result<Json<QueuedAction>, AppError> {
    Ok(Json(state.service.update_action(id, req).await?))
}

pub async fn delete(
    auth: AdminAuth,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    state.service.delete_action(id).await?;
    tracing::info!(action_id = id, "Action deleted by {}", auth.actor().unwrap_or("anonymous"));
    Ok(Json(json!({ "message": "Deleted" })))
}

pub async fn cancel(
    auth: AdminAuth,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<QueuedAction>, AppError> {
    let action = state.service.cancel_action(id).await?;
    tracing::info!(action_id = id, "Action cancelled by {}", auth.actor().unwrap_or("anonymous"));
    Ok(Json(action))
}

pub async fn retry(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<ProcessSummary>, AppError> {
    Ok(Json(state.service.retry_action(id).await?))
}

pub async fn add_dependency(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<NewDependency>,
) -> Result<(StatusCode, Json<ActionDependency>), AppError> {
    let dependency = state.service.add_dependency(id, req).await?;
    Ok((StatusCode::CREATED, Json(dependency)))
}
