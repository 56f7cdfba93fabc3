use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use serde_json::Value;

use crate::auth::extractor::AdminAuth;
use crate::error::AppError;
use crate::models::QueueSetting;
use crate::queue::SettingsReport;
use crate::state::SharedState;

pub async fn list(
    _auth: AdminAuth,
    State(state): State<SharedState>,
) -> Result<Json<Vec<QueueSetting>>, AppError> {
    Ok(Json(state.service.settings().await?))
}

/// Accepts `{"key": value, ...}`; numbers and strings are both taken as the raw value.
pub async fn update(
    _auth: AdminAuth,
    State(state): State<SharedState>,
    Json(req): Json<BTreeMap<String, Value>>,
) -> Result<Json<SettingsReport>, AppError> {
    if req.is_empty() {
        return Err(AppError::BadRequest("No settings provided".to_string()));
    }

    let changes = req
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect();

    Ok(Json(state.service.update_settings(changes).await?))
}
