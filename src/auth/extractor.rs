use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::state::SharedState;

const ACTOR_HEADER: &str = "x-actor";

/// Operator access to the admin API.
///
/// When an admin token is configured every request must carry it as a bearer token.
/// The optional `X-Actor` header names who is acting and ends up in `created_by`.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    pub actor: Option<String>,
}

impl AdminAuth {
    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }
}

impl FromRequestParts<SharedState> for AdminAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(expected) = &state.config.admin_token {
            let auth_str = parts
                .headers
                .get(AUTHORIZATION)
                .ok_or_else(|| AppError::Unauthorized("Missing authorization header".to_string()))?
                .to_str()
                .map_err(|_| AppError::Unauthorized("Invalid authorization header".to_string()))?;

            let token = auth_str
                .strip_prefix("Bearer ")
                .ok_or_else(|| AppError::Unauthorized("Expected a bearer token".to_string()))?;

            if !bool::from(token.as_bytes().ct_eq(expected.as_bytes())) {
                return Err(AppError::Unauthorized("Invalid token".to_string()));
            }
        }

        let actor = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        Ok(AdminAuth { actor })
    }
}
