//! HTTP request handlers.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::session::{ExecutionResult, SessionError, SessionInfo};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub sessions: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.sessions.len(),
    })
}

/// Body of `POST /execute`.
///
/// `code` is optional at the type level so a missing field gets its own error message.
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub id: Option<String>,
    pub code: Option<String>,
    /// Close the session right after this call.
    #[serde(default)]
    pub ephemeral: bool,
}

#[instrument(skip_all)]
pub async fn execute(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> ApiResult<Json<ExecutionResult>> {
    let Json(request) =
        payload.map_err(|e| ApiError::bad_request(format!("Invalid request body: {}", e.body_text())))?;
    let code = request
        .code
        .ok_or_else(|| ApiError::bad_request("Missing required field: 'code'"))?;

    let result = state
        .sessions
        .execute(request.id.as_deref(), &code, request.ephemeral)
        .await?;
    Ok(Json(result))
}

pub async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed("Method not allowed")
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.sessions.list().await)
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    match state.sessions.close(&session_id).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(SessionError::NotFound(id)) => Err(ApiError::not_found(format!("Session not found: {id}"))),
        Err(e) => Err(e.into()),
    }
}
