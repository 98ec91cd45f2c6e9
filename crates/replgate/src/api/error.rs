//! API error type and its JSON response shape.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::interpreter::BridgeError;
use crate::session::SessionError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    MethodNotAllowed(String),

    #[error("{0}")]
    RequestTimeout(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn method_not_allowed(msg: impl Into<String>) -> Self {
        Self::MethodNotAllowed(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::RequestTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::NotFound(_) => "NOT_FOUND",
            Self::MethodNotAllowed(_) => "METHOD_NOT_ALLOWED",
            Self::RequestTimeout(_) => "EXECUTION_TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Dead and never-existing sessions both come back as a 400, so clients see one outcome.
impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(id) => Self::BadRequest(format!("Unknown session id: {id}")),
            SessionError::ShuttingDown => Self::internal("Server is shutting down"),
            SessionError::Bridge(BridgeError::Timeout(limit)) => Self::RequestTimeout(format!(
                "Execution timed out after {}ms; the session was terminated",
                limit.as_millis()
            )),
            SessionError::Bridge(e @ BridgeError::Spawn(_)) => {
                Self::internal(format!("Failed to start interpreter: {e}"))
            }
            SessionError::Bridge(e) => Self::internal(format!("Interpreter failure: {e}")),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::Internal(msg) => {
                error!(error_code = code, message = %msg, "API error");
            }
            ApiError::RequestTimeout(msg) => {
                warn!(error_code = code, message = %msg, "Execution timeout");
            }
            _ => {
                tracing::debug!(error_code = code, message = %message, "Client error");
            }
        }

        let body = ErrorResponse {
            error: message,
            code,
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::interpreter::StreamKind;

    #[test]
    fn test_unknown_session_is_bad_request() {
        let api_err = ApiError::from(SessionError::NotFound("abc".to_string()));
        assert!(matches!(&api_err, ApiError::BadRequest(msg) if msg.contains("abc")));
        assert_eq!(api_err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_timeout_is_request_timeout() {
        let api_err = ApiError::from(SessionError::Bridge(BridgeError::Timeout(
            Duration::from_secs(2),
        )));
        assert_eq!(api_err.status_code(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(api_err.error_code(), "EXECUTION_TIMEOUT");
    }

    #[test]
    fn test_fatal_bridge_errors_are_internal() {
        let spawn = ApiError::from(SessionError::Bridge(BridgeError::Spawn(
            "python3: not found".to_string(),
        )));
        assert_eq!(spawn.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(spawn.to_string().contains("Failed to start interpreter"));

        let write = ApiError::from(SessionError::Bridge(BridgeError::Write(
            std::io::Error::from(std::io::ErrorKind::BrokenPipe),
        )));
        assert_eq!(write.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let read = ApiError::from(SessionError::Bridge(BridgeError::Read {
            stream: StreamKind::Stdout,
            reason: "eof".to_string(),
        }));
        assert_eq!(read.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::bad_request("").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::not_found("").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::method_not_allowed("").status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            ApiError::internal("").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
