//! Test utilities and common setup.

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode, header};
use replgate::api;
use replgate::config::InterpreterConfig;
use replgate::session::SessionRegistry;
use serde_json::Value;
use tower::ServiceExt;

/// Create a test application backed by `/bin/sh` sessions.
///
/// Returns the registry too so tests can check how many sessions exist.
#[allow(dead_code)]
pub fn test_app() -> (Router, SessionRegistry) {
    test_app_with(InterpreterConfig::posix_shell())
}

pub fn test_app_with(config: InterpreterConfig) -> (Router, SessionRegistry) {
    let sessions = SessionRegistry::new(config);
    let router = api::create_router(api::AppState::new(sessions.clone()));
    (router, sessions)
}

/// POST a raw body to `/execute`.
pub async fn post_execute(app: &Router, body: impl Into<Body>) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .uri("/execute")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
                .unwrap(),
        )
        .await
        .unwrap()
}

/// POST a JSON value to `/execute` and decode the response.
pub async fn execute_json(app: &Router, payload: Value) -> (StatusCode, Value) {
    let response = post_execute(app, serde_json::to_string(&payload).unwrap()).await;
    let status = response.status();
    (status, body_json(response).await)
}

pub async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// True when `python3` can be started, so python-specific tests can skip otherwise.
#[allow(dead_code)]
pub fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
