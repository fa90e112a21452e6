//! Plain HTTP handlers.

use axum::{Json, extract::State, response::Html};
use serde::Serialize;
use std::sync::Arc;

use super::AppState;
use crate::version;

/// Embedded client page. `{{port}}` is replaced with the HTTP port.
const FRONTEND_HTML: &str = include_str!("../../frontend/index.html");

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Worker processes per connection.
    pub workers: usize,
    pub timeout_secs: u64,
}

pub async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(FRONTEND_HTML.replace("{{port}}", &state.http_port.to_string()))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: version::full_version(),
        workers: state.dispatcher.pool.worker_count,
        timeout_secs: state.dispatcher.timeout.as_secs(),
    })
}
