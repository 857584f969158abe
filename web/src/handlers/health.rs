//! Health check endpoints.

use crate::state::{AppState, Readiness};
use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"`
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
}

/// `GET /health`: the process is up. Dependencies are not checked.
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness response.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    /// Overall readiness
    pub ready: bool,
    /// Per-dependency status
    #[serde(flatten)]
    pub checks: Readiness,
}

/// `GET /ready`: 200 when Postgres and Redis answer, 503 otherwise.
pub async fn readiness_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let checks = state.readiness.check().await;
    let ready = checks.is_ready();
    let status = if ready {
        StatusCode::OK
    } else {
        tracing::warn!(database = checks.database, lock_store = checks.lock_store, "Not ready");
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ReadinessResponse { ready, checks }))
}
