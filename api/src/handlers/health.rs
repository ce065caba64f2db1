use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub scheduler_running: bool,
    pub message_types: usize,
}

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub message: &'static str,
}

/// Liveness with build identity
#[tracing::instrument]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness: the process is serving and reports what it hosts
#[tracing::instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        status: "ready",
        scheduler_running: state.scheduler.is_running().await,
        message_types: state.processors.len(),
    })
}

pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse { message: "pong" })
}
