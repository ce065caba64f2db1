use axum::{extract::State, response::IntoResponse};

use crate::handlers::ErrorResponse;
use crate::state::AppState;

/// Prometheus metrics endpoint
#[tracing::instrument(skip(state))]
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => ErrorResponse::new("not_found", "Metrics recorder is not installed").into_response(),
    }
}
