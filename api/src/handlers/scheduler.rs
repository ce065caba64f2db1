use axum::extract::State;
use serde::Serialize;

use crate::handlers::SuccessResponse;
use crate::state::AppState;
use common::scheduler::JobStatus;

/// Scheduled jobs listing
#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub jobs: Vec<JobStatus>,
    pub jobs_count: usize,
    pub running: bool,
}

/// Outcome of a start or stop request
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub running: bool,
    /// False when the scheduler was already in the requested state
    pub changed: bool,
    pub message: String,
}

/// List every scheduled job with its next and last run
#[tracing::instrument(skip(state))]
pub async fn list_jobs(State(state): State<AppState>) -> SuccessResponse<JobsResponse> {
    let jobs = state.scheduler.status().await;
    let running = state.scheduler.is_running().await;

    SuccessResponse::new(JobsResponse {
        jobs_count: jobs.len(),
        jobs,
        running,
    })
}

#[tracing::instrument(skip(state))]
pub async fn start_scheduler(State(state): State<AppState>) -> SuccessResponse<ControlResponse> {
    let changed = state.scheduler.start().await;
    let running = state.scheduler.is_running().await;

    let message = match (changed, running) {
        (true, _) => "Scheduler started",
        (false, true) => "Scheduler already running",
        (false, false) => "Scheduler is disabled",
    };
    tracing::info!(changed, running, "{}", message);

    SuccessResponse::new(ControlResponse {
        running,
        changed,
        message: message.to_string(),
    })
}

#[tracing::instrument(skip(state))]
pub async fn stop_scheduler(State(state): State<AppState>) -> SuccessResponse<ControlResponse> {
    let changed = state.scheduler.stop().await;

    let message = if changed {
        "Scheduler stopped"
    } else {
        "Scheduler already stopped"
    };
    tracing::info!(changed, "{}", message);

    SuccessResponse::new(ControlResponse {
        running: state.scheduler.is_running().await,
        changed,
        message: message.to_string(),
    })
}
