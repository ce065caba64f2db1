use axum::{
    extract::Request,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware::request_id::{self, REQUEST_ID_HEADER};
use crate::state::AppState;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Create the main application router with all routes and middleware
#[tracing::instrument(skip(state))]
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let scheduler_routes = Router::new()
        .route("/jobs", get(handlers::scheduler::list_jobs))
        .route("/start", post(handlers::scheduler::start_scheduler))
        .route("/stop", post(handlers::scheduler::stop_scheduler));

    let message_routes = Router::new()
        .route("/types", get(handlers::messages::list_types))
        .route("/hello/publish", post(handlers::messages::publish_hello));

    // Metrics endpoint for Prometheus scraping
    let metrics_routes = Router::new().route("/metrics", get(handlers::metrics::metrics_handler));

    let request_id_header = axum::http::HeaderName::from_static(REQUEST_ID_HEADER);
    let trace = TraceLayer::new_for_http().make_span_with(|request: &Request| {
        tracing::info_span!(
            "http_request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = request_id::from_request(request).unwrap_or_default(),
        )
    });

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/ping", get(handlers::health::ping))
        .nest("/api/v1/scheduler", scheduler_routes)
        .nest("/api/v1/messages", message_routes)
        .merge(metrics_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(
                    request_id_header.clone(),
                    MakeRequestUuid,
                ))
                .layer(trace)
                .layer(PropagateRequestIdLayer::new(request_id_header))
                .layer(axum::middleware::from_fn(request_id::scope_request_id))
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
                .layer(cors),
        )
        .with_state(state)
}
