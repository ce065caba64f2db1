// Request id scoping for handlers and error responses

use axum::{extract::Request, middleware::Next, response::Response};
use tower_http::request_id::RequestId;

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Header carrying the request id in both directions
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The id assigned by `SetRequestIdLayer`, if it is valid UTF-8
pub fn from_request<B>(request: &axum::http::Request<B>) -> Option<&str> {
    request
        .extensions()
        .get::<RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
}

/// Run the rest of the stack with the request id in scope
pub async fn scope_request_id(request: Request, next: Next) -> Response {
    match from_request(&request).map(str::to_string) {
        Some(id) => REQUEST_ID.scope(id, next.run(request)).await,
        None => next.run(request).await,
    }
}

/// Request id of the request being handled on this task
pub fn current() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}
