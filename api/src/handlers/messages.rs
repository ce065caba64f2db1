use axum::{extract::State, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::handlers::{ErrorResponse, SuccessResponse};
use crate::state::AppState;
use common::messaging::processors::hello::{HelloEvent, HELLO_MESSAGE_TYPE};

const MAX_CONTENT_CHARS: usize = 1000;
const MAX_SENDER_CHARS: usize = 100;

/// Request to publish a hello message
#[derive(Debug, Deserialize)]
pub struct PublishHelloRequest {
    pub content: String,
    pub sender: String,
}

impl PublishHelloRequest {
    fn validate(&self) -> Result<(), ErrorResponse> {
        check_length("content", &self.content, MAX_CONTENT_CHARS)?;
        check_length("sender", &self.sender, MAX_SENDER_CHARS)
    }
}

fn check_length(field: &str, value: &str, max: usize) -> Result<(), ErrorResponse> {
    let chars = value.chars().count();
    if chars == 0 || chars > max {
        return Err(ErrorResponse::new(
            "validation_error",
            format!("{} must be between 1 and {} characters", field, max),
        )
        .with_details(serde_json::json!({ "field": field, "length": chars })));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub message_id: String,
    pub message_type: String,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct MessageTypesResponse {
    pub types: Vec<String>,
}

/// Message types the processor registry can dispatch
#[tracing::instrument(skip(state))]
pub async fn list_types(State(state): State<AppState>) -> SuccessResponse<MessageTypesResponse> {
    SuccessResponse::new(MessageTypesResponse {
        types: state.processors.registered_types().into_iter().collect(),
    })
}

/// Publish a hello message to the configured exchange
#[tracing::instrument(skip(state, req))]
pub async fn publish_hello(
    State(state): State<AppState>,
    Json(req): Json<PublishHelloRequest>,
) -> Result<SuccessResponse<PublishResponse>, ErrorResponse> {
    req.validate()?;

    let event = HelloEvent {
        content: req.content,
        sender: req.sender,
        timestamp: Utc::now().timestamp(),
    };

    let messages = &state.config.messages;
    let envelope = state
        .publisher
        .publish_event(
            &messages.hello_exchange,
            &messages.hello_routing_key,
            HELLO_MESSAGE_TYPE,
            &event,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to publish hello message");
            ErrorResponse::new(
                "queue_unavailable",
                format!("Failed to publish message: {}", e),
            )
        })?;

    tracing::info!(
        message_id = %envelope.message_id,
        sender = %event.sender,
        "Hello message published"
    );

    Ok(SuccessResponse::new(PublishResponse {
        message_id: envelope.message_id,
        message_type: envelope.message_type,
        timestamp: envelope.timestamp,
    }))
}
