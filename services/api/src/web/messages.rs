//! services/api/src/web/messages.rs
//!
//! The inbound message endpoint: one transport update in, the engine's replies out.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use food_diary_core::PortError;
use std::sync::Arc;
use tracing::{error, warn};

use crate::web::protocol::{InboundMessage, OutboundReplies, OutboundReply};
use crate::web::state::AppState;

fn port_error_status(e: &PortError) -> StatusCode {
    match e {
        PortError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        PortError::Unauthorized => StatusCode::FORBIDDEN,
        PortError::NotFound(_) | PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Apply one user update to the conversation.
///
/// Updates from the same sender are processed strictly in arrival order.
#[utoipa::path(
    post,
    path = "/messages",
    request_body = InboundMessage,
    responses(
        (status = 200, description = "Replies to render, in order", body = OutboundReplies),
        (status = 400, description = "Unknown command id or malformed callback data"),
        (status = 500, description = "Internal server error"),
        (status = 503, description = "A dependency is unavailable")
    )
)]
pub async fn handle_message(
    State(app_state): State<Arc<AppState>>,
    Json(inbound): Json<InboundMessage>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let message = inbound.into_incoming().map_err(|e| {
        warn!("Rejected inbound message: {}", e);
        (StatusCode::BAD_REQUEST, e.to_string())
    })?;
    let sender = message.sender;

    let replies = app_state.engine.handle(message).await.map_err(|e| {
        error!("Failed to handle a message from user {}: {:?}", sender, e);
        (port_error_status(&e), "Failed to handle the message".to_string())
    })?;

    Ok(Json(OutboundReplies {
        replies: replies.into_iter().map(OutboundReply::from).collect(),
    }))
}
