//! services/api/src/web/rest.rs
//!
//! Contains the health endpoint and the master definition for the OpenAPI specification.

use axum::response::{IntoResponse, Json};
use serde::Serialize;
use utoipa::{OpenApi, ToSchema};

use crate::web::protocol::{InboundMessage, InboundPayload, OutboundReplies, OutboundReply};
use crate::web::webhook::WebhookAck;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        crate::web::messages::handle_message,
        crate::web::webhook::yookassa_webhook,
    ),
    components(
        schemas(
            HealthResponse,
            InboundMessage,
            InboundPayload,
            OutboundReplies,
            OutboundReply,
            WebhookAck
        )
    ),
    tags(
        (
            name = "Food Diary API",
            description = "Conversation and payment endpoints of the food diary assistant."
        )
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    status: &'static str,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "The service is up", body = HealthResponse)
    )
)]
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}
