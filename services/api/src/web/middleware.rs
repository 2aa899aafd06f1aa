//! services/api/src/web/middleware.rs
//!
//! Shared-secret gate for the payment webhook.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::web::state::AppState;

/// Middleware that compares the `Authorization` header with the configured webhook secret.
///
/// Without a configured secret every request passes. On a mismatch the request is
/// answered with 401 and never reaches the handler.
pub async fn require_webhook_secret(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(secret) = state.config.webhook_secret.as_deref() {
        let presented = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if presented != secret {
            warn!("Rejected a webhook call with a wrong or missing secret");
            return (StatusCode::UNAUTHORIZED, Json(json!({ "ok": false }))).into_response();
        }
    }
    next.run(req).await
}
