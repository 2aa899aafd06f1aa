//! services/api/src/web/webhook.rs
//!
//! Payment notifications from the redirect rail. The notification body is never trusted:
//! only its payment id is read, and the status is re-fetched from the provider.

use axum::{body::Bytes, extract::State, response::Json};
use food_diary_core::Reconciliation;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::web::state::AppState;

#[derive(Serialize, ToSchema)]
pub struct WebhookAck {
    ok: bool,
}

/// Extracts `object.id` from a notification body, if it has one.
pub fn notified_payment_id(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value
        .pointer("/object/id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Receive a YooKassa payment notification.
///
/// Always acknowledged with `{"ok": true}` once past the secret check, so the provider
/// does not retry notifications this service chose to ignore.
///
/// Served at `WEBHOOK_PATH`; the documented path is only the default.
#[utoipa::path(
    post,
    path = "/yookassa/webhook",
    request_body(
        content_type = "application/json",
        description = "YooKassa notification; only `object.id` is read."
    ),
    responses(
        (status = 200, description = "Notification acknowledged", body = WebhookAck),
        (status = 401, description = "Wrong or missing shared secret")
    )
)]
pub async fn yookassa_webhook(
    State(app_state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<WebhookAck> {
    let ack = Json(WebhookAck { ok: true });

    let Some(payment_id) = notified_payment_id(&body) else {
        debug!("Webhook without a payment id; ignoring");
        return ack;
    };
    let payments = app_state.engine.payments();
    if !payments.redirect_rail_enabled() {
        debug!("Redirect rail is not configured; ignoring webhook for {}", payment_id);
        return ack;
    }

    match payments.reconcile(&payment_id).await {
        Ok(Reconciliation::Settled {
            status,
            subscription_until,
        }) => info!(
            "Webhook settled payment {} as {} (subscription until {:?})",
            payment_id,
            status.as_str(),
            subscription_until
        ),
        Ok(outcome) => debug!("Webhook for payment {}: {:?}", payment_id, outcome),
        Err(e) => warn!("Could not reconcile payment {} from webhook: {}", payment_id, e),
    }
    ack
}

#[cfg(test)]
mod tests {
    use super::notified_payment_id;

    #[test]
    fn reads_only_the_object_id() {
        let body = br#"{"type":"notification","event":"payment.succeeded","object":{"id":"2d6f","status":"succeeded"}}"#;
        assert_eq!(notified_payment_id(body).as_deref(), Some("2d6f"));
        assert_eq!(notified_payment_id(br#"{"object":{}}"#), None);
        assert_eq!(notified_payment_id(b"not json"), None);
    }
}
