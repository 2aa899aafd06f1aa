pub mod messages;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod webhook;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub use messages::handle_message;
pub use middleware::require_webhook_secret;
pub use rest::health_handler;
pub use webhook::yookassa_webhook;

use state::AppState;

/// Builds the API router: the message endpoint, the secret-gated payment webhook at the
/// configured path, and the health probe.
pub fn router(app_state: Arc<AppState>) -> Router {
    let webhook_routes = Router::new()
        .route(&app_state.config.webhook_path, post(yookassa_webhook))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_webhook_secret,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/messages", post(handle_message))
        .merge(webhook_routes)
        .with_state(app_state)
}
