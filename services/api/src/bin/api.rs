//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, OpenFoodFactsAdapter, PostgresConversationStore, YooKassaAdapter},
    config::{Config, ConversationStoreKind},
    error::ApiError,
    web::{rest::ApiDoc, router, state::AppState},
};
use axum::{
    extract::DefaultBodyLimit,
    http::{header::CONTENT_TYPE, Method},
    Router,
};
use food_diary_core::memory::InMemoryConversationStore;
use food_diary_core::ports::{BarcodeCatalog, ConversationStore, PaymentGateway};
use food_diary_core::ConversationEngine;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool.clone()));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let states: Arc<dyn ConversationStore> = match config.conversation_store {
        ConversationStoreKind::Memory => Arc::new(InMemoryConversationStore::new()),
        ConversationStoreKind::Postgres => Arc::new(PostgresConversationStore::new(db_pool)),
    };

    let barcodes: Option<Arc<dyn BarcodeCatalog>> = if config.off_enabled {
        Some(Arc::new(OpenFoodFactsAdapter::new(
            config.off_api_base.clone(),
            config.off_timeout,
        )?))
    } else {
        info!("Barcode lookups are disabled.");
        None
    };

    let gateway: Option<Arc<dyn PaymentGateway>> = match &config.yookassa {
        Some(yookassa) => Some(Arc::new(YooKassaAdapter::new(yookassa.clone())?)),
        None => {
            warn!(
                "YOOKASSA_SHOP_ID / YOOKASSA_SECRET_KEY not set; \
                 the redirect payment rail is disabled."
            );
            None
        }
    };
    if config.admin_username.is_none() {
        warn!("ADMIN_USERNAME is not set; nobody has access to the admin menu.");
    }

    // --- 4. Build the Shared AppState ---
    let engine = Arc::new(ConversationEngine::new(
        db_adapter,
        states,
        barcodes,
        gateway,
        config.admin_username.clone(),
    ));
    let app_state = Arc::new(AppState {
        engine,
        config: config.clone(),
    });

    // --- 5. Create the Web Router ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    let api_router = router(app_state)
        .layer(DefaultBodyLimit::max(256 * 1024))
        .layer(cors);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!("Payment webhook listening at {}", config.webhook_path);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
