//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

const DEFAULT_OFF_API_BASE: &str = "https://world.openfoodfacts.org";
const DEFAULT_YOOKASSA_API_BASE: &str = "https://api.yookassa.ru";
const DEFAULT_WEBHOOK_PATH: &str = "/yookassa/webhook";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Where in-flight conversation steps are kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversationStoreKind {
    /// Process memory; steps are lost on restart.
    Memory,
    /// The shared database; steps survive restarts and are visible to every instance.
    Postgres,
}

/// Credentials for the redirect payment rail. Present only when both halves are set.
#[derive(Clone, Debug)]
pub struct YooKassaConfig {
    pub shop_id: String,
    pub secret_key: String,
    pub return_url: String,
    pub api_base: String,
    pub timeout: Duration,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub admin_username: Option<String>,
    pub webhook_path: String,
    pub webhook_secret: Option<String>,
    pub yookassa: Option<YooKassaConfig>,
    pub off_enabled: bool,
    pub off_api_base: String,
    pub off_timeout: Duration,
    pub conversation_store: ConversationStoreKind,
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn seconds_var(name: &str, default: u64) -> Result<Duration, ConfigError> {
    match optional_var(name) {
        None => Ok(Duration::from_secs(default)),
        Some(raw) => raw.parse::<u64>().map(Duration::from_secs).map_err(|_| {
            ConfigError::InvalidValue(
                name.to_string(),
                format!("'{}' is not a number of seconds", raw),
            )
        }),
    }
}

fn flag_var(name: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_var(name).map(|v| v.to_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("'{}' is not a boolean", v),
        )),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Conversation Settings ---
        let admin_username = optional_var("ADMIN_USERNAME");
        let conversation_store = match optional_var("CONVERSATION_STORE").as_deref() {
            None | Some("memory") => ConversationStoreKind::Memory,
            Some("postgres") => ConversationStoreKind::Postgres,
            Some(other) => {
                return Err(ConfigError::InvalidValue(
                    "CONVERSATION_STORE".to_string(),
                    format!("'{}' is neither 'memory' nor 'postgres'", other),
                ))
            }
        };

        // --- Barcode Catalog ---
        let off_enabled = flag_var("OFF_ENABLED", true)?;
        let off_api_base =
            optional_var("OFF_API_BASE").unwrap_or_else(|| DEFAULT_OFF_API_BASE.to_string());
        let off_timeout = seconds_var("OFF_TIMEOUT", 8)?;

        // --- Payments ---
        let webhook_path =
            optional_var("WEBHOOK_PATH").unwrap_or_else(|| DEFAULT_WEBHOOK_PATH.to_string());
        if !webhook_path.starts_with('/') {
            return Err(ConfigError::InvalidValue(
                "WEBHOOK_PATH".to_string(),
                format!("'{}' must start with '/'", webhook_path),
            ));
        }
        let webhook_secret = optional_var("WEBHOOK_SECRET");
        let payment_timeout = seconds_var("PAYMENT_TIMEOUT", 10)?;
        let credentials = (
            optional_var("YOOKASSA_SHOP_ID"),
            optional_var("YOOKASSA_SECRET_KEY"),
        );
        let yookassa = match credentials {
            (Some(shop_id), Some(secret_key)) => Some(YooKassaConfig {
                shop_id,
                secret_key,
                return_url: optional_var("YOOKASSA_RETURN_URL").unwrap_or_default(),
                api_base: optional_var("YOOKASSA_API_BASE")
                    .unwrap_or_else(|| DEFAULT_YOOKASSA_API_BASE.to_string()),
                timeout: payment_timeout,
            }),
            _ => None,
        };

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            admin_username,
            webhook_path,
            webhook_secret,
            yookassa,
            off_enabled,
            off_api_base,
            off_timeout,
            conversation_store,
        })
    }
}
