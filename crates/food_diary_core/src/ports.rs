//! crates/food_diary_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the relational store, the barcode catalog, and the payment provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::conversation::ConversationState;
use crate::domain::{
    AnalyticsSnapshot, Feedback, FoodLogEntry, Language, MealSlot, NewPayment, Nutrients,
    Payment, PaymentProvider, PaymentStatus, Product, ProductNames, ProductRef, Provenance,
    Subscriber, User, UserId,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
    /// A remote dependency timed out or answered with something unusable.
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Port payload types
//=========================================================================================

/// Result of an atomic attempt to move a payment into a terminal status.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// The row transitioned into `status`; when that is `succeeded` the owner's
    /// subscription was extended to `subscription_until` in the same transaction.
    Applied {
        status: PaymentStatus,
        subscription_until: Option<DateTime<Utc>>,
    },
    /// The row was already terminal. Nothing changed.
    AlreadyTerminal(PaymentStatus),
    /// No local row exists for this provider payment id.
    UnknownPayment,
}

/// A normalized barcode-catalog record.
#[derive(Debug, Clone, PartialEq)]
pub struct BarcodeProduct {
    pub code: String,
    pub name: String,
    pub per_100g: Nutrients,
}

/// A create-intent call to the redirect payment rail.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    pub owner: UserId,
    /// Whole roubles.
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentIntent {
    pub id: String,
    pub status: String,
    pub confirmation_url: Option<String>,
    pub raw: Value,
}

/// The provider's authoritative view of a payment.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPayment {
    pub id: String,
    pub status: String,
    pub raw: Value,
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait LedgerStore: Send + Sync {
    // --- Users ---
    /// Creates the user on first contact, otherwise refreshes handle, last-seen and admin flag.
    async fn touch_user(&self, user_id: UserId, handle: Option<&str>, is_admin: bool)
        -> PortResult<User>;

    async fn get_user(&self, user_id: UserId) -> PortResult<User>;

    async fn set_user_language(&self, user_id: UserId, language: Language) -> PortResult<()>;

    async fn list_subscribers(&self, limit: usize) -> PortResult<Vec<Subscriber>>;

    // --- Subscription ---
    /// Additively extends the user's entitlement and returns the new expiry.
    async fn extend_subscription(
        &self,
        user_id: UserId,
        days: i64,
        now: DateTime<Utc>,
    ) -> PortResult<DateTime<Utc>>;

    // --- Settings ---
    async fn get_setting(&self, key: &str) -> PortResult<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> PortResult<()>;

    // --- Products ---
    async fn insert_private_product(
        &self,
        owner: UserId,
        names: &ProductNames,
        per_100g: Nutrients,
    ) -> PortResult<Product>;

    /// Inserts a catalog product unless one already matches either name case-insensitively.
    /// Returns `None` when the dedup check found a match.
    async fn insert_catalog_product_if_absent(
        &self,
        created_by: UserId,
        names: &ProductNames,
        per_100g: Nutrients,
        provenance: Provenance,
    ) -> PortResult<Option<Product>>;

    /// Owner-scoped: another user's private product is invisible.
    async fn get_private_product(&self, owner: UserId, id: i64) -> PortResult<Option<Product>>;

    async fn get_catalog_product(&self, id: i64) -> PortResult<Option<Product>>;

    async fn count_private_products(&self, owner: UserId) -> PortResult<i64>;

    async fn list_private_products(&self, owner: UserId, limit: usize)
        -> PortResult<Vec<Product>>;

    async fn search_private_products(
        &self,
        owner: UserId,
        query: &str,
        limit: usize,
    ) -> PortResult<Vec<Product>>;

    async fn search_catalog_products(&self, query: &str, limit: usize)
        -> PortResult<Vec<Product>>;

    // --- Food log ---
    async fn append_food_log(
        &self,
        owner: UserId,
        product: ProductRef,
        grams: f64,
        meal: MealSlot,
        eaten_at: DateTime<Utc>,
    ) -> PortResult<FoodLogEntry>;

    /// Entries with `from <= eaten_at < to`, oldest first.
    async fn food_log_between(
        &self,
        owner: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PortResult<Vec<FoodLogEntry>>;

    /// Distinct product references, most recently logged first.
    async fn recent_product_refs(&self, owner: UserId, limit: usize)
        -> PortResult<Vec<ProductRef>>;

    // --- Payments ---
    async fn insert_pending_payment(&self, payment: NewPayment) -> PortResult<Payment>;

    async fn get_payment(
        &self,
        provider: PaymentProvider,
        provider_payment_id: &str,
    ) -> PortResult<Option<Payment>>;

    async fn latest_payment(
        &self,
        owner: UserId,
        provider: PaymentProvider,
    ) -> PortResult<Option<Payment>>;

    /// Replaces the stored provider snapshot while the row is still pending. Terminal rows
    /// are left untouched.
    async fn refresh_pending_metadata(
        &self,
        provider: PaymentProvider,
        provider_payment_id: &str,
        metadata: Value,
    ) -> PortResult<()>;

    /// Under a row lock: if the payment is not yet terminal, record `status` and `metadata`
    /// and, when `status` is `succeeded`, extend the owner's subscription by `extend_days`.
    async fn settle_payment(
        &self,
        provider: PaymentProvider,
        provider_payment_id: &str,
        status: PaymentStatus,
        metadata: Value,
        extend_days: i64,
        now: DateTime<Utc>,
    ) -> PortResult<Settlement>;

    /// Inserts an already-succeeded payment and extends the owner's subscription in one
    /// transaction. A duplicate provider payment id inserts nothing and extends nothing.
    async fn insert_settled_payment(
        &self,
        payment: NewPayment,
        extend_days: i64,
        now: DateTime<Utc>,
    ) -> PortResult<Settlement>;

    // --- Feedback ---
    async fn append_feedback(
        &self,
        owner: UserId,
        message: &str,
        rating: Option<i32>,
    ) -> PortResult<()>;

    async fn list_feedback(&self, status: &str, limit: usize) -> PortResult<Vec<Feedback>>;

    // --- Event log ---
    async fn append_event(&self, user_id: UserId, name: &str, meta: Value) -> PortResult<()>;

    async fn analytics_snapshot(&self, active_since: DateTime<Utc>)
        -> PortResult<AnalyticsSnapshot>;
}

/// Keyed store for the in-flight conversation step of each user.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Returns `ConversationState::Idle` when nothing is stored.
    async fn get(&self, user_id: UserId) -> PortResult<ConversationState>;

    async fn set(&self, user_id: UserId, state: &ConversationState) -> PortResult<()>;

    async fn clear(&self, user_id: UserId) -> PortResult<()>;
}

#[async_trait]
pub trait BarcodeCatalog: Send + Sync {
    /// `Ok(None)` is a definite miss (unknown code or incomplete nutrient data);
    /// `Err` means the catalog could not be reached.
    async fn lookup(&self, code: &str) -> PortResult<Option<BarcodeProduct>>;
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a payment with redirect confirmation. The idempotency key is forwarded so
    /// retries of one logical attempt never create two charges.
    async fn create_payment(&self, request: PaymentRequest) -> PortResult<PaymentIntent>;

    /// Fetches the provider's authoritative status for a payment.
    async fn fetch_payment(&self, payment_id: &str) -> PortResult<ProviderPayment>;
}
