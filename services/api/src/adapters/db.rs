//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `LedgerStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use food_diary_core::domain::{
    AnalyticsSnapshot, Feedback, FoodLogEntry, Language, MealSlot, NewPayment, Nutrients,
    Payment, PaymentProvider, PaymentStatus, Product, ProductNames, ProductRef, ProductVariant,
    Provenance, Subscriber, User, UserId, FEEDBACK_STATUS_NEW,
};
use food_diary_core::ports::{LedgerStore, PortError, PortResult, Settlement};
use food_diary_core::subscription::extended_expiry;
use serde_json::Value;
use sqlx::{FromRow, PgConnection, PgPool};
use std::fmt::Display;

/// Key for the transaction-scoped advisory lock that serialises catalog inserts, so two
/// concurrent creations of the same name cannot both pass the dedup check.
const CATALOG_DEDUP_LOCK: i64 = 0x6361_7461_6c6f_67;

fn db_error(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn corrupt(column: &str, e: impl Display) -> PortError {
    PortError::Unexpected(format!("Stored {} is invalid: {}", column, e))
}

/// Builds a `LIKE` pattern that matches `query` as a literal substring.
fn like_pattern(query: &str) -> String {
    let escaped = query
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `LedgerStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Extends a user's expiry while holding the row lock. Must run inside a transaction.
async fn extend_locked(
    conn: &mut PgConnection,
    user_id: UserId,
    days: i64,
    now: DateTime<Utc>,
) -> PortResult<DateTime<Utc>> {
    let current: Option<Option<DateTime<Utc>>> =
        sqlx::query_scalar("SELECT subscription_until FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_error)?;
    let Some(current) = current else {
        return Err(PortError::NotFound(format!("User {} not found", user_id)));
    };

    let until = extended_expiry(now, current, days);
    sqlx::query("UPDATE users SET subscription_until = $1 WHERE id = $2")
        .bind(until)
        .bind(user_id)
        .execute(&mut *conn)
        .await
        .map_err(db_error)?;
    Ok(until)
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const USER_COLUMNS: &str =
    "id, handle, language, is_admin, subscription_until, created_at, last_seen_at";

#[derive(FromRow)]
struct UserRecord {
    id: i64,
    handle: Option<String>,
    language: String,
    is_admin: bool,
    subscription_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
}
impl UserRecord {
    fn to_domain(self) -> PortResult<User> {
        Ok(User {
            id: self.id,
            handle: self.handle,
            language: self.language.parse().map_err(|e| corrupt("language", e))?,
            is_admin: self.is_admin,
            subscription_until: self.subscription_until,
            created_at: self.created_at,
            last_seen_at: self.last_seen_at,
        })
    }
}

const PRODUCT_COLUMNS: &str = "id, name_ru, name_en, kcal, protein, fat, carbs";

#[derive(FromRow)]
struct ProductRecord {
    id: i64,
    name_ru: String,
    name_en: String,
    kcal: f64,
    protein: f64,
    fat: f64,
    carbs: f64,
}
impl ProductRecord {
    fn to_domain(self, variant: ProductVariant) -> Product {
        Product {
            reference: ProductRef { variant, id: self.id },
            names: ProductNames::new(self.name_ru, self.name_en),
            per_100g: Nutrients::new(self.kcal, self.protein, self.fat, self.carbs),
        }
    }
}

const FOOD_LOG_COLUMNS: &str = "id, owner_id, product_variant, product_id, grams, meal, eaten_at";

#[derive(FromRow)]
struct FoodLogRecord {
    id: i64,
    owner_id: i64,
    product_variant: String,
    product_id: i64,
    grams: f64,
    meal: String,
    eaten_at: DateTime<Utc>,
}
impl FoodLogRecord {
    fn to_domain(self) -> PortResult<FoodLogEntry> {
        Ok(FoodLogEntry {
            id: self.id,
            owner: self.owner_id,
            product: ProductRef {
                variant: self
                    .product_variant
                    .parse()
                    .map_err(|e| corrupt("product_variant", e))?,
                id: self.product_id,
            },
            grams: self.grams,
            meal: self.meal.parse().map_err(|e| corrupt("meal", e))?,
            eaten_at: self.eaten_at,
        })
    }
}

#[derive(FromRow)]
struct RecentRefRecord {
    product_variant: String,
    product_id: i64,
}

const PAYMENT_COLUMNS: &str = "id, owner_id, provider, amount, currency, status, \
     provider_payment_id, idempotency_key, metadata, created_at, updated_at";

#[derive(FromRow)]
struct PaymentRecord {
    id: i64,
    owner_id: i64,
    provider: String,
    amount: i64,
    currency: String,
    status: String,
    provider_payment_id: String,
    idempotency_key: String,
    metadata: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl PaymentRecord {
    fn to_domain(self) -> PortResult<Payment> {
        Ok(Payment {
            id: self.id,
            owner: self.owner_id,
            provider: self.provider.parse().map_err(|e| corrupt("provider", e))?,
            amount: self.amount,
            currency: self.currency,
            status: self.status.parse().map_err(|e| corrupt("status", e))?,
            provider_payment_id: self.provider_payment_id,
            idempotency_key: self.idempotency_key,
            metadata: self.metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct FeedbackRecord {
    id: i64,
    owner_id: i64,
    message: String,
    rating: Option<i32>,
    status: String,
    created_at: DateTime<Utc>,
}
impl FeedbackRecord {
    fn to_domain(self) -> Feedback {
        Feedback {
            id: self.id,
            owner: self.owner_id,
            message: self.message,
            rating: self.rating,
            status: self.status,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct SubscriberRecord {
    id: i64,
    handle: Option<String>,
    subscription_until: DateTime<Utc>,
}

//=========================================================================================
// `LedgerStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl LedgerStore for DbAdapter {
    // --- Users ---

    async fn touch_user(
        &self,
        user_id: UserId,
        handle: Option<&str>,
        is_admin: bool,
    ) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "INSERT INTO users (id, handle, is_admin, created_at, last_seen_at) \
             VALUES ($1, $2, $3, $4, $4) \
             ON CONFLICT (id) DO UPDATE \
             SET handle = EXCLUDED.handle, is_admin = EXCLUDED.is_admin, last_seen_at = EXCLUDED.last_seen_at \
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(user_id)
        .bind(handle)
        .bind(is_admin)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        record.to_domain()
    }

    async fn get_user(&self, user_id: UserId) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("User {} not found", user_id)),
            _ => PortError::Unexpected(e.to_string()),
        })?;
        record.to_domain()
    }

    async fn set_user_language(&self, user_id: UserId, language: Language) -> PortResult<()> {
        let result = sqlx::query("UPDATE users SET language = $1 WHERE id = $2")
            .bind(language.as_str())
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }
        Ok(())
    }

    async fn list_subscribers(&self, limit: usize) -> PortResult<Vec<Subscriber>> {
        let records = sqlx::query_as::<_, SubscriberRecord>(
            "SELECT id, handle, subscription_until FROM users \
             WHERE subscription_until IS NOT NULL \
             ORDER BY subscription_until DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(records
            .into_iter()
            .map(|r| Subscriber {
                user_id: r.id,
                handle: r.handle,
                subscription_until: r.subscription_until,
            })
            .collect())
    }

    // --- Subscription ---

    async fn extend_subscription(
        &self,
        user_id: UserId,
        days: i64,
        now: DateTime<Utc>,
    ) -> PortResult<DateTime<Utc>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let until = extend_locked(&mut *tx, user_id, days, now).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(until)
    }

    // --- Settings ---

    async fn get_setting(&self, key: &str) -> PortResult<Option<String>> {
        sqlx::query_scalar("SELECT value FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn set_setting(&self, key: &str, value: &str) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    // --- Products ---

    async fn insert_private_product(
        &self,
        owner: UserId,
        names: &ProductNames,
        per_100g: Nutrients,
    ) -> PortResult<Product> {
        let record = sqlx::query_as::<_, ProductRecord>(&format!(
            "INSERT INTO private_products (owner_id, name_ru, name_en, kcal, protein, fat, carbs) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            PRODUCT_COLUMNS
        ))
        .bind(owner)
        .bind(&names.ru)
        .bind(&names.en)
        .bind(per_100g.kcal)
        .bind(per_100g.protein)
        .bind(per_100g.fat)
        .bind(per_100g.carbs)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(record.to_domain(ProductVariant::Private))
    }

    async fn insert_catalog_product_if_absent(
        &self,
        created_by: UserId,
        names: &ProductNames,
        per_100g: Nutrients,
        provenance: Provenance,
    ) -> PortResult<Option<Product>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(CATALOG_DEDUP_LOCK)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM catalog_products \
             WHERE LOWER(BTRIM(name_ru)) = LOWER(BTRIM($1)) \
                OR LOWER(BTRIM(name_en)) = LOWER(BTRIM($2)) \
             LIMIT 1",
        )
        .bind(&names.ru)
        .bind(&names.en)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;
        if existing.is_some() {
            return Ok(None);
        }

        let record = sqlx::query_as::<_, ProductRecord>(&format!(
            "INSERT INTO catalog_products \
             (name_ru, name_en, kcal, protein, fat, carbs, provenance, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
            PRODUCT_COLUMNS
        ))
        .bind(&names.ru)
        .bind(&names.en)
        .bind(per_100g.kcal)
        .bind(per_100g.protein)
        .bind(per_100g.fat)
        .bind(per_100g.carbs)
        .bind(provenance.as_str())
        .bind(created_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;

        Ok(Some(record.to_domain(ProductVariant::Catalog)))
    }

    async fn get_private_product(&self, owner: UserId, id: i64) -> PortResult<Option<Product>> {
        let record = sqlx::query_as::<_, ProductRecord>(&format!(
            "SELECT {} FROM private_products WHERE id = $1 AND owner_id = $2",
            PRODUCT_COLUMNS
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(record.map(|r| r.to_domain(ProductVariant::Private)))
    }

    async fn get_catalog_product(&self, id: i64) -> PortResult<Option<Product>> {
        let record = sqlx::query_as::<_, ProductRecord>(&format!(
            "SELECT {} FROM catalog_products WHERE id = $1",
            PRODUCT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(record.map(|r| r.to_domain(ProductVariant::Catalog)))
    }

    async fn count_private_products(&self, owner: UserId) -> PortResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM private_products WHERE owner_id = $1")
            .bind(owner)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn list_private_products(&self, owner: UserId, limit: usize) -> PortResult<Vec<Product>> {
        let records = sqlx::query_as::<_, ProductRecord>(&format!(
            "SELECT {} FROM private_products WHERE owner_id = $1 ORDER BY id DESC LIMIT $2",
            PRODUCT_COLUMNS
        ))
        .bind(owner)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(records
            .into_iter()
            .map(|r| r.to_domain(ProductVariant::Private))
            .collect())
    }

    async fn search_private_products(
        &self,
        owner: UserId,
        query: &str,
        limit: usize,
    ) -> PortResult<Vec<Product>> {
        let records = sqlx::query_as::<_, ProductRecord>(&format!(
            "SELECT {} FROM private_products \
             WHERE owner_id = $1 AND (name_ru ILIKE $2 OR name_en ILIKE $2) \
             ORDER BY id LIMIT $3",
            PRODUCT_COLUMNS
        ))
        .bind(owner)
        .bind(like_pattern(query))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(records
            .into_iter()
            .map(|r| r.to_domain(ProductVariant::Private))
            .collect())
    }

    async fn search_catalog_products(&self, query: &str, limit: usize) -> PortResult<Vec<Product>> {
        let records = sqlx::query_as::<_, ProductRecord>(&format!(
            "SELECT {} FROM catalog_products \
             WHERE name_ru ILIKE $1 OR name_en ILIKE $1 \
             ORDER BY id LIMIT $2",
            PRODUCT_COLUMNS
        ))
        .bind(like_pattern(query))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(records
            .into_iter()
            .map(|r| r.to_domain(ProductVariant::Catalog))
            .collect())
    }

    // --- Food log ---

    async fn append_food_log(
        &self,
        owner: UserId,
        product: ProductRef,
        grams: f64,
        meal: MealSlot,
        eaten_at: DateTime<Utc>,
    ) -> PortResult<FoodLogEntry> {
        let record = sqlx::query_as::<_, FoodLogRecord>(&format!(
            "INSERT INTO food_log (owner_id, product_variant, product_id, grams, meal, eaten_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            FOOD_LOG_COLUMNS
        ))
        .bind(owner)
        .bind(product.variant.as_str())
        .bind(product.id)
        .bind(grams)
        .bind(meal.as_str())
        .bind(eaten_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        record.to_domain()
    }

    async fn food_log_between(
        &self,
        owner: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PortResult<Vec<FoodLogEntry>> {
        let records = sqlx::query_as::<_, FoodLogRecord>(&format!(
            "SELECT {} FROM food_log \
             WHERE owner_id = $1 AND eaten_at >= $2 AND eaten_at < $3 \
             ORDER BY eaten_at ASC, id ASC",
            FOOD_LOG_COLUMNS
        ))
        .bind(owner)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn recent_product_refs(
        &self,
        owner: UserId,
        limit: usize,
    ) -> PortResult<Vec<ProductRef>> {
        let records = sqlx::query_as::<_, RecentRefRecord>(
            "SELECT product_variant, product_id FROM food_log \
             WHERE owner_id = $1 \
             GROUP BY product_variant, product_id \
             ORDER BY MAX(eaten_at) DESC LIMIT $2",
        )
        .bind(owner)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        records
            .into_iter()
            .map(|r| {
                Ok(ProductRef {
                    variant: r
                        .product_variant
                        .parse()
                        .map_err(|e| corrupt("product_variant", e))?,
                    id: r.product_id,
                })
            })
            .collect()
    }

    // --- Payments ---

    async fn insert_pending_payment(&self, payment: NewPayment) -> PortResult<Payment> {
        let inserted = sqlx::query_as::<_, PaymentRecord>(&format!(
            "INSERT INTO payments \
             (owner_id, provider, amount, currency, status, provider_payment_id, idempotency_key, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (provider, provider_payment_id) DO NOTHING \
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(payment.owner)
        .bind(payment.provider.as_str())
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(&payment.provider_payment_id)
        .bind(&payment.idempotency_key)
        .bind(&payment.metadata)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match inserted {
            Some(record) => record.to_domain(),
            None => self
                .get_payment(payment.provider, &payment.provider_payment_id)
                .await?
                .ok_or_else(|| {
                    PortError::Unexpected(format!(
                        "Payment {} vanished after a conflicting insert",
                        payment.provider_payment_id
                    ))
                }),
        }
    }

    async fn get_payment(
        &self,
        provider: PaymentProvider,
        provider_payment_id: &str,
    ) -> PortResult<Option<Payment>> {
        let record = sqlx::query_as::<_, PaymentRecord>(&format!(
            "SELECT {} FROM payments WHERE provider = $1 AND provider_payment_id = $2",
            PAYMENT_COLUMNS
        ))
        .bind(provider.as_str())
        .bind(provider_payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        record.map(|r| r.to_domain()).transpose()
    }

    async fn latest_payment(
        &self,
        owner: UserId,
        provider: PaymentProvider,
    ) -> PortResult<Option<Payment>> {
        let record = sqlx::query_as::<_, PaymentRecord>(&format!(
            "SELECT {} FROM payments WHERE owner_id = $1 AND provider = $2 \
             ORDER BY created_at DESC, id DESC LIMIT 1",
            PAYMENT_COLUMNS
        ))
        .bind(owner)
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        record.map(|r| r.to_domain()).transpose()
    }

    async fn refresh_pending_metadata(
        &self,
        provider: PaymentProvider,
        provider_payment_id: &str,
        metadata: Value,
    ) -> PortResult<()> {
        sqlx::query(
            "UPDATE payments SET metadata = $1, updated_at = NOW() \
             WHERE provider = $2 AND provider_payment_id = $3 AND status = $4",
        )
        .bind(&metadata)
        .bind(provider.as_str())
        .bind(provider_payment_id)
        .bind(PaymentStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn settle_payment(
        &self,
        provider: PaymentProvider,
        provider_payment_id: &str,
        status: PaymentStatus,
        metadata: Value,
        extend_days: i64,
        now: DateTime<Utc>,
    ) -> PortResult<Settlement> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let locked = sqlx::query_as::<_, PaymentRecord>(&format!(
            "SELECT {} FROM payments WHERE provider = $1 AND provider_payment_id = $2 FOR UPDATE",
            PAYMENT_COLUMNS
        ))
        .bind(provider.as_str())
        .bind(provider_payment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        let Some(record) = locked else {
            return Ok(Settlement::UnknownPayment);
        };
        let current = record.to_domain()?;
        if current.status.is_terminal() {
            return Ok(Settlement::AlreadyTerminal(current.status));
        }

        let subscription_until = if status == PaymentStatus::Succeeded {
            Some(extend_locked(&mut *tx, current.owner, extend_days, now).await?)
        } else {
            None
        };
        sqlx::query("UPDATE payments SET status = $1, metadata = $2, updated_at = $3 WHERE id = $4")
            .bind(status.as_str())
            .bind(&metadata)
            .bind(now)
            .bind(current.id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;

        Ok(Settlement::Applied {
            status,
            subscription_until,
        })
    }

    async fn insert_settled_payment(
        &self,
        payment: NewPayment,
        extend_days: i64,
        now: DateTime<Utc>,
    ) -> PortResult<Settlement> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let inserted: Option<i64> = sqlx::query_scalar(
            "INSERT INTO payments \
             (owner_id, provider, amount, currency, status, provider_payment_id, idempotency_key, metadata, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) \
             ON CONFLICT (provider, provider_payment_id) DO NOTHING \
             RETURNING id",
        )
        .bind(payment.owner)
        .bind(payment.provider.as_str())
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(&payment.provider_payment_id)
        .bind(&payment.idempotency_key)
        .bind(&payment.metadata)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        if inserted.is_none() {
            let existing: String = sqlx::query_scalar(
                "SELECT status FROM payments WHERE provider = $1 AND provider_payment_id = $2",
            )
            .bind(payment.provider.as_str())
            .bind(&payment.provider_payment_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error)?;
            let status = existing.parse().map_err(|e| corrupt("status", e))?;
            return Ok(Settlement::AlreadyTerminal(status));
        }

        let subscription_until = if payment.status == PaymentStatus::Succeeded {
            Some(extend_locked(&mut *tx, payment.owner, extend_days, now).await?)
        } else {
            None
        };
        tx.commit().await.map_err(db_error)?;

        Ok(Settlement::Applied {
            status: payment.status,
            subscription_until,
        })
    }

    // --- Feedback ---

    async fn append_feedback(
        &self,
        owner: UserId,
        message: &str,
        rating: Option<i32>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO feedback (owner_id, message, rating, status) VALUES ($1, $2, $3, $4)")
            .bind(owner)
            .bind(message)
            .bind(rating)
            .bind(FEEDBACK_STATUS_NEW)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn list_feedback(&self, status: &str, limit: usize) -> PortResult<Vec<Feedback>> {
        let records = sqlx::query_as::<_, FeedbackRecord>(
            "SELECT id, owner_id, message, rating, status, created_at FROM feedback \
             WHERE status = $1 ORDER BY created_at DESC, id DESC LIMIT $2",
        )
        .bind(status)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    // --- Event log ---

    async fn append_event(&self, user_id: UserId, name: &str, meta: Value) -> PortResult<()> {
        sqlx::query("INSERT INTO events (user_id, name, meta) VALUES ($1, $2, $3)")
            .bind(user_id)
            .bind(name)
            .bind(&meta)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn analytics_snapshot(
        &self,
        active_since: DateTime<Utc>,
    ) -> PortResult<AnalyticsSnapshot> {
        let total_users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        let active_last_7_days: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT user_id) FROM events WHERE created_at >= $1")
                .bind(active_since)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error)?;
        let top_events = sqlx::query_as::<_, (String, i64)>(
            "SELECT name, COUNT(*) AS hits FROM events \
             GROUP BY name ORDER BY hits DESC, name ASC LIMIT 10",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(AnalyticsSnapshot {
            total_users,
            active_last_7_days,
            top_events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::like_pattern;

    #[test]
    fn like_pattern_treats_wildcards_literally() {
        assert_eq!(like_pattern(" milk "), "%milk%");
        assert_eq!(like_pattern("100%_fat"), "%100\\%\\_fat%");
    }
}
