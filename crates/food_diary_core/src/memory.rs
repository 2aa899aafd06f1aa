//! crates/food_diary_core/src/memory.rs
//!
//! Process-local implementations of the storage ports. `InMemoryConversationStore` is the
//! default conversation store for a single instance; `InMemoryLedger` is a non-durable ledger
//! for tests and local dry runs. Both serialise access through a single async mutex, which
//! gives the ledger's settle operations the same all-or-nothing behaviour as a transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::conversation::ConversationState;
use crate::domain::{
    AnalyticsSnapshot, Feedback, FoodLogEntry, Language, MealSlot, NewPayment, Nutrients,
    Payment, PaymentProvider, PaymentStatus, Product, ProductNames, ProductRef, Provenance,
    Subscriber, User, UserId, FEEDBACK_STATUS_NEW,
};
use crate::ports::{ConversationStore, LedgerStore, PortError, PortResult, Settlement};
use crate::subscription::extended_expiry;

//=========================================================================================
// Conversation store
//=========================================================================================

#[derive(Default)]
pub struct InMemoryConversationStore {
    states: Mutex<HashMap<UserId, ConversationState>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get(&self, user_id: UserId) -> PortResult<ConversationState> {
        Ok(self
            .states
            .lock()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn set(&self, user_id: UserId, state: &ConversationState) -> PortResult<()> {
        self.states.lock().await.insert(user_id, state.clone());
        Ok(())
    }

    async fn clear(&self, user_id: UserId) -> PortResult<()> {
        self.states.lock().await.remove(&user_id);
        Ok(())
    }
}

//=========================================================================================
// Ledger
//=========================================================================================

struct CatalogRow {
    product: Product,
    #[allow(dead_code)]
    provenance: Provenance,
    #[allow(dead_code)]
    created_by: UserId,
}

struct PrivateRow {
    owner: UserId,
    product: Product,
}

struct EventRow {
    user_id: UserId,
    name: String,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    settings: HashMap<String, String>,
    catalog: Vec<CatalogRow>,
    private: Vec<PrivateRow>,
    food_log: Vec<FoodLogEntry>,
    payments: Vec<Payment>,
    feedback: Vec<Feedback>,
    events: Vec<EventRow>,
    last_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn extend(
        &mut self,
        user_id: UserId,
        days: i64,
        now: DateTime<Utc>,
    ) -> PortResult<DateTime<Utc>> {
        let user = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
        let until = extended_expiry(now, user.subscription_until, days);
        user.subscription_until = Some(until);
        Ok(until)
    }

    fn payment_index(&self, provider: PaymentProvider, provider_payment_id: &str) -> Option<usize> {
        self.payments
            .iter()
            .position(|p| p.provider == provider && p.provider_payment_id == provider_payment_id)
    }

    fn insert_payment(&mut self, new: NewPayment) -> Payment {
        let now = Utc::now();
        let payment = Payment {
            id: self.next_id(),
            owner: new.owner,
            provider: new.provider,
            amount: new.amount,
            currency: new.currency,
            status: new.status,
            provider_payment_id: new.provider_payment_id,
            idempotency_key: new.idempotency_key,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
        };
        self.payments.push(payment.clone());
        payment
    }
}

#[derive(Default)]
pub struct InMemoryLedger {
    tables: Mutex<Tables>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn catalog_count(&self) -> usize {
        self.tables.lock().await.catalog.len()
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.tables.lock().await.payments.clone()
    }

    /// Removes a catalog product, leaving any food log entries that reference it dangling.
    pub async fn remove_catalog_product(&self, id: i64) {
        self.tables
            .lock()
            .await
            .catalog
            .retain(|row| row.product.reference.id != id);
    }

    /// Overwrites a user's expiry directly.
    pub async fn set_subscription_until(&self, user_id: UserId, until: Option<DateTime<Utc>>) {
        if let Some(user) = self.tables.lock().await.users.get_mut(&user_id) {
            user.subscription_until = until;
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn touch_user(
        &self,
        user_id: UserId,
        handle: Option<&str>,
        is_admin: bool,
    ) -> PortResult<User> {
        let now = Utc::now();
        let mut tables = self.tables.lock().await;
        let user = tables.users.entry(user_id).or_insert_with(|| User {
            id: user_id,
            handle: None,
            language: Language::default(),
            is_admin,
            subscription_until: None,
            created_at: now,
            last_seen_at: now,
        });
        user.handle = handle.map(str::to_string);
        user.is_admin = is_admin;
        user.last_seen_at = now;
        Ok(user.clone())
    }

    async fn get_user(&self, user_id: UserId) -> PortResult<User> {
        self.tables
            .lock()
            .await
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))
    }

    async fn set_user_language(&self, user_id: UserId, language: Language) -> PortResult<()> {
        let mut tables = self.tables.lock().await;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
        user.language = language;
        Ok(())
    }

    async fn list_subscribers(&self, limit: usize) -> PortResult<Vec<Subscriber>> {
        let tables = self.tables.lock().await;
        let mut subscribers: Vec<Subscriber> = tables
            .users
            .values()
            .filter_map(|u| {
                u.subscription_until.map(|until| Subscriber {
                    user_id: u.id,
                    handle: u.handle.clone(),
                    subscription_until: until,
                })
            })
            .collect();
        subscribers.sort_by(|a, b| b.subscription_until.cmp(&a.subscription_until));
        subscribers.truncate(limit);
        Ok(subscribers)
    }

    async fn extend_subscription(
        &self,
        user_id: UserId,
        days: i64,
        now: DateTime<Utc>,
    ) -> PortResult<DateTime<Utc>> {
        self.tables.lock().await.extend(user_id, days, now)
    }

    async fn get_setting(&self, key: &str) -> PortResult<Option<String>> {
        Ok(self.tables.lock().await.settings.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> PortResult<()> {
        self.tables
            .lock()
            .await
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn insert_private_product(
        &self,
        owner: UserId,
        names: &ProductNames,
        per_100g: Nutrients,
    ) -> PortResult<Product> {
        let mut tables = self.tables.lock().await;
        let product = Product {
            reference: ProductRef::private(tables.next_id()),
            names: names.clone(),
            per_100g,
        };
        tables.private.push(PrivateRow {
            owner,
            product: product.clone(),
        });
        Ok(product)
    }

    async fn insert_catalog_product_if_absent(
        &self,
        created_by: UserId,
        names: &ProductNames,
        per_100g: Nutrients,
        provenance: Provenance,
    ) -> PortResult<Option<Product>> {
        let mut tables = self.tables.lock().await;
        if tables.catalog.iter().any(|row| row.product.names.matches_either(names)) {
            return Ok(None);
        }
        let product = Product {
            reference: ProductRef::catalog(tables.next_id()),
            names: names.clone(),
            per_100g,
        };
        tables.catalog.push(CatalogRow {
            product: product.clone(),
            provenance,
            created_by,
        });
        Ok(Some(product))
    }

    async fn get_private_product(&self, owner: UserId, id: i64) -> PortResult<Option<Product>> {
        Ok(self
            .tables
            .lock()
            .await
            .private
            .iter()
            .find(|row| row.owner == owner && row.product.reference.id == id)
            .map(|row| row.product.clone()))
    }

    async fn get_catalog_product(&self, id: i64) -> PortResult<Option<Product>> {
        Ok(self
            .tables
            .lock()
            .await
            .catalog
            .iter()
            .find(|row| row.product.reference.id == id)
            .map(|row| row.product.clone()))
    }

    async fn count_private_products(&self, owner: UserId) -> PortResult<i64> {
        Ok(self
            .tables
            .lock()
            .await
            .private
            .iter()
            .filter(|row| row.owner == owner)
            .count() as i64)
    }

    async fn list_private_products(&self, owner: UserId, limit: usize) -> PortResult<Vec<Product>> {
        Ok(self
            .tables
            .lock()
            .await
            .private
            .iter()
            .rev()
            .filter(|row| row.owner == owner)
            .take(limit)
            .map(|row| row.product.clone())
            .collect())
    }

    async fn search_private_products(
        &self,
        owner: UserId,
        query: &str,
        limit: usize,
    ) -> PortResult<Vec<Product>> {
        Ok(self
            .tables
            .lock()
            .await
            .private
            .iter()
            .filter(|row| row.owner == owner && row.product.names.contains(query))
            .take(limit)
            .map(|row| row.product.clone())
            .collect())
    }

    async fn search_catalog_products(&self, query: &str, limit: usize) -> PortResult<Vec<Product>> {
        Ok(self
            .tables
            .lock()
            .await
            .catalog
            .iter()
            .filter(|row| row.product.names.contains(query))
            .take(limit)
            .map(|row| row.product.clone())
            .collect())
    }

    async fn append_food_log(
        &self,
        owner: UserId,
        product: ProductRef,
        grams: f64,
        meal: MealSlot,
        eaten_at: DateTime<Utc>,
    ) -> PortResult<FoodLogEntry> {
        let mut tables = self.tables.lock().await;
        let entry = FoodLogEntry {
            id: tables.next_id(),
            owner,
            product,
            grams,
            meal,
            eaten_at,
        };
        tables.food_log.push(entry.clone());
        Ok(entry)
    }

    async fn food_log_between(
        &self,
        owner: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PortResult<Vec<FoodLogEntry>> {
        let tables = self.tables.lock().await;
        let mut entries: Vec<FoodLogEntry> = tables
            .food_log
            .iter()
            .filter(|e| e.owner == owner && e.eaten_at >= from && e.eaten_at < to)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.eaten_at);
        Ok(entries)
    }

    async fn recent_product_refs(
        &self,
        owner: UserId,
        limit: usize,
    ) -> PortResult<Vec<ProductRef>> {
        let tables = self.tables.lock().await;
        let mut latest: HashMap<ProductRef, DateTime<Utc>> = HashMap::new();
        for entry in tables.food_log.iter().filter(|e| e.owner == owner) {
            let seen = latest.entry(entry.product).or_insert(entry.eaten_at);
            if entry.eaten_at > *seen {
                *seen = entry.eaten_at;
            }
        }
        let mut refs: Vec<(ProductRef, DateTime<Utc>)> = latest.into_iter().collect();
        refs.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(refs.into_iter().take(limit).map(|(r, _)| r).collect())
    }

    async fn insert_pending_payment(&self, payment: NewPayment) -> PortResult<Payment> {
        let mut tables = self.tables.lock().await;
        if let Some(index) = tables.payment_index(payment.provider, &payment.provider_payment_id) {
            return Ok(tables.payments[index].clone());
        }
        Ok(tables.insert_payment(payment))
    }

    async fn get_payment(
        &self,
        provider: PaymentProvider,
        provider_payment_id: &str,
    ) -> PortResult<Option<Payment>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .payment_index(provider, provider_payment_id)
            .map(|index| tables.payments[index].clone()))
    }

    async fn latest_payment(
        &self,
        owner: UserId,
        provider: PaymentProvider,
    ) -> PortResult<Option<Payment>> {
        Ok(self
            .tables
            .lock()
            .await
            .payments
            .iter()
            .filter(|p| p.owner == owner && p.provider == provider)
            .max_by_key(|p| (p.created_at, p.id))
            .cloned())
    }

    async fn refresh_pending_metadata(
        &self,
        provider: PaymentProvider,
        provider_payment_id: &str,
        metadata: Value,
    ) -> PortResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(index) = tables.payment_index(provider, provider_payment_id) {
            let payment = &mut tables.payments[index];
            if !payment.status.is_terminal() {
                payment.metadata = metadata;
                payment.updated_at = Utc::now();
            }
        }
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
        let mut tables = self.tables.lock().await;
        let Some(index) = tables.payment_index(provider, provider_payment_id) else {
            return Ok(Settlement::UnknownPayment);
        };
        let current = tables.payments[index].status;
        if current.is_terminal() {
            return Ok(Settlement::AlreadyTerminal(current));
        }
        let owner = tables.payments[index].owner;
        let subscription_until = if status == PaymentStatus::Succeeded {
            Some(tables.extend(owner, extend_days, now)?)
        } else {
            None
        };
        let payment = &mut tables.payments[index];
        payment.status = status;
        payment.metadata = metadata;
        payment.updated_at = now;
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
        let mut tables = self.tables.lock().await;
        if let Some(index) = tables.payment_index(payment.provider, &payment.provider_payment_id) {
            return Ok(Settlement::AlreadyTerminal(tables.payments[index].status));
        }
        let status = payment.status;
        let subscription_until = if status == PaymentStatus::Succeeded {
            Some(tables.extend(payment.owner, extend_days, now)?)
        } else {
            None
        };
        tables.insert_payment(payment);
        Ok(Settlement::Applied {
            status,
            subscription_until,
        })
    }

    async fn append_feedback(
        &self,
        owner: UserId,
        message: &str,
        rating: Option<i32>,
    ) -> PortResult<()> {
        let mut tables = self.tables.lock().await;
        let feedback = Feedback {
            id: tables.next_id(),
            owner,
            message: message.to_string(),
            rating,
            status: FEEDBACK_STATUS_NEW.to_string(),
            created_at: Utc::now(),
        };
        tables.feedback.push(feedback);
        Ok(())
    }

    async fn list_feedback(&self, status: &str, limit: usize) -> PortResult<Vec<Feedback>> {
        Ok(self
            .tables
            .lock()
            .await
            .feedback
            .iter()
            .rev()
            .filter(|f| f.status == status)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn append_event(&self, user_id: UserId, name: &str, _meta: Value) -> PortResult<()> {
        self.tables.lock().await.events.push(EventRow {
            user_id,
            name: name.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn analytics_snapshot(
        &self,
        active_since: DateTime<Utc>,
    ) -> PortResult<AnalyticsSnapshot> {
        let tables = self.tables.lock().await;
        let mut active: Vec<UserId> = tables
            .events
            .iter()
            .filter(|e| e.created_at >= active_since)
            .map(|e| e.user_id)
            .collect();
        active.sort_unstable();
        active.dedup();

        let mut counts: HashMap<&str, i64> = HashMap::new();
        for event in &tables.events {
            *counts.entry(event.name.as_str()).or_default() += 1;
        }
        let mut top_events: Vec<(String, i64)> = counts
            .into_iter()
            .map(|(name, n)| (name.to_string(), n))
            .collect();
        top_events.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_events.truncate(10);

        Ok(AnalyticsSnapshot {
            total_users: tables.users.len() as i64,
            active_last_7_days: active.len() as i64,
            top_events,
        })
    }
}
