//! crates/food_diary_core/src/domain.rs
//!
//! Defines the pure, core data structures for the food diary.
//! These structs are independent of any database or wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

/// Platform user identifier (the messaging transport's numeric id).
pub type UserId = i64;

/// Returned when a stored or transmitted tag does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised {kind}: '{value}'")]
pub struct ParseTagError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseTagError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

//=========================================================================================
// Users
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Ru,
    En,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Ru => "ru",
            Language::En => "en",
        }
    }
}

impl FromStr for Language {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ru" => Ok(Language::Ru),
            "en" => Ok(Language::En),
            other => Err(ParseTagError::new("language", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub handle: Option<String>,
    pub language: Language,
    pub is_admin: bool,
    pub subscription_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl User {
    /// True only on the very first message a user ever sends.
    pub fn is_first_contact(&self) -> bool {
        self.created_at == self.last_seen_at
    }
}

/// A row of the admin subscriber listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subscriber {
    pub user_id: UserId,
    pub handle: Option<String>,
    pub subscription_until: DateTime<Utc>,
}

//=========================================================================================
// Products and nutrition
//=========================================================================================

/// Calories and the three macronutrients. Used both for a product's per-100g profile
/// and for aggregated totals.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Nutrients {
    pub kcal: f64,
    pub protein: f64,
    pub fat: f64,
    pub carbs: f64,
}

impl Nutrients {
    pub fn new(kcal: f64, protein: f64, fat: f64, carbs: f64) -> Self {
        Self {
            kcal,
            protein,
            fat,
            carbs,
        }
    }

    /// Scales a per-100g profile to the given mass.
    pub fn scaled_to(&self, grams: f64) -> Self {
        let factor = grams / 100.0;
        Self {
            kcal: self.kcal * factor,
            protein: self.protein * factor,
            fat: self.fat * factor,
            carbs: self.carbs * factor,
        }
    }
}

impl Add for Nutrients {
    type Output = Nutrients;

    fn add(self, rhs: Nutrients) -> Nutrients {
        Nutrients {
            kcal: self.kcal + rhs.kcal,
            protein: self.protein + rhs.protein,
            fat: self.fat + rhs.fat,
            carbs: self.carbs + rhs.carbs,
        }
    }
}

impl AddAssign for Nutrients {
    fn add_assign(&mut self, rhs: Nutrients) {
        *self = *self + rhs;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductNames {
    pub ru: String,
    pub en: String,
}

impl ProductNames {
    pub fn new(ru: impl Into<String>, en: impl Into<String>) -> Self {
        Self {
            ru: ru.into(),
            en: en.into(),
        }
    }

    /// Same name in both languages, as produced by barcode imports.
    pub fn uniform(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            ru: name.clone(),
            en: name,
        }
    }

    /// Case-insensitive match on either language name.
    pub fn matches_either(&self, other: &ProductNames) -> bool {
        self.ru.trim().to_lowercase() == other.ru.trim().to_lowercase()
            || self.en.trim().to_lowercase() == other.en.trim().to_lowercase()
    }

    /// Case-insensitive substring match on either language name.
    pub fn contains(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        self.ru.to_lowercase().contains(&query) || self.en.to_lowercase().contains(&query)
    }
}

/// Which table a product lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductVariant {
    Catalog,
    Private,
}

impl ProductVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductVariant::Catalog => "catalog",
            ProductVariant::Private => "private",
        }
    }
}

impl FromStr for ProductVariant {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "catalog" => Ok(ProductVariant::Catalog),
            "private" => Ok(ProductVariant::Private),
            other => Err(ParseTagError::new("product variant", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductRef {
    pub variant: ProductVariant,
    pub id: i64,
}

impl ProductRef {
    pub fn catalog(id: i64) -> Self {
        Self {
            variant: ProductVariant::Catalog,
            id,
        }
    }

    pub fn private(id: i64) -> Self {
        Self {
            variant: ProductVariant::Private,
            id,
        }
    }
}

impl fmt::Display for ProductRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.variant.as_str(), self.id)
    }
}

/// Where a catalog product came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Manual,
    External,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Manual => "manual",
            Provenance::External => "external",
        }
    }
}

impl FromStr for Provenance {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Provenance::Manual),
            "external" => Ok(Provenance::External),
            other => Err(ParseTagError::new("provenance", other)),
        }
    }
}

/// A food item from either table, tagged by its reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub reference: ProductRef,
    pub names: ProductNames,
    pub per_100g: Nutrients,
}

//=========================================================================================
// Food log
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MealSlot {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealSlot {
    pub const ALL: [MealSlot; 4] = [
        MealSlot::Breakfast,
        MealSlot::Lunch,
        MealSlot::Dinner,
        MealSlot::Snack,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MealSlot::Breakfast => "breakfast",
            MealSlot::Lunch => "lunch",
            MealSlot::Dinner => "dinner",
            MealSlot::Snack => "snack",
        }
    }
}

impl FromStr for MealSlot {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "breakfast" => Ok(MealSlot::Breakfast),
            "lunch" => Ok(MealSlot::Lunch),
            "dinner" => Ok(MealSlot::Dinner),
            "snack" => Ok(MealSlot::Snack),
            other => Err(ParseTagError::new("meal slot", other)),
        }
    }
}

/// One recorded instance of eating a product. Stores grams only; nutrients are
/// always recomputed from the referenced product.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoodLogEntry {
    pub id: i64,
    pub owner: UserId,
    pub product: ProductRef,
    pub grams: f64,
    pub meal: MealSlot,
    pub eaten_at: DateTime<Utc>,
}

//=========================================================================================
// Payments
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    /// Redirect rail confirmed by polling or webhook.
    YooKassa,
    /// In-band rail confirmed by the messaging platform.
    Stars,
}

impl PaymentProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentProvider::YooKassa => "yookassa",
            PaymentProvider::Stars => "stars",
        }
    }
}

impl FromStr for PaymentProvider {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yookassa" => Ok(PaymentProvider::YooKassa),
            "stars" => Ok(PaymentProvider::Stars),
            other => Err(ParseTagError::new("payment provider", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Canceled,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// Maps a provider-reported status. Anything the provider still considers in flight
    /// (`pending`, `waiting_for_capture`, unknown values) stays pending.
    pub fn from_provider(status: &str) -> Self {
        match status {
            "succeeded" => PaymentStatus::Succeeded,
            "canceled" => PaymentStatus::Canceled,
            "failed" => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            "canceled" => Ok(PaymentStatus::Canceled),
            other => Err(ParseTagError::new("payment status", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub id: i64,
    pub owner: UserId,
    pub provider: PaymentProvider,
    /// Whole units of `currency` (roubles, stars).
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub provider_payment_id: String,
    pub idempotency_key: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a payment row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub owner: UserId,
    pub provider: PaymentProvider,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub provider_payment_id: String,
    pub idempotency_key: String,
    pub metadata: serde_json::Value,
}

//=========================================================================================
// Feedback and telemetry
//=========================================================================================

pub const FEEDBACK_STATUS_NEW: &str = "new";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feedback {
    pub id: i64,
    pub owner: UserId,
    pub message: String,
    pub rating: Option<i32>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AnalyticsSnapshot {
    pub total_users: i64,
    pub active_last_7_days: i64,
    pub top_events: Vec<(String, i64)>,
}
