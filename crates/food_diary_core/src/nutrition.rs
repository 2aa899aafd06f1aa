//! crates/food_diary_core/src/nutrition.rs
//!
//! Per-entry and per-period nutrition totals. Entries carry grams only, so every total is
//! recomputed from the referenced product's current per-100g profile.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::domain::{
    FoodLogEntry, Nutrients, ParseTagError, Product, ProductNames, ProductRef, UserId,
};
use crate::ports::{LedgerStore, PortResult};
use crate::products::ProductResolver;

/// Aggregation window, in UTC calendar days ending today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Today,
    Last7Days,
    Last30Days,
}

impl Period {
    pub fn as_str(self) -> &'static str {
        match self {
            Period::Today => "today",
            Period::Last7Days => "last_7_days",
            Period::Last30Days => "last_30_days",
        }
    }

    fn days(self) -> i64 {
        match self {
            Period::Today => 1,
            Period::Last7Days => 7,
            Period::Last30Days => 30,
        }
    }

    /// Half-open `[from, to)` range relative to `now`.
    pub fn bounds(self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let start_of_today = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or(now);
        let to = start_of_today + Duration::days(1);
        let from = to - Duration::days(self.days());
        (from, to)
    }
}

impl FromStr for Period {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "today" => Ok(Period::Today),
            "last_7_days" => Ok(Period::Last7Days),
            "last_30_days" => Ok(Period::Last30Days),
            other => Err(ParseTagError {
                kind: "period",
                value: other.to_string(),
            }),
        }
    }
}

pub fn contribution(per_100g: &Nutrients, grams: f64) -> Nutrients {
    per_100g.scaled_to(grams)
}

/// One diary row: the entry, the product's names, and what it contributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiaryLine {
    pub entry: FoodLogEntry,
    pub names: ProductNames,
    pub contribution: Nutrients,
}

#[derive(Clone)]
pub struct NutritionAggregator {
    ledger: Arc<dyn LedgerStore>,
    products: ProductResolver,
}

impl NutritionAggregator {
    pub fn new(ledger: Arc<dyn LedgerStore>, products: ProductResolver) -> Self {
        Self { ledger, products }
    }

    pub async fn aggregate(&self, owner: UserId, period: Period) -> PortResult<Nutrients> {
        let (from, to) = period.bounds(Utc::now());
        self.aggregate_between(owner, from, to).await
    }

    pub async fn aggregate_between(
        &self,
        owner: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PortResult<Nutrients> {
        let lines = self.diary_between(owner, from, to).await?;
        Ok(lines
            .iter()
            .fold(Nutrients::default(), |acc, line| acc + line.contribution))
    }

    pub async fn diary(&self, owner: UserId, period: Period) -> PortResult<Vec<DiaryLine>> {
        let (from, to) = period.bounds(Utc::now());
        self.diary_between(owner, from, to).await
    }

    /// Entries whose product no longer resolves are skipped.
    pub async fn diary_between(
        &self,
        owner: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PortResult<Vec<DiaryLine>> {
        let entries = self.ledger.food_log_between(owner, from, to).await?;
        let mut cache: HashMap<ProductRef, Option<Product>> = HashMap::new();
        let mut lines = Vec::with_capacity(entries.len());
        for entry in entries {
            let product = match cache.get(&entry.product) {
                Some(cached) => cached.clone(),
                None => {
                    let fetched = self.products.get(entry.product, owner).await?;
                    cache.insert(entry.product, fetched.clone());
                    fetched
                }
            };
            let Some(product) = product else {
                debug!("Skipping entry {}: product {} no longer exists", entry.id, entry.product);
                continue;
            };
            lines.push(DiaryLine {
                contribution: contribution(&product.per_100g, entry.grams),
                names: product.names,
                entry,
            });
        }
        Ok(lines)
    }
}
