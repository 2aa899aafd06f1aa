//! crates/food_diary_core/src/products.rs
//!
//! The product resolver: search over private and catalog products, owner-scoped lookup,
//! barcode resolution, and product creation with catalog dedup and the free-tier quota.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{
    Nutrients, Product, ProductNames, ProductRef, ProductVariant, Provenance, UserId,
};
use crate::ports::{BarcodeCatalog, BarcodeProduct, LedgerStore, PortResult};
use crate::settings::Settings;
use crate::subscription::SubscriptionLedger;

/// Maximum number of candidates shown for one search.
pub const SEARCH_LIMIT: usize = 10;

/// Outcome of a barcode lookup. Transport failures are kept apart from genuine misses so
/// the conversation can leave the user in place to retry.
#[derive(Debug, Clone, PartialEq)]
pub enum BarcodeResolution {
    Found(BarcodeProduct),
    NotFound,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProductCreation {
    Created {
        private: Product,
        /// `None` when a catalog product with the same name already existed.
        catalog: Option<Product>,
    },
    QuotaExceeded { limit: i64 },
}

pub fn is_barcode(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_digit())
}

fn is_usable_profile(profile: &Nutrients) -> bool {
    [profile.kcal, profile.protein, profile.fat, profile.carbs]
        .iter()
        .all(|v| v.is_finite() && *v >= 0.0)
}

#[derive(Clone)]
pub struct ProductResolver {
    ledger: Arc<dyn LedgerStore>,
    barcodes: Option<Arc<dyn BarcodeCatalog>>,
    settings: Settings,
    subscriptions: SubscriptionLedger,
}

impl ProductResolver {
    /// `barcodes` is `None` when external lookups are disabled.
    pub fn new(ledger: Arc<dyn LedgerStore>, barcodes: Option<Arc<dyn BarcodeCatalog>>) -> Self {
        Self {
            settings: Settings::new(ledger.clone()),
            subscriptions: SubscriptionLedger::new(ledger.clone()),
            ledger,
            barcodes,
        }
    }

    pub fn barcode_lookup_enabled(&self) -> bool {
        self.barcodes.is_some()
    }

    /// Private matches first, then catalog matches, truncated to `limit`.
    /// A private product is not deduplicated against a same-named catalog product.
    pub async fn search(
        &self,
        owner: UserId,
        query: &str,
        limit: usize,
    ) -> PortResult<Vec<Product>> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let mut results = self.ledger.search_private_products(owner, query, limit).await?;
        if results.len() < limit {
            let catalog = self.ledger.search_catalog_products(query, limit).await?;
            results.extend(catalog);
        }
        results.truncate(limit);
        debug!("Search '{}' for user {} returned {} candidates", query, owner, results.len());
        Ok(results)
    }

    /// Private lookups are owner-scoped; catalog lookups are global.
    pub async fn get(&self, reference: ProductRef, owner: UserId) -> PortResult<Option<Product>> {
        match reference.variant {
            ProductVariant::Private => self.ledger.get_private_product(owner, reference.id).await,
            ProductVariant::Catalog => self.ledger.get_catalog_product(reference.id).await,
        }
    }

    pub async fn resolve_barcode(&self, code: &str) -> BarcodeResolution {
        let Some(catalog) = &self.barcodes else {
            return BarcodeResolution::NotFound;
        };
        if !is_barcode(code) {
            return BarcodeResolution::NotFound;
        }
        match catalog.lookup(code).await {
            Ok(Some(product)) if is_usable_profile(&product.per_100g) => {
                BarcodeResolution::Found(product)
            }
            Ok(Some(product)) => {
                warn!(
                    "Barcode {} returned an unusable nutrient profile: {:?}",
                    code, product.per_100g
                );
                BarcodeResolution::NotFound
            }
            Ok(None) => BarcodeResolution::NotFound,
            Err(e) => {
                warn!("Barcode lookup for {} failed: {}", code, e);
                BarcodeResolution::Unavailable
            }
        }
    }

    /// Returns the limit when the owner may not create another private product.
    pub async fn quota_block(&self, owner: UserId) -> PortResult<Option<i64>> {
        let limit = self.settings.free_product_limit().await?;
        let count = self.ledger.count_private_products(owner).await?;
        if count < limit {
            return Ok(None);
        }
        if self.subscriptions.is_active(owner).await? {
            return Ok(None);
        }
        Ok(Some(limit))
    }

    /// Creates the owner's private product and, unless a catalog product already matches
    /// either name, a catalog product with the given provenance.
    pub async fn create_product(
        &self,
        owner: UserId,
        names: &ProductNames,
        per_100g: Nutrients,
        provenance: Provenance,
    ) -> PortResult<ProductCreation> {
        if let Some(limit) = self.quota_block(owner).await? {
            info!("User {} hit the private product limit of {}", owner, limit);
            return Ok(ProductCreation::QuotaExceeded { limit });
        }
        let private = self
            .ledger
            .insert_private_product(owner, names, per_100g)
            .await?;
        let catalog = self
            .ledger
            .insert_catalog_product_if_absent(owner, names, per_100g, provenance)
            .await?;
        info!(
            "User {} created private product {} (catalog: {})",
            owner,
            private.reference.id,
            catalog
                .as_ref()
                .map(|p| p.reference.id.to_string())
                .unwrap_or_else(|| "existing".to_string())
        );
        Ok(ProductCreation::Created { private, catalog })
    }

    /// Recently logged products that still resolve, most recent first.
    pub async fn recent(&self, owner: UserId, limit: usize) -> PortResult<Vec<Product>> {
        let refs = self.ledger.recent_product_refs(owner, limit).await?;
        let mut products = Vec::with_capacity(refs.len());
        for reference in refs {
            if let Some(product) = self.get(reference, owner).await? {
                products.push(product);
            }
        }
        Ok(products)
    }

    pub async fn my_products(&self, owner: UserId, limit: usize) -> PortResult<Vec<Product>> {
        self.ledger.list_private_products(owner, limit).await
    }
}
