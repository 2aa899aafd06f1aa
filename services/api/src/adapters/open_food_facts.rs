//! services/api/src/adapters/open_food_facts.rs
//!
//! `BarcodeCatalog` backed by the public Open Food Facts product API.

use async_trait::async_trait;
use food_diary_core::domain::Nutrients;
use food_diary_core::ports::{BarcodeCatalog, BarcodeProduct, PortError, PortResult};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct OpenFoodFactsAdapter {
    client: Client,
    api_base: String,
}

impl OpenFoodFactsAdapter {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn product_url(&self, code: &str) -> String {
        format!("{}/api/v2/product/{}.json", self.api_base, code)
    }
}

/// Reads a nutrient that the catalog reports either as a JSON number or as a numeric string.
fn nutrient(nutriments: &Value, key: &str) -> Option<f64> {
    let value = nutriments.get(key)?;
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok()?,
        _ => return None,
    };
    (number.is_finite() && number >= 0.0).then_some(number)
}

fn non_empty(product: &Value, key: &str) -> Option<String> {
    product
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Normalizes a product payload. Anything short of a found product with a name and all four
/// per-100g values is a miss.
pub fn parse_product(code: &str, body: &Value) -> Option<BarcodeProduct> {
    if body.get("status").and_then(Value::as_i64) != Some(1) {
        return None;
    }
    let product = body.get("product")?;
    let name = non_empty(product, "product_name")
        .or_else(|| non_empty(product, "product_name_en"))?;
    let nutriments = product.get("nutriments")?;
    let kcal = nutrient(nutriments, "energy-kcal_100g")
        .or_else(|| nutrient(nutriments, "energy-kcal_value"))?;

    Some(BarcodeProduct {
        code: code.to_string(),
        name,
        per_100g: Nutrients::new(
            kcal,
            nutrient(nutriments, "proteins_100g")?,
            nutrient(nutriments, "fat_100g")?,
            nutrient(nutriments, "carbohydrates_100g")?,
        ),
    })
}

#[async_trait]
impl BarcodeCatalog for OpenFoodFactsAdapter {
    async fn lookup(&self, code: &str) -> PortResult<Option<BarcodeProduct>> {
        let url = self.product_url(code);
        debug!("Looking up barcode at {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!("Barcode lookup for {} failed: {}", code, e);
            PortError::Unavailable(e.to_string())
        })?;
        // The catalog answers unknown codes with 404 and a `status: 0` body.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            warn!("Barcode lookup for {} returned {}", code, response.status());
            return Err(PortError::Unavailable(format!(
                "catalog returned {}",
                response.status()
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            warn!("Barcode lookup for {} returned an unreadable body: {}", code, e);
            PortError::Unavailable(e.to_string())
        })?;
        Ok(parse_product(code, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn complete_payload_is_normalized() {
        let body = json!({
            "status": 1,
            "product": {
                "product_name": "",
                "product_name_en": "Kefir 2.5%",
                "nutriments": {
                    "energy-kcal_value": 53,
                    "proteins_100g": "2,9",
                    "fat_100g": 2.5,
                    "carbohydrates_100g": 4
                }
            }
        });
        let product = parse_product("4607", &body).unwrap();
        assert_eq!(product.name, "Kefir 2.5%");
        assert_eq!(product.per_100g, Nutrients::new(53.0, 2.9, 2.5, 4.0));
    }

    #[test]
    fn status_zero_is_a_miss() {
        let body = json!({ "status": 0, "status_verbose": "product not found" });
        assert!(parse_product("1", &body).is_none());
    }

    #[test]
    fn a_null_nutrient_is_a_miss() {
        let body = json!({
            "status": 1,
            "product": {
                "product_name": "Bread",
                "nutriments": {
                    "energy-kcal_100g": 250,
                    "proteins_100g": 8,
                    "fat_100g": null,
                    "carbohydrates_100g": 48
                }
            }
        });
        assert!(parse_product("2", &body).is_none());
    }

    #[test]
    fn url_has_no_double_slash() {
        let adapter =
            OpenFoodFactsAdapter::new("https://world.openfoodfacts.org/", Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            adapter.product_url("4601"),
            "https://world.openfoodfacts.org/api/v2/product/4601.json"
        );
    }
}
