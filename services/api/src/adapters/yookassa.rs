//! services/api/src/adapters/yookassa.rs
//!
//! `PaymentGateway` for the YooKassa v3 payments API (redirect confirmation).

use async_trait::async_trait;
use food_diary_core::ports::{
    PaymentGateway, PaymentIntent, PaymentRequest, PortError, PortResult, ProviderPayment,
};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::config::YooKassaConfig;

#[derive(Clone)]
pub struct YooKassaAdapter {
    client: Client,
    config: YooKassaConfig,
}

impl YooKassaAdapter {
    pub fn new(config: YooKassaConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn payments_url(&self) -> String {
        format!("{}/v3/payments", self.config.api_base.trim_end_matches('/'))
    }

    async fn read_body(&self, response: reqwest::Response) -> PortResult<Value> {
        let status = response.status();
        let body = response.text().await.map_err(|e| PortError::Unavailable(e.to_string()))?;
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            error!("YooKassa rejected the shop credentials ({})", status);
            return Err(PortError::Unauthorized);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(PortError::NotFound(body));
        }
        if !status.is_success() {
            error!("YooKassa returned {}: {}", status, body);
            return Err(PortError::Unavailable(format!("provider returned {}", status)));
        }
        serde_json::from_str(&body).map_err(|e| PortError::Unexpected(e.to_string()))
    }
}

/// The create-payment body: whole roubles, immediate capture, the buyer in metadata.
pub fn payment_body(request: &PaymentRequest, return_url: &str) -> Value {
    json!({
        "amount": {
            "value": format!("{}.00", request.amount),
            "currency": request.currency,
        },
        "confirmation": {
            "type": "redirect",
            "return_url": return_url,
        },
        "capture": true,
        "description": request.description,
        "metadata": {
            "telegram_user_id": request.owner.to_string(),
        },
    })
}

fn field(raw: &Value, key: &str) -> PortResult<String> {
    raw.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| PortError::Unexpected(format!("payment response without '{}'", key)))
}

pub fn parse_intent(raw: Value) -> PortResult<PaymentIntent> {
    Ok(PaymentIntent {
        id: field(&raw, "id")?,
        status: field(&raw, "status")?,
        confirmation_url: raw
            .pointer("/confirmation/confirmation_url")
            .and_then(Value::as_str)
            .map(str::to_string),
        raw,
    })
}

pub fn parse_payment(raw: Value) -> PortResult<ProviderPayment> {
    Ok(ProviderPayment {
        id: field(&raw, "id")?,
        status: field(&raw, "status")?,
        raw,
    })
}

#[async_trait]
impl PaymentGateway for YooKassaAdapter {
    async fn create_payment(&self, request: PaymentRequest) -> PortResult<PaymentIntent> {
        let body = payment_body(&request, &self.config.return_url);
        let response = self
            .client
            .post(self.payments_url())
            .basic_auth(&self.config.shop_id, Some(&self.config.secret_key))
            .header("Idempotence-Key", &request.idempotency_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Creating a payment for user {} failed: {}", request.owner, e);
                PortError::Unavailable(e.to_string())
            })?;

        let intent = parse_intent(self.read_body(response).await?)?;
        info!(
            "Created YooKassa payment {} for user {} ({})",
            intent.id, request.owner, intent.status
        );
        Ok(intent)
    }

    async fn fetch_payment(&self, payment_id: &str) -> PortResult<ProviderPayment> {
        let url = format!("{}/{}", self.payments_url(), payment_id);
        debug!("Fetching payment status from {}", url);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.config.shop_id, Some(&self.config.secret_key))
            .send()
            .await
            .map_err(|e| PortError::Unavailable(e.to_string()))?;
        parse_payment(self.read_body(response).await?)
    }
}
