//! crates/food_diary_core/src/payments.rs
//!
//! The payment reconciler. Creates redirect-rail payment intents, reconciles their status
//! against the provider, and records in-band rail confirmations. Every path that grants
//! entitlement goes through an atomic ledger operation that extends the subscription only
//! when a payment row moves into `succeeded`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{NewPayment, Payment, PaymentProvider, PaymentStatus, UserId};
use crate::ports::{
    LedgerStore, PaymentGateway, PaymentRequest, PortError, PortResult, Settlement,
};
use crate::settings::Settings;

/// Currency marker of the in-band rail.
pub const STARS_CURRENCY: &str = "XTR";
/// Currency of the redirect rail.
pub const RUB_CURRENCY: &str = "RUB";

/// A created redirect-rail payment, already persisted as `pending`.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentLink {
    pub payment: Payment,
    pub confirmation_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// No local row: the payment was not created by this system.
    UnknownPayment,
    /// The provider has not reached a terminal status yet.
    StillPending,
    /// This call moved the row into a terminal status.
    Settled {
        status: PaymentStatus,
        subscription_until: Option<DateTime<Utc>>,
    },
    /// The row was terminal before this call. No side effects.
    AlreadySettled(PaymentStatus),
}

/// A successful-payment event delivered in-band by the messaging platform.
#[derive(Debug, Clone, PartialEq)]
pub struct InBandPayment {
    pub owner: UserId,
    pub currency: String,
    pub total_amount: i64,
    pub charge_id: String,
    /// Opaque correlation payload chosen when the invoice was issued. Audit metadata only.
    pub invoice_payload: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InBandOutcome {
    Activated { subscription_until: Option<DateTime<Utc>> },
    /// The same charge id was already recorded.
    Duplicate,
    /// Not a subscription purchase on the in-band rail.
    Ignored,
}

/// What the presentation layer needs to issue an in-band invoice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StarsInvoice {
    pub amount: i64,
    pub currency: &'static str,
    pub days: i64,
    pub payload: String,
}

#[derive(Clone)]
pub struct PaymentReconciler {
    ledger: Arc<dyn LedgerStore>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    settings: Settings,
}

impl PaymentReconciler {
    /// `gateway` is `None` when the redirect rail is not configured.
    pub fn new(ledger: Arc<dyn LedgerStore>, gateway: Option<Arc<dyn PaymentGateway>>) -> Self {
        Self {
            settings: Settings::new(ledger.clone()),
            ledger,
            gateway,
        }
    }

    pub fn redirect_rail_enabled(&self) -> bool {
        self.gateway.is_some()
    }

    fn gateway(&self) -> PortResult<&Arc<dyn PaymentGateway>> {
        self.gateway
            .as_ref()
            .ok_or_else(|| {
                PortError::Unavailable("redirect payment rail is not configured".to_string())
            })
    }

    /// Creates a provider payment under `idempotency_key` and persists it as `pending`
    /// before handing back the confirmation link.
    pub async fn create_intent(
        &self,
        owner: UserId,
        amount: i64,
        description: &str,
        idempotency_key: &str,
    ) -> PortResult<PaymentLink> {
        let gateway = self.gateway()?;
        let intent = gateway
            .create_payment(PaymentRequest {
                owner,
                amount,
                currency: RUB_CURRENCY.to_string(),
                description: description.to_string(),
                idempotency_key: idempotency_key.to_string(),
            })
            .await?;

        let payment = self
            .ledger
            .insert_pending_payment(NewPayment {
                owner,
                provider: PaymentProvider::YooKassa,
                amount,
                currency: RUB_CURRENCY.to_string(),
                status: PaymentStatus::Pending,
                provider_payment_id: intent.id.clone(),
                idempotency_key: idempotency_key.to_string(),
                metadata: intent.raw.clone(),
            })
            .await?;
        info!(
            "Created payment {} for user {} ({} {})",
            intent.id, owner, amount, RUB_CURRENCY
        );

        Ok(PaymentLink {
            payment,
            confirmation_url: intent.confirmation_url,
        })
    }

    /// Hands out the redirect link for one purchase attempt.
    ///
    /// A still-pending payment of the same amount is reused instead of opening a new one.
    /// Otherwise the idempotency key is derived from the user's latest rail payment, so a
    /// retry after a lost provider response reaches the payment that was already created.
    pub async fn open_intent(
        &self,
        owner: UserId,
        amount: i64,
        description: &str,
    ) -> PortResult<PaymentLink> {
        let latest = self
            .ledger
            .latest_payment(owner, PaymentProvider::YooKassa)
            .await?;

        if let Some(pending) = latest
            .as_ref()
            .filter(|p| p.status == PaymentStatus::Pending && p.amount == amount)
        {
            let id = &pending.provider_payment_id;
            if self.reconcile(id).await? == Reconciliation::StillPending {
                let refreshed = self.ledger.get_payment(PaymentProvider::YooKassa, id).await?;
                if let Some(payment) = refreshed {
                    info!("Reusing pending payment {} for user {}", id, owner);
                    return Ok(PaymentLink {
                        confirmation_url: confirmation_url(&payment.metadata),
                        payment,
                    });
                }
            }
        }

        let key = attempt_key(owner, latest.as_ref());
        self.create_intent(owner, amount, description, &key).await
    }

    /// Applies the provider's authoritative status to the local row. Safe to call any number
    /// of times and concurrently: the subscription is extended only by the call that moves
    /// the row into `succeeded`.
    pub async fn reconcile(&self, provider_payment_id: &str) -> PortResult<Reconciliation> {
        let Some(local) = self
            .ledger
            .get_payment(PaymentProvider::YooKassa, provider_payment_id)
            .await?
        else {
            info!("Ignoring notification for unknown payment {}", provider_payment_id);
            return Ok(Reconciliation::UnknownPayment);
        };
        if local.status.is_terminal() {
            return Ok(Reconciliation::AlreadySettled(local.status));
        }

        let remote = self.gateway()?.fetch_payment(provider_payment_id).await?;
        if remote.id != provider_payment_id {
            warn!(
                "Provider answered for payment {} when asked about {}",
                remote.id, provider_payment_id
            );
            return Err(PortError::Unexpected("provider returned a different payment".to_string()));
        }

        let status = PaymentStatus::from_provider(&remote.status);
        if !status.is_terminal() {
            self.ledger
                .refresh_pending_metadata(
                    PaymentProvider::YooKassa,
                    provider_payment_id,
                    remote.raw,
                )
                .await?;
            return Ok(Reconciliation::StillPending);
        }

        let days = self.settings.subscription_days().await?;
        let settlement = self
            .ledger
            .settle_payment(
                PaymentProvider::YooKassa,
                provider_payment_id,
                status,
                remote.raw,
                days,
                Utc::now(),
            )
            .await?;

        Ok(match settlement {
            Settlement::Applied {
                status,
                subscription_until,
            } => {
                info!(
                    "Payment {} settled as {} for user {}",
                    provider_payment_id,
                    status.as_str(),
                    local.owner
                );
                Reconciliation::Settled {
                    status,
                    subscription_until,
                }
            }
            Settlement::AlreadyTerminal(status) => Reconciliation::AlreadySettled(status),
            Settlement::UnknownPayment => Reconciliation::UnknownPayment,
        })
    }

    /// Reconciles the user's most recent redirect-rail payment. `None` when there is none.
    pub async fn check_latest(&self, owner: UserId) -> PortResult<Option<Reconciliation>> {
        let Some(latest) = self
            .ledger
            .latest_payment(owner, PaymentProvider::YooKassa)
            .await?
        else {
            return Ok(None);
        };
        self.reconcile(&latest.provider_payment_id).await.map(Some)
    }

    pub async fn stars_invoice(&self, owner: UserId) -> PortResult<StarsInvoice> {
        let amount = self.settings.price(PaymentProvider::Stars).await?;
        let days = self.settings.subscription_days().await?;
        Ok(StarsInvoice {
            amount,
            currency: STARS_CURRENCY,
            days,
            payload: format!("sub{}:{}:{}", days, owner, Utc::now().timestamp()),
        })
    }

    /// Records an in-band confirmation. The row is inserted already `succeeded`; a repeated
    /// delivery of the same charge id is a no-op.
    pub async fn record_in_band(&self, payment: InBandPayment) -> PortResult<InBandOutcome> {
        if payment.currency != STARS_CURRENCY {
            info!(
                "Ignoring in-band payment {} in currency {}",
                payment.charge_id, payment.currency
            );
            return Ok(InBandOutcome::Ignored);
        }
        let charge_id = if payment.charge_id.trim().is_empty() {
            Uuid::new_v4().to_string()
        } else {
            payment.charge_id.clone()
        };

        let days = self.settings.subscription_days().await?;
        let settlement = self
            .ledger
            .insert_settled_payment(
                NewPayment {
                    owner: payment.owner,
                    provider: PaymentProvider::Stars,
                    amount: payment.total_amount,
                    currency: STARS_CURRENCY.to_string(),
                    status: PaymentStatus::Succeeded,
                    provider_payment_id: charge_id.clone(),
                    idempotency_key: Uuid::new_v4().to_string(),
                    metadata: json!({ "payload": payment.invoice_payload }),
                },
                days,
                Utc::now(),
            )
            .await?;

        Ok(match settlement {
            Settlement::Applied {
                subscription_until, ..
            } => {
                info!("In-band payment {} activated user {}", charge_id, payment.owner);
                InBandOutcome::Activated { subscription_until }
            }
            Settlement::AlreadyTerminal(_) | Settlement::UnknownPayment => {
                info!("In-band payment {} was already recorded", charge_id);
                InBandOutcome::Duplicate
            }
        })
    }
}

/// One key per purchase attempt: it only changes once a new rail payment row exists.
fn attempt_key(owner: UserId, latest: Option<&Payment>) -> String {
    format!("sub-{}-after-{}", owner, latest.map_or(0, |p| p.id))
}

fn confirmation_url(metadata: &serde_json::Value) -> Option<String> {
    metadata
        .pointer("/confirmation/confirmation_url")
        .and_then(|url| url.as_str())
        .map(str::to_string)
}
