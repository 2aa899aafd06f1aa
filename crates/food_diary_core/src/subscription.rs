//! crates/food_diary_core/src/subscription.rs
//!
//! The subscription ledger: one expiry timestamp per user, an "active" predicate,
//! and additive extension.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::info;

use crate::domain::UserId;
use crate::ports::{LedgerStore, PortResult};

/// Computes the expiry after granting `days` more days.
///
/// Extension is additive and never shortens: time still remaining on an active grant is kept,
/// a lapsed or missing grant starts from `now`.
pub fn extended_expiry(
    now: DateTime<Utc>,
    current: Option<DateTime<Utc>>,
    days: i64,
) -> DateTime<Utc> {
    let base = match current {
        Some(until) if until > now => until,
        _ => now,
    };
    base + Duration::days(days)
}

pub fn is_active_at(until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    matches!(until, Some(until) if until > now)
}

#[derive(Clone)]
pub struct SubscriptionLedger {
    ledger: Arc<dyn LedgerStore>,
}

impl SubscriptionLedger {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    pub async fn expiry(&self, user_id: UserId) -> PortResult<Option<DateTime<Utc>>> {
        Ok(self.ledger.get_user(user_id).await?.subscription_until)
    }

    pub async fn is_active(&self, user_id: UserId) -> PortResult<bool> {
        let until = self.expiry(user_id).await?;
        Ok(is_active_at(until, Utc::now()))
    }

    pub async fn extend(&self, user_id: UserId, days: i64) -> PortResult<DateTime<Utc>> {
        let until = self
            .ledger
            .extend_subscription(user_id, days, Utc::now())
            .await?;
        info!("Subscription for user {} extended by {} days to {}", user_id, days, until);
        Ok(until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn extension_from_nothing_starts_now() {
        assert_eq!(extended_expiry(at(1), None, 30), at(1) + Duration::days(30));
    }

    #[test]
    fn extension_of_active_grant_stacks() {
        let first = extended_expiry(at(1), Some(at(10)), 30);
        let second = extended_expiry(at(2), Some(first), 30);
        assert_eq!(second, at(10) + Duration::days(60));
    }

    #[test]
    fn lapsed_grant_restarts_from_now() {
        assert_eq!(extended_expiry(at(20), Some(at(10)), 30), at(20) + Duration::days(30));
    }

    #[test]
    fn expiry_in_the_past_is_inactive() {
        assert!(!is_active_at(Some(at(1)), at(2)));
        assert!(!is_active_at(None, at(2)));
        assert!(is_active_at(Some(at(3)), at(2)));
    }
}
