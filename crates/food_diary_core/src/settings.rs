//! crates/food_diary_core/src/settings.rs
//!
//! Typed access to the process-wide key/value settings. Reads go straight to the ledger
//! every time and fall back to defaults; writes are immediate.

use std::sync::Arc;
use tracing::warn;

use crate::domain::{Language, PaymentProvider};
use crate::ports::{LedgerStore, PortResult};

const DEFAULT_TEXT_RU: &str = "Подписка на 30 дней открывает:\n• статистику за месяц\n• экспорт PDF\n• историю без ограничений\n• снимает лимит «Мои продукты» (10 → ∞)";
const DEFAULT_TEXT_EN: &str = "30-day subscription unlocks:\n• monthly analytics\n• PDF export\n• unlimited history\n• removes 'My products' limit (10 → ∞)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    SubscriptionEnabled,
    SubscriptionDays,
    PriceStars,
    PriceRub,
    FreeProductLimit,
    MarketingTextRu,
    MarketingTextEn,
}

impl SettingKey {
    pub fn as_str(self) -> &'static str {
        match self {
            SettingKey::SubscriptionEnabled => "subscription_enabled",
            SettingKey::SubscriptionDays => "subscription_days",
            SettingKey::PriceStars => "sub_price_stars",
            SettingKey::PriceRub => "sub_price_rub",
            SettingKey::FreeProductLimit => "free_my_products_limit",
            SettingKey::MarketingTextRu => "sub_included_text_ru",
            SettingKey::MarketingTextEn => "sub_included_text_en",
        }
    }

    pub fn default_value(self) -> &'static str {
        match self {
            SettingKey::SubscriptionEnabled => "0",
            SettingKey::SubscriptionDays => "30",
            SettingKey::PriceStars => "100",
            SettingKey::PriceRub => "199",
            SettingKey::FreeProductLimit => "10",
            SettingKey::MarketingTextRu => DEFAULT_TEXT_RU,
            SettingKey::MarketingTextEn => DEFAULT_TEXT_EN,
        }
    }

    fn price_for(rail: PaymentProvider) -> Self {
        match rail {
            PaymentProvider::Stars => SettingKey::PriceStars,
            PaymentProvider::YooKassa => SettingKey::PriceRub,
        }
    }

    fn marketing_text_for(language: Language) -> Self {
        match language {
            Language::Ru => SettingKey::MarketingTextRu,
            Language::En => SettingKey::MarketingTextEn,
        }
    }
}

#[derive(Clone)]
pub struct Settings {
    ledger: Arc<dyn LedgerStore>,
}

impl Settings {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    async fn read(&self, key: SettingKey) -> PortResult<String> {
        Ok(self
            .ledger
            .get_setting(key.as_str())
            .await?
            .unwrap_or_else(|| key.default_value().to_string()))
    }

    async fn read_number(&self, key: SettingKey) -> PortResult<i64> {
        let raw = self.read(key).await?;
        match raw.trim().parse::<i64>() {
            Ok(value) => Ok(value),
            Err(_) => {
                warn!("Setting '{}' holds non-numeric '{}', using default", key.as_str(), raw);
                Ok(key.default_value().parse().unwrap_or_default())
            }
        }
    }

    async fn write(&self, key: SettingKey, value: &str) -> PortResult<()> {
        self.ledger.set_setting(key.as_str(), value).await
    }

    pub async fn subscription_enabled(&self) -> PortResult<bool> {
        Ok(self.read(SettingKey::SubscriptionEnabled).await?.trim() == "1")
    }

    /// Flips the subscription switch and returns the new value.
    pub async fn toggle_subscription(&self) -> PortResult<bool> {
        let enabled = !self.subscription_enabled().await?;
        self.write(SettingKey::SubscriptionEnabled, if enabled { "1" } else { "0" })
            .await?;
        Ok(enabled)
    }

    pub async fn subscription_days(&self) -> PortResult<i64> {
        self.read_number(SettingKey::SubscriptionDays).await
    }

    pub async fn price(&self, rail: PaymentProvider) -> PortResult<i64> {
        self.read_number(SettingKey::price_for(rail)).await
    }

    pub async fn set_price(&self, rail: PaymentProvider, amount: i64) -> PortResult<()> {
        self.write(SettingKey::price_for(rail), &amount.to_string())
            .await
    }

    pub async fn free_product_limit(&self) -> PortResult<i64> {
        self.read_number(SettingKey::FreeProductLimit).await
    }

    pub async fn marketing_text(&self, language: Language) -> PortResult<String> {
        self.read(SettingKey::marketing_text_for(language)).await
    }

    pub async fn set_marketing_text(&self, language: Language, text: &str) -> PortResult<()> {
        self.write(SettingKey::marketing_text_for(language), text)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLedger;

    #[tokio::test]
    async fn defaults_apply_until_written() {
        let settings = Settings::new(Arc::new(InMemoryLedger::new()));
        assert!(!settings.subscription_enabled().await.unwrap());
        assert_eq!(settings.price(PaymentProvider::YooKassa).await.unwrap(), 199);
        assert_eq!(settings.price(PaymentProvider::Stars).await.unwrap(), 100);
        assert_eq!(settings.free_product_limit().await.unwrap(), 10);
        assert_eq!(settings.subscription_days().await.unwrap(), 30);

        settings.set_price(PaymentProvider::Stars, 250).await.unwrap();
        assert_eq!(settings.price(PaymentProvider::Stars).await.unwrap(), 250);
    }

    #[tokio::test]
    async fn toggle_flips_and_persists() {
        let settings = Settings::new(Arc::new(InMemoryLedger::new()));
        assert!(settings.toggle_subscription().await.unwrap());
        assert!(settings.subscription_enabled().await.unwrap());
        assert!(!settings.toggle_subscription().await.unwrap());
    }

    #[tokio::test]
    async fn garbage_numbers_fall_back_to_default() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger
            .set_setting(SettingKey::FreeProductLimit.as_str(), "lots")
            .await
            .unwrap();
        let settings = Settings::new(ledger);
        assert_eq!(settings.free_product_limit().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn marketing_text_is_per_language() {
        let settings = Settings::new(Arc::new(InMemoryLedger::new()));
        settings
            .set_marketing_text(Language::En, "Everything, forever")
            .await
            .unwrap();
        assert_eq!(
            settings.marketing_text(Language::En).await.unwrap(),
            "Everything, forever"
        );
        assert!(settings
            .marketing_text(Language::Ru)
            .await
            .unwrap()
            .starts_with("Подписка"));
    }
}
