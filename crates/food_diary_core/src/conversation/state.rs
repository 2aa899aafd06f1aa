use serde::{Deserialize, Serialize};

use crate::domain::{Language, MealSlot, Nutrients, PaymentProvider, ProductRef};

/// The step a user is in, carrying exactly the fields collected so far for that step.
///
/// Serialised with a `step` tag so it can be stored as a single JSON document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ConversationState {
    #[default]
    Idle,
    AwaitingMacros,
    AwaitingNames {
        per_100g: Nutrients,
    },
    AwaitingSearchQuery {
        for_logging: bool,
    },
    AwaitingBarcode {
        for_logging: bool,
    },
    AwaitingMealSelection {
        product: ProductRef,
    },
    AwaitingGrams {
        product: ProductRef,
        meal: MealSlot,
        /// Running total built from quick increments.
        grams: f64,
    },
    AwaitingFeedback,
    AwaitingPrice {
        rail: PaymentProvider,
    },
    AwaitingMarketingText {
        language: Language,
    },
}

impl ConversationState {
    pub fn is_idle(&self) -> bool {
        matches!(self, ConversationState::Idle)
    }

    /// Short tag used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ConversationState::Idle => "idle",
            ConversationState::AwaitingMacros => "awaiting_macros",
            ConversationState::AwaitingNames { .. } => "awaiting_names",
            ConversationState::AwaitingSearchQuery { .. } => "awaiting_search_query",
            ConversationState::AwaitingBarcode { .. } => "awaiting_barcode",
            ConversationState::AwaitingMealSelection { .. } => "awaiting_meal_selection",
            ConversationState::AwaitingGrams { .. } => "awaiting_grams",
            ConversationState::AwaitingFeedback => "awaiting_feedback",
            ConversationState::AwaitingPrice { .. } => "awaiting_price",
            ConversationState::AwaitingMarketingText { .. } => "awaiting_marketing_text",
        }
    }
}
