//! Structured outbound replies. Each reply names what happened and carries the data a renderer
//! needs; turning it into localized text is the presentation layer's job.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::input::{Command, PickRequest};
use super::parse::QUICK_GRAM_STEPS;
use crate::domain::{
    AnalyticsSnapshot, Feedback, Language, MealSlot, Nutrients, PaymentProvider, PaymentStatus,
    Product, ProductNames, Subscriber,
};
use crate::nutrition::{DiaryLine, Period};
use crate::payments::StarsInvoice;

/// What the user is being asked to type next.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "prompt", rename_all = "snake_case")]
pub enum Prompt {
    Macros,
    Names,
    SearchQuery,
    Barcode,
    Meal,
    Grams { running_total: f64 },
    Feedback,
    Price { rail: PaymentProvider, current: i64 },
    MarketingText { language: Language, current: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    // Navigation
    LanguagePicker,
    LanguageSet { language: Language },
    MainMenu,
    AddFoodMenu,
    DiaryMenu,
    SummaryMenu,
    MoreMenu { subscription: bool, admin: bool },
    SettingsMenu { language: Language },
    AccessDenied,

    // Step prompts
    Prompt(Prompt),
    /// Input did not validate; the same step is still active.
    InvalidInput(Prompt),

    // Products
    LimitReached { limit: i64 },
    ProductCreated { product: Product, catalog_added: bool },
    SearchResults { products: Vec<Product>, for_logging: bool },
    NoResults,
    ProductView { product: Product },
    ProductNotFound,
    BarcodeAdded { product: Product, for_logging: bool },
    BarcodeLookupDisabled,
    MyProducts { products: Vec<Product> },
    RecentProducts { products: Vec<Product> },

    // Food log
    FoodLogged {
        names: ProductNames,
        grams: f64,
        meal: MealSlot,
        contribution: Nutrients,
    },
    Diary { lines: Vec<DiaryLine>, totals: Nutrients },
    /// Today's totals for the document renderer.
    DailyReport { date: NaiveDate, totals: Nutrients },
    Summary { period: Period, totals: Nutrients },
    FeedbackThanks,

    // Subscription
    SubscriptionScreen {
        active_until: Option<DateTime<Utc>>,
        marketing_text: String,
        price_stars: i64,
        price_rub: i64,
        redirect_rail: bool,
    },
    StarsInvoice(StarsInvoice),
    PaymentLink { url: Option<String>, amount: i64 },
    PaymentUnavailable,
    PaymentPending,
    PaymentFailed { status: PaymentStatus },
    NoPayment,
    SubscriptionActivated { until: Option<DateTime<Utc>> },
    PaymentAlreadyRecorded,

    // Admin
    AdminMenu,
    Analytics(AnalyticsSnapshot),
    Subscribers { subscribers: Vec<Subscriber> },
    FeedbackInbox { items: Vec<Feedback> },
    AdminSubscription {
        enabled: bool,
        price_stars: i64,
        price_rub: i64,
        marketing_text: String,
    },
    SettingSaved,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PickButton {
    pub callback_data: String,
    pub names: ProductNames,
}

impl PickButton {
    fn new(product: &Product, for_logging: bool) -> Self {
        Self {
            callback_data: PickRequest {
                product: product.reference,
                for_logging,
            }
            .callback_data(),
            names: product.names.clone(),
        }
    }
}

/// Keyboard attached to a reply. Reply keyboards are rows of command identifiers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "buttons", rename_all = "snake_case")]
pub enum Keyboard {
    Reply(Vec<Vec<Command>>),
    Inline(Vec<PickButton>),
    /// Leave whatever keyboard is currently shown.
    Keep,
}

fn main_menu() -> Keyboard {
    Keyboard::Reply(vec![
        vec![Command::AddFood, Command::Diary],
        vec![Command::Summary, Command::More],
    ])
}

fn back_only() -> Keyboard {
    Keyboard::Reply(vec![vec![Command::Back]])
}

impl Reply {
    pub fn keyboard(&self) -> Keyboard {
        match self {
            Reply::LanguagePicker | Reply::SettingsMenu { .. } => Keyboard::Reply(vec![
                vec![
                    Command::SetLanguage(Language::Ru),
                    Command::SetLanguage(Language::En),
                ],
                vec![Command::Back],
            ]),
            Reply::AddFoodMenu => Keyboard::Reply(vec![
                vec![Command::FindForLog, Command::Recent],
                vec![Command::MyProducts, Command::AddNewProduct],
                vec![Command::ScanBarcode],
                vec![Command::Back],
            ]),
            Reply::DiaryMenu => Keyboard::Reply(vec![
                vec![Command::DiaryToday, Command::ExportToday],
                vec![Command::Back],
            ]),
            Reply::SummaryMenu => Keyboard::Reply(vec![
                vec![
                    Command::ShowSummary(Period::Today),
                    Command::ShowSummary(Period::Last7Days),
                ],
                vec![Command::ShowSummary(Period::Last30Days)],
                vec![Command::Back],
            ]),
            Reply::MoreMenu {
                subscription,
                admin,
            } => {
                let mut rows = vec![
                    vec![Command::MyProducts, Command::Search],
                    vec![Command::Feedback, Command::Settings],
                ];
                let mut extra = Vec::new();
                if *subscription {
                    extra.push(Command::Subscription);
                }
                if *admin {
                    extra.push(Command::Admin);
                }
                if !extra.is_empty() {
                    rows.push(extra);
                }
                rows.push(vec![Command::Back]);
                Keyboard::Reply(rows)
            }
            Reply::Prompt(Prompt::Meal) => Keyboard::Reply(vec![
                vec![
                    Command::Meal(MealSlot::Breakfast),
                    Command::Meal(MealSlot::Lunch),
                ],
                vec![
                    Command::Meal(MealSlot::Dinner),
                    Command::Meal(MealSlot::Snack),
                ],
                vec![Command::Back],
            ]),
            Reply::Prompt(Prompt::Grams { running_total }) => {
                let mut rows = vec![QUICK_GRAM_STEPS
                    .iter()
                    .map(|step| Command::AddGrams(*step))
                    .collect()];
                if *running_total > 0.0 {
                    rows.push(vec![Command::CommitGrams]);
                }
                rows.push(vec![Command::Back]);
                Keyboard::Reply(rows)
            }
            Reply::Prompt(_) | Reply::NoResults | Reply::MyProducts { .. } => back_only(),
            Reply::InvalidInput(_) => Keyboard::Keep,
            Reply::SearchResults {
                products,
                for_logging,
            } => Keyboard::Inline(
                products
                    .iter()
                    .map(|p| PickButton::new(p, *for_logging))
                    .collect(),
            ),
            Reply::RecentProducts { products } => {
                Keyboard::Inline(products.iter().map(|p| PickButton::new(p, true)).collect())
            }
            Reply::BarcodeAdded {
                product,
                for_logging: true,
            } => Keyboard::Inline(vec![PickButton::new(product, true)]),
            Reply::SubscriptionScreen { redirect_rail, .. } => {
                let mut pay = vec![Command::PayStars];
                if *redirect_rail {
                    pay.push(Command::PayRedirect);
                }
                Keyboard::Reply(vec![pay, vec![Command::CheckPayment], vec![Command::Back]])
            }
            Reply::PaymentLink { .. } | Reply::PaymentPending => Keyboard::Reply(vec![
                vec![Command::CheckPayment],
                vec![Command::Back],
            ]),
            Reply::StarsInvoice(_) => Keyboard::Keep,
            Reply::AdminMenu
            | Reply::Analytics(_)
            | Reply::Subscribers { .. }
            | Reply::FeedbackInbox { .. } => Keyboard::Reply(vec![
                vec![Command::AdminAnalytics, Command::AdminSubscribers],
                vec![Command::AdminFeedback, Command::AdminSubscription],
                vec![Command::Back],
            ]),
            Reply::AdminSubscription { .. } => Keyboard::Reply(vec![
                vec![Command::ToggleSubscription],
                vec![
                    Command::SetPrice(PaymentProvider::Stars),
                    Command::SetPrice(PaymentProvider::YooKassa),
                ],
                vec![Command::EditMarketingText],
                vec![Command::Back],
            ]),
            _ => main_menu(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProductRef;
    use serde_json::json;

    #[test]
    fn more_menu_hides_gated_entries() {
        let Keyboard::Reply(rows) = (Reply::MoreMenu {
            subscription: false,
            admin: false,
        })
        .keyboard() else {
            panic!("expected a reply keyboard");
        };
        let flat: Vec<Command> = rows.into_iter().flatten().collect();
        assert!(!flat.contains(&Command::Subscription));
        assert!(!flat.contains(&Command::Admin));
    }

    #[test]
    fn search_results_become_pick_buttons() {
        let product = Product {
            reference: ProductRef::catalog(3),
            names: ProductNames::new("Гречка", "Buckwheat"),
            per_100g: Nutrients::new(343.0, 13.3, 3.4, 71.5),
        };
        let reply = Reply::SearchResults {
            products: vec![product],
            for_logging: true,
        };
        let keyboard = serde_json::to_value(reply.keyboard()).unwrap();
        assert_eq!(keyboard["type"], "inline");
        assert_eq!(keyboard["buttons"][0]["callback_data"], "pick:catalog:3:1");
    }

    #[test]
    fn replies_serialise_with_a_kind_tag() {
        let value = serde_json::to_value(Reply::InvalidInput(Prompt::Macros)).unwrap();
        assert_eq!(value, json!({ "kind": "invalid_input", "prompt": "macros" }));
        let keyboard = serde_json::to_value(Reply::MainMenu.keyboard()).unwrap();
        assert_eq!(keyboard["buttons"][0][0], "add_food");
    }
}
