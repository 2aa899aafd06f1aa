//! The conversation engine: maps (current step, inbound input) to replies, the next step and
//! any ledger writes.

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::input::{Command, IncomingMessage, Input, PickRequest};
use super::parse::{parse_grams, parse_macros, parse_names, parse_price, parse_quick_grams};
use super::reply::{Prompt, Reply};
use super::state::ConversationState;
use crate::domain::{
    Language, MealSlot, Nutrients, PaymentProvider, PaymentStatus, ProductNames, ProductRef,
    Provenance, User, UserId, FEEDBACK_STATUS_NEW,
};
use crate::nutrition::{contribution, NutritionAggregator, Period};
use crate::payments::{InBandOutcome, InBandPayment, PaymentReconciler, Reconciliation};
use crate::ports::{BarcodeCatalog, ConversationStore, LedgerStore, PaymentGateway, PortResult};
use crate::products::{
    is_barcode, BarcodeResolution, ProductCreation, ProductResolver, SEARCH_LIMIT,
};
use crate::settings::Settings;
use crate::subscription::{is_active_at, SubscriptionLedger};

const RECENT_LIMIT: usize = 10;
const MY_PRODUCTS_LIMIT: usize = 10;
const SUBSCRIBERS_LIMIT: usize = 30;
const FEEDBACK_INBOX_LIMIT: usize = 20;
const ACTIVE_WINDOW_DAYS: i64 = 7;

type Replies = PortResult<Vec<Reply>>;

fn one(reply: Reply) -> Replies {
    Ok(vec![reply])
}

fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_lowercase()
}

pub struct ConversationEngine {
    ledger: Arc<dyn LedgerStore>,
    states: Arc<dyn ConversationStore>,
    products: ProductResolver,
    nutrition: NutritionAggregator,
    payments: PaymentReconciler,
    settings: Settings,
    subscriptions: SubscriptionLedger,
    admin_handle: Option<String>,
    locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl ConversationEngine {
    /// `barcodes` and `gateway` are optional integrations; `admin_handle` is the platform
    /// username granted admin rights.
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        states: Arc<dyn ConversationStore>,
        barcodes: Option<Arc<dyn BarcodeCatalog>>,
        gateway: Option<Arc<dyn PaymentGateway>>,
        admin_handle: Option<String>,
    ) -> Self {
        let products = ProductResolver::new(ledger.clone(), barcodes);
        Self {
            nutrition: NutritionAggregator::new(ledger.clone(), products.clone()),
            payments: PaymentReconciler::new(ledger.clone(), gateway),
            settings: Settings::new(ledger.clone()),
            subscriptions: SubscriptionLedger::new(ledger.clone()),
            admin_handle: admin_handle
                .map(|h| normalize_handle(&h))
                .filter(|h| !h.is_empty()),
            locks: Mutex::new(HashMap::new()),
            products,
            states,
            ledger,
        }
    }

    pub fn payments(&self) -> &PaymentReconciler {
        &self.payments
    }

    fn is_admin_handle(&self, handle: Option<&str>) -> bool {
        match (&self.admin_handle, handle) {
            (Some(admin), Some(handle)) => *admin == normalize_handle(handle),
            _ => false,
        }
    }

    /// Processes one inbound message. Messages from the same user are applied strictly one
    /// at a time; different users proceed concurrently.
    pub async fn handle(&self, message: IncomingMessage) -> Replies {
        let sender = message.sender;
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(sender).or_default().clone()
        };
        let guard = lock.lock().await;
        let result = self.dispatch(message).await;
        drop(guard);

        // Clones are only taken under the map lock, so a count of two means nobody else
        // holds or waits on this user's lock.
        let mut locks = self.locks.lock().await;
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&sender);
        }
        result
    }

    async fn dispatch(&self, message: IncomingMessage) -> Replies {
        let is_admin = self.is_admin_handle(message.handle.as_deref());
        let user = self
            .ledger
            .touch_user(message.sender, message.handle.as_deref(), is_admin)
            .await?;
        let state = self.states.get(user.id).await?;
        debug!("User {} in step {} sent {:?}", user.id, state.name(), message.input);

        match message.input {
            Input::SuccessfulPayment(payment) => self.on_successful_payment(&user, payment).await,
            Input::Pick(pick) => self.on_pick(&user, pick).await,
            Input::Command(Command::Back) => {
                self.states.clear(user.id).await?;
                self.log_event(user.id, "back_to_main", Value::Null).await;
                one(Reply::MainMenu)
            }
            Input::Command(Command::Start) => self.on_start(&user).await,
            Input::Command(Command::SetLanguage(language)) => {
                self.ledger.set_user_language(user.id, language).await?;
                self.log_event(user.id, "set_lang", json!({ "lang": language.as_str() }))
                    .await;
                one(Reply::LanguageSet { language })
            }
            input if state.is_idle() => self.on_idle(&user, input).await,
            input => self.on_step(&user, state, input).await,
        }
    }

    async fn log_event(&self, user_id: UserId, name: &str, meta: Value) {
        if let Err(e) = self.ledger.append_event(user_id, name, meta).await {
            warn!("Failed to record event '{}' for user {}: {}", name, user_id, e);
        }
    }

    async fn set_state(&self, user_id: UserId, state: ConversationState) -> PortResult<()> {
        self.states.set(user_id, &state).await
    }

    async fn on_start(&self, user: &User) -> Replies {
        self.states.clear(user.id).await?;
        self.log_event(user.id, "start", Value::Null).await;
        if user.is_first_contact() {
            one(Reply::LanguagePicker)
        } else {
            one(Reply::MainMenu)
        }
    }

    //=====================================================================================
    // Idle: menu dispatch
    //=====================================================================================

    async fn on_idle(&self, user: &User, input: Input) -> Replies {
        let Input::Command(command) = input else {
            return one(Reply::MainMenu);
        };
        if command.requires_admin() && !user.is_admin {
            warn!("User {} attempted admin command {}", user.id, command);
            return one(Reply::AccessDenied);
        }
        let purchase = matches!(
            command,
            Command::Subscription | Command::PayStars | Command::PayRedirect
        );
        if purchase && !self.settings.subscription_enabled().await? {
            return self.more_menu(user).await;
        }

        match command {
            Command::AddFood => {
                self.log_event(user.id, "open_add_food", Value::Null).await;
                one(Reply::AddFoodMenu)
            }
            Command::Diary => {
                self.log_event(user.id, "open_diary", Value::Null).await;
                one(Reply::DiaryMenu)
            }
            Command::Summary => {
                self.log_event(user.id, "open_summary", Value::Null).await;
                one(Reply::SummaryMenu)
            }
            Command::More => self.more_menu(user).await,
            Command::FindForLog => self.start_search(user, true).await,
            Command::Search => self.start_search(user, false).await,
            Command::Recent => {
                let products = self.products.recent(user.id, RECENT_LIMIT).await?;
                self.log_event(user.id, "open_recent", Value::Null).await;
                one(Reply::RecentProducts { products })
            }
            Command::MyProducts => {
                let products = self.products.my_products(user.id, MY_PRODUCTS_LIMIT).await?;
                self.log_event(user.id, "open_my_products", Value::Null).await;
                one(Reply::MyProducts { products })
            }
            Command::AddNewProduct => {
                if let Some(limit) = self.quota_check(user).await? {
                    return one(Reply::LimitReached { limit });
                }
                self.set_state(user.id, ConversationState::AwaitingMacros).await?;
                self.log_event(user.id, "add_product_start", Value::Null).await;
                one(Reply::Prompt(Prompt::Macros))
            }
            Command::ScanBarcode => {
                if !self.products.barcode_lookup_enabled() {
                    return one(Reply::BarcodeLookupDisabled);
                }
                if let Some(limit) = self.quota_check(user).await? {
                    return one(Reply::LimitReached { limit });
                }
                self.set_state(user.id, ConversationState::AwaitingBarcode { for_logging: true })
                    .await?;
                self.log_event(user.id, "barcode_start", Value::Null).await;
                one(Reply::Prompt(Prompt::Barcode))
            }
            Command::Feedback => {
                self.set_state(user.id, ConversationState::AwaitingFeedback).await?;
                self.log_event(user.id, "feedback_start", Value::Null).await;
                one(Reply::Prompt(Prompt::Feedback))
            }
            Command::Settings => {
                self.log_event(user.id, "open_settings", Value::Null).await;
                one(Reply::SettingsMenu {
                    language: user.language,
                })
            }
            Command::Subscription => self.subscription_screen(user).await,
            Command::PayStars => {
                let invoice = self.payments.stars_invoice(user.id).await?;
                self.log_event(user.id, "pay_stars_invoice", json!({ "amount": invoice.amount }))
                    .await;
                one(Reply::StarsInvoice(invoice))
            }
            Command::PayRedirect => self.pay_redirect(user).await,
            Command::CheckPayment => self.check_payment(user).await,
            Command::DiaryToday => {
                let lines = self.nutrition.diary(user.id, Period::Today).await?;
                let totals = lines
                    .iter()
                    .fold(Nutrients::default(), |acc, line| acc + line.contribution);
                one(Reply::Diary { lines, totals })
            }
            Command::ExportToday => {
                let totals = self.nutrition.aggregate(user.id, Period::Today).await?;
                let date = Utc::now().date_naive();
                self.log_event(user.id, "export_pdf", json!({ "date": date.to_string() }))
                    .await;
                one(Reply::DailyReport { date, totals })
            }
            Command::ShowSummary(period) => {
                let totals = self.nutrition.aggregate(user.id, period).await?;
                one(Reply::Summary { period, totals })
            }
            Command::Admin => one(Reply::AdminMenu),
            Command::AdminAnalytics => {
                let since = Utc::now() - Duration::days(ACTIVE_WINDOW_DAYS);
                let snapshot = self.ledger.analytics_snapshot(since).await?;
                one(Reply::Analytics(snapshot))
            }
            Command::AdminSubscribers => {
                let subscribers = self.ledger.list_subscribers(SUBSCRIBERS_LIMIT).await?;
                one(Reply::Subscribers { subscribers })
            }
            Command::AdminFeedback => {
                let items = self
                    .ledger
                    .list_feedback(FEEDBACK_STATUS_NEW, FEEDBACK_INBOX_LIMIT)
                    .await?;
                one(Reply::FeedbackInbox { items })
            }
            Command::AdminSubscription => self.admin_subscription(user).await,
            Command::ToggleSubscription => {
                let enabled = self.settings.toggle_subscription().await?;
                info!("Admin {} set subscriptions enabled={}", user.id, enabled);
                self.admin_subscription(user).await
            }
            Command::SetPrice(rail) => {
                self.set_state(user.id, ConversationState::AwaitingPrice { rail })
                    .await?;
                let current = self.settings.price(rail).await?;
                one(Reply::Prompt(Prompt::Price { rail, current }))
            }
            Command::EditMarketingText => {
                let language = user.language;
                self.set_state(user.id, ConversationState::AwaitingMarketingText { language })
                    .await?;
                let current = self.settings.marketing_text(language).await?;
                one(Reply::Prompt(Prompt::MarketingText { language, current }))
            }
            // A meal button outside meal selection is ignored.
            Command::Meal(_) => Ok(Vec::new()),
            Command::AddGrams(_)
            | Command::CommitGrams
            | Command::Start
            | Command::Back
            | Command::SetLanguage(_) => one(Reply::MainMenu),
        }
    }

    async fn more_menu(&self, user: &User) -> Replies {
        let subscription = self.settings.subscription_enabled().await?;
        self.log_event(user.id, "open_more", Value::Null).await;
        one(Reply::MoreMenu {
            subscription,
            admin: user.is_admin,
        })
    }

    async fn start_search(&self, user: &User, for_logging: bool) -> Replies {
        self.set_state(user.id, ConversationState::AwaitingSearchQuery { for_logging })
            .await?;
        self.log_event(user.id, "search_start", json!({ "for_add": for_logging }))
            .await;
        one(Reply::Prompt(Prompt::SearchQuery))
    }

    async fn quota_check(&self, user: &User) -> PortResult<Option<i64>> {
        let blocked = self.products.quota_block(user.id).await?;
        if let Some(limit) = blocked {
            self.log_event(user.id, "my_products_limit_hit", json!({ "limit": limit }))
                .await;
        }
        Ok(blocked)
    }

    //=====================================================================================
    // Steps
    //=====================================================================================

    async fn on_step(&self, user: &User, state: ConversationState, input: Input) -> Replies {
        match (state, input) {
            (ConversationState::AwaitingMacros, Input::Text(text)) => match parse_macros(&text) {
                Some(per_100g) => {
                    self.set_state(user.id, ConversationState::AwaitingNames { per_100g })
                        .await?;
                    one(Reply::Prompt(Prompt::Names))
                }
                None => one(Reply::InvalidInput(Prompt::Macros)),
            },
            (ConversationState::AwaitingNames { per_100g }, Input::Text(text)) => {
                let Some(names) = parse_names(&text) else {
                    return one(Reply::InvalidInput(Prompt::Names));
                };
                self.create_product(user, &names, per_100g, Provenance::Manual, None)
                    .await
            }
            (ConversationState::AwaitingSearchQuery { for_logging }, Input::Text(text)) => {
                self.on_search_query(user, &text, for_logging).await
            }
            (ConversationState::AwaitingBarcode { for_logging }, Input::Text(text)) => {
                self.on_barcode(user, &text, for_logging).await
            }
            (ConversationState::AwaitingMealSelection { product }, input) => {
                let meal = match input {
                    Input::Command(Command::Meal(meal)) => Some(meal),
                    Input::Text(text) => text.parse::<MealSlot>().ok(),
                    _ => None,
                };
                let Some(meal) = meal else {
                    return Ok(Vec::new());
                };
                self.set_state(
                    user.id,
                    ConversationState::AwaitingGrams {
                        product,
                        meal,
                        grams: 0.0,
                    },
                )
                .await?;
                self.log_event(user.id, "meal_chosen", json!({ "meal": meal.as_str() }))
                    .await;
                one(Reply::Prompt(Prompt::Grams { running_total: 0.0 }))
            }
            (
                ConversationState::AwaitingGrams {
                    product,
                    meal,
                    grams,
                },
                input,
            ) => self.on_grams(user, product, meal, grams, input).await,
            (ConversationState::AwaitingFeedback, Input::Text(text)) => {
                let message = text.trim();
                if message.is_empty() {
                    return one(Reply::InvalidInput(Prompt::Feedback));
                }
                self.ledger.append_feedback(user.id, message, None).await?;
                self.states.clear(user.id).await?;
                self.log_event(user.id, "feedback_sent", Value::Null).await;
                one(Reply::FeedbackThanks)
            }
            (ConversationState::AwaitingPrice { .. }, _)
            | (ConversationState::AwaitingMarketingText { .. }, _)
                if !user.is_admin =>
            {
                self.states.clear(user.id).await?;
                one(Reply::AccessDenied)
            }
            (ConversationState::AwaitingPrice { rail }, Input::Text(text)) => {
                let Some(amount) = parse_price(&text) else {
                    let current = self.settings.price(rail).await?;
                    return one(Reply::InvalidInput(Prompt::Price { rail, current }));
                };
                self.settings.set_price(rail, amount).await?;
                self.states.clear(user.id).await?;
                info!("Admin {} set {} price to {}", user.id, rail.as_str(), amount);
                one(Reply::SettingSaved)
            }
            (ConversationState::AwaitingMarketingText { language }, Input::Text(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    let current = self.settings.marketing_text(language).await?;
                    return one(Reply::InvalidInput(Prompt::MarketingText { language, current }));
                }
                self.settings.set_marketing_text(language, text).await?;
                self.states.clear(user.id).await?;
                info!("Admin {} updated the {} marketing text", user.id, language.as_str());
                one(Reply::SettingSaved)
            }
            (state, _) => {
                let prompt = self.prompt_for(&state).await?;
                one(Reply::InvalidInput(prompt))
            }
        }
    }

    async fn prompt_for(&self, state: &ConversationState) -> PortResult<Prompt> {
        Ok(match state {
            ConversationState::Idle | ConversationState::AwaitingMacros => Prompt::Macros,
            ConversationState::AwaitingNames { .. } => Prompt::Names,
            ConversationState::AwaitingSearchQuery { .. } => Prompt::SearchQuery,
            ConversationState::AwaitingBarcode { .. } => Prompt::Barcode,
            ConversationState::AwaitingMealSelection { .. } => Prompt::Meal,
            ConversationState::AwaitingGrams { grams, .. } => Prompt::Grams {
                running_total: *grams,
            },
            ConversationState::AwaitingFeedback => Prompt::Feedback,
            ConversationState::AwaitingPrice { rail } => Prompt::Price {
                rail: *rail,
                current: self.settings.price(*rail).await?,
            },
            ConversationState::AwaitingMarketingText { language } => Prompt::MarketingText {
                language: *language,
                current: self.settings.marketing_text(*language).await?,
            },
        })
    }

    /// Creates the private product (and catalog product when new). On quota rejection the
    /// current step is kept.
    async fn create_product(
        &self,
        user: &User,
        names: &ProductNames,
        per_100g: Nutrients,
        provenance: Provenance,
        barcode: Option<(&str, bool)>,
    ) -> Replies {
        match self
            .products
            .create_product(user.id, names, per_100g, provenance)
            .await?
        {
            ProductCreation::QuotaExceeded { limit } => {
                self.log_event(user.id, "my_products_limit_hit", json!({ "limit": limit }))
                    .await;
                one(Reply::LimitReached { limit })
            }
            ProductCreation::Created { private, catalog } => {
                self.states.clear(user.id).await?;
                let meta = json!({
                    "user_product_id": private.reference.id,
                    "catalog_product_id": catalog.as_ref().map(|p| p.reference.id),
                });
                match barcode {
                    Some((code, for_logging)) => {
                        let meta = json!({ "barcode": code, "product": meta });
                        self.log_event(user.id, "barcode_added", meta).await;
                        one(Reply::BarcodeAdded {
                            product: private,
                            for_logging,
                        })
                    }
                    None => {
                        self.log_event(user.id, "add_product_done", meta).await;
                        one(Reply::ProductCreated {
                            product: private,
                            catalog_added: catalog.is_some(),
                        })
                    }
                }
            }
        }
    }

    async fn on_search_query(&self, user: &User, query: &str, for_logging: bool) -> Replies {
        let query = query.trim();
        if query.is_empty() {
            return one(Reply::InvalidInput(Prompt::SearchQuery));
        }
        let products = self.products.search(user.id, query, SEARCH_LIMIT).await?;
        if products.is_empty() {
            if is_barcode(query) && self.products.barcode_lookup_enabled() {
                if let Some(limit) = self.quota_check(user).await? {
                    return one(Reply::LimitReached { limit });
                }
                debug!("Search '{}' found nothing, trying it as a barcode", query);
                self.set_state(user.id, ConversationState::AwaitingBarcode { for_logging })
                    .await?;
                return self.on_barcode(user, query, for_logging).await;
            }
            return one(Reply::NoResults);
        }
        self.log_event(user.id, "search_results", json!({ "n": products.len() }))
            .await;
        one(Reply::SearchResults {
            products,
            for_logging,
        })
    }

    async fn on_barcode(&self, user: &User, code: &str, for_logging: bool) -> Replies {
        let code = code.trim();
        if !is_barcode(code) {
            return one(Reply::InvalidInput(Prompt::Barcode));
        }
        match self.products.resolve_barcode(code).await {
            BarcodeResolution::Found(found) => {
                let names = ProductNames::uniform(found.name.trim());
                self.create_product(
                    user,
                    &names,
                    found.per_100g,
                    Provenance::External,
                    Some((code, for_logging)),
                )
                .await
            }
            BarcodeResolution::NotFound => {
                self.states.clear(user.id).await?;
                one(Reply::NoResults)
            }
            // The step stays active so the same code can be retried.
            BarcodeResolution::Unavailable => one(Reply::NoResults),
        }
    }

    async fn on_pick(&self, user: &User, pick: PickRequest) -> Replies {
        let Some(product) = self.products.get(pick.product, user.id).await? else {
            return one(Reply::ProductNotFound);
        };
        if !pick.for_logging {
            self.states.clear(user.id).await?;
            self.log_event(
                user.id,
                "product_view",
                json!({ "product": product.reference.to_string() }),
            )
            .await;
            return one(Reply::ProductView { product });
        }
        self.set_state(
            user.id,
            ConversationState::AwaitingMealSelection {
                product: product.reference,
            },
        )
        .await?;
        self.log_event(user.id, "pick_meal", Value::Null).await;
        one(Reply::Prompt(Prompt::Meal))
    }

    async fn on_grams(
        &self,
        user: &User,
        product: ProductRef,
        meal: MealSlot,
        running_total: f64,
        input: Input,
    ) -> Replies {
        let step = match &input {
            Input::Command(Command::AddGrams(step)) => Some(*step),
            Input::Text(text) => parse_quick_grams(text),
            _ => None,
        };
        if let Some(step) = step {
            let grams = running_total + f64::from(step);
            self.set_state(
                user.id,
                ConversationState::AwaitingGrams {
                    product,
                    meal,
                    grams,
                },
            )
            .await?;
            return one(Reply::Prompt(Prompt::Grams {
                running_total: grams,
            }));
        }

        let grams = match &input {
            Input::Command(Command::CommitGrams) if running_total > 0.0 => Some(running_total),
            Input::Text(text) => parse_grams(text),
            _ => None,
        };
        let Some(grams) = grams else {
            return one(Reply::InvalidInput(Prompt::Grams { running_total }));
        };
        self.commit_food_log(user, product, meal, grams).await
    }

    async fn commit_food_log(
        &self,
        user: &User,
        reference: ProductRef,
        meal: MealSlot,
        grams: f64,
    ) -> Replies {
        let Some(product) = self.products.get(reference, user.id).await? else {
            warn!(
                "User {} tried to log product {} which no longer resolves; resetting",
                user.id, reference
            );
            self.states.clear(user.id).await?;
            return one(Reply::MainMenu);
        };
        let entry = self
            .ledger
            .append_food_log(user.id, reference, grams, meal, Utc::now())
            .await?;
        self.states.clear(user.id).await?;
        self.log_event(
            user.id,
            "add_food_done",
            json!({
                "product": reference.to_string(),
                "grams": grams,
                "meal": meal.as_str(),
                "entry_id": entry.id,
            }),
        )
        .await;
        one(Reply::FoodLogged {
            contribution: contribution(&product.per_100g, grams),
            names: product.names,
            grams,
            meal,
        })
    }

    //=====================================================================================
    // Subscription and payments
    //=====================================================================================

    async fn subscription_screen(&self, user: &User) -> Replies {
        let now = Utc::now();
        let active_until = user
            .subscription_until
            .filter(|until| is_active_at(Some(*until), now));
        self.log_event(user.id, "open_subscription", Value::Null).await;
        one(Reply::SubscriptionScreen {
            active_until,
            marketing_text: self.settings.marketing_text(user.language).await?,
            price_stars: self.settings.price(PaymentProvider::Stars).await?,
            price_rub: self.settings.price(PaymentProvider::YooKassa).await?,
            redirect_rail: self.payments.redirect_rail_enabled(),
        })
    }

    async fn pay_redirect(&self, user: &User) -> Replies {
        if !self.payments.redirect_rail_enabled() {
            return one(Reply::PaymentUnavailable);
        }
        let amount = self.settings.price(PaymentProvider::YooKassa).await?;
        let days = self.settings.subscription_days().await?;
        let description = match user.language {
            Language::Ru => format!("Подписка на {} дней", days),
            Language::En => format!("{}-day subscription", days),
        };
        match self.payments.open_intent(user.id, amount, &description).await
        {
            Ok(link) => {
                self.log_event(
                    user.id,
                    "pay_redirect_created",
                    json!({ "payment_id": link.payment.provider_payment_id, "amount": amount }),
                )
                .await;
                one(Reply::PaymentLink {
                    url: link.confirmation_url,
                    amount,
                })
            }
            Err(e) => {
                warn!("Could not create a payment for user {}: {}", user.id, e);
                one(Reply::PaymentUnavailable)
            }
        }
    }

    async fn check_payment(&self, user: &User) -> Replies {
        if !self.payments.redirect_rail_enabled() {
            return one(Reply::PaymentUnavailable);
        }
        let outcome = match self.payments.check_latest(user.id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Payment check for user {} failed: {}", user.id, e);
                return one(Reply::PaymentUnavailable);
            }
        };
        self.log_event(user.id, "check_payment", Value::Null).await;
        let reply = match outcome {
            None | Some(Reconciliation::UnknownPayment) => Reply::NoPayment,
            Some(Reconciliation::StillPending) => Reply::PaymentPending,
            Some(Reconciliation::Settled {
                status: PaymentStatus::Succeeded,
                subscription_until,
            }) => Reply::SubscriptionActivated {
                until: subscription_until,
            },
            Some(Reconciliation::AlreadySettled(PaymentStatus::Succeeded)) => {
                Reply::SubscriptionActivated {
                    until: self.subscriptions.expiry(user.id).await?,
                }
            }
            Some(Reconciliation::Settled { status, .. })
            | Some(Reconciliation::AlreadySettled(status)) => Reply::PaymentFailed { status },
        };
        one(reply)
    }

    async fn on_successful_payment(&self, user: &User, payment: InBandPayment) -> Replies {
        let payment = InBandPayment {
            owner: user.id,
            ..payment
        };
        let charge_id = payment.charge_id.clone();
        match self.payments.record_in_band(payment).await? {
            InBandOutcome::Activated { subscription_until } => {
                self.log_event(user.id, "stars_paid", json!({ "charge_id": charge_id }))
                    .await;
                one(Reply::SubscriptionActivated {
                    until: subscription_until,
                })
            }
            InBandOutcome::Duplicate => one(Reply::PaymentAlreadyRecorded),
            InBandOutcome::Ignored => Ok(Vec::new()),
        }
    }

    async fn admin_subscription(&self, user: &User) -> Replies {
        one(Reply::AdminSubscription {
            enabled: self.settings.subscription_enabled().await?,
            price_stars: self.settings.price(PaymentProvider::Stars).await?,
            price_rub: self.settings.price(PaymentProvider::YooKassa).await?,
            marketing_text: self.settings.marketing_text(user.language).await?,
        })
    }
}
