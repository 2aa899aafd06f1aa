//! Normalised inbound messages. The presentation layer translates rendered button labels into
//! stable [`Command`] identifiers, so nothing here depends on localized text.

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::domain::{Language, MealSlot, PaymentProvider, ProductRef, ProductVariant, UserId};
use crate::nutrition::Period;
use crate::payments::InBandPayment;

/// Returned when a command or callback identifier is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised identifier '{0}'")]
pub struct UnknownIdentifier(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    SetLanguage(Language),
    Back,
    // Main menu
    AddFood,
    Diary,
    Summary,
    More,
    // Add-food submenu
    FindForLog,
    Recent,
    MyProducts,
    AddNewProduct,
    ScanBarcode,
    // More submenu
    Search,
    Feedback,
    Settings,
    Subscription,
    Admin,
    // Logging flow
    Meal(MealSlot),
    AddGrams(u32),
    CommitGrams,
    // Diary and summary
    DiaryToday,
    ExportToday,
    ShowSummary(Period),
    // Subscription
    PayStars,
    PayRedirect,
    CheckPayment,
    // Admin
    AdminAnalytics,
    AdminSubscribers,
    AdminFeedback,
    AdminSubscription,
    ToggleSubscription,
    SetPrice(PaymentProvider),
    EditMarketingText,
}

impl Command {
    pub fn id(&self) -> String {
        match self {
            Command::Start => "start".into(),
            Command::SetLanguage(language) => format!("set_language:{}", language.as_str()),
            Command::Back => "back".into(),
            Command::AddFood => "add_food".into(),
            Command::Diary => "diary".into(),
            Command::Summary => "summary".into(),
            Command::More => "more".into(),
            Command::FindForLog => "find_for_log".into(),
            Command::Recent => "recent".into(),
            Command::MyProducts => "my_products".into(),
            Command::AddNewProduct => "add_new_product".into(),
            Command::ScanBarcode => "scan_barcode".into(),
            Command::Search => "search".into(),
            Command::Feedback => "feedback".into(),
            Command::Settings => "settings".into(),
            Command::Subscription => "subscription".into(),
            Command::Admin => "admin".into(),
            Command::Meal(slot) => format!("meal:{}", slot.as_str()),
            Command::AddGrams(step) => format!("add_grams:{}", step),
            Command::CommitGrams => "commit_grams".into(),
            Command::DiaryToday => "diary_today".into(),
            Command::ExportToday => "export_today".into(),
            Command::ShowSummary(period) => format!("summary:{}", period.as_str()),
            Command::PayStars => "pay_stars".into(),
            Command::PayRedirect => "pay_redirect".into(),
            Command::CheckPayment => "check_payment".into(),
            Command::AdminAnalytics => "admin_analytics".into(),
            Command::AdminSubscribers => "admin_subscribers".into(),
            Command::AdminFeedback => "admin_feedback".into(),
            Command::AdminSubscription => "admin_subscription".into(),
            Command::ToggleSubscription => "toggle_subscription".into(),
            Command::SetPrice(rail) => format!("set_price:{}", rail.as_str()),
            Command::EditMarketingText => "edit_marketing_text".into(),
        }
    }

    /// Commands only administrators may run.
    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            Command::Admin
                | Command::AdminAnalytics
                | Command::AdminSubscribers
                | Command::AdminFeedback
                | Command::AdminSubscription
                | Command::ToggleSubscription
                | Command::SetPrice(_)
                | Command::EditMarketingText
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

impl FromStr for Command {
    type Err = UnknownIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownIdentifier(s.to_string());
        let s = s.trim().trim_start_matches('/');
        if let Some((head, arg)) = s.split_once(':') {
            return match head {
                "set_language" => arg.parse().map(Command::SetLanguage).map_err(|_| unknown()),
                "meal" => arg.parse().map(Command::Meal).map_err(|_| unknown()),
                "add_grams" => arg
                    .parse::<u32>()
                    .ok()
                    .filter(|step| super::parse::QUICK_GRAM_STEPS.contains(step))
                    .map(Command::AddGrams)
                    .ok_or_else(unknown),
                "summary" => arg.parse().map(Command::ShowSummary).map_err(|_| unknown()),
                "set_price" => arg.parse().map(Command::SetPrice).map_err(|_| unknown()),
                _ => Err(unknown()),
            };
        }
        Ok(match s {
            "start" => Command::Start,
            "back" => Command::Back,
            "add_food" => Command::AddFood,
            "diary" => Command::Diary,
            "summary" => Command::Summary,
            "more" => Command::More,
            "find_for_log" => Command::FindForLog,
            "recent" => Command::Recent,
            "my_products" => Command::MyProducts,
            "add_new_product" => Command::AddNewProduct,
            "scan_barcode" => Command::ScanBarcode,
            "search" => Command::Search,
            "feedback" => Command::Feedback,
            "settings" => Command::Settings,
            "subscription" => Command::Subscription,
            "admin" => Command::Admin,
            "commit_grams" => Command::CommitGrams,
            "diary_today" => Command::DiaryToday,
            "export_today" => Command::ExportToday,
            "pay_stars" => Command::PayStars,
            "pay_redirect" => Command::PayRedirect,
            "check_payment" => Command::CheckPayment,
            "admin_analytics" => Command::AdminAnalytics,
            "admin_subscribers" => Command::AdminSubscribers,
            "admin_feedback" => Command::AdminFeedback,
            "admin_subscription" => Command::AdminSubscription,
            "toggle_subscription" => Command::ToggleSubscription,
            "edit_marketing_text" => Command::EditMarketingText,
            _ => return Err(unknown()),
        })
    }
}

impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.id())
    }
}

/// A product chosen from a pick list. Travels as callback data `pick:<variant>:<id>:<0|1>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickRequest {
    pub product: ProductRef,
    /// `true` when the pick continues into the logging flow rather than a product view.
    pub for_logging: bool,
}

impl PickRequest {
    pub fn callback_data(&self) -> String {
        format!(
            "pick:{}:{}:{}",
            self.product.variant.as_str(),
            self.product.id,
            if self.for_logging { 1 } else { 0 }
        )
    }
}

impl FromStr for PickRequest {
    type Err = UnknownIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownIdentifier(s.to_string());
        let parts: Vec<&str> = s.trim().split(':').collect();
        let ["pick", variant, id, flag] = parts.as_slice() else {
            return Err(unknown());
        };
        let variant: ProductVariant = variant.parse().map_err(|_| unknown())?;
        let id: i64 = id.parse().map_err(|_| unknown())?;
        let for_logging = match *flag {
            "1" => true,
            "0" => false,
            _ => return Err(unknown()),
        };
        Ok(PickRequest {
            product: ProductRef { variant, id },
            for_logging,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Free text typed by the user.
    Text(String),
    Command(Command),
    Pick(PickRequest),
    /// In-band rail confirmation delivered with the normal message stream.
    SuccessfulPayment(InBandPayment),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub sender: UserId,
    /// Platform username without the leading `@`, when the user has one.
    pub handle: Option<String>,
    pub input: Input,
}
