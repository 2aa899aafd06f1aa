mod common;

use std::sync::atomic::Ordering;

use common::{close, Harness, ADMIN};
use food_diary_core::conversation::{Command, Prompt};
use food_diary_core::domain::ProductVariant;
use food_diary_core::ports::LedgerStore;
use food_diary_core::{
    ConversationState, Language, MealSlot, Nutrients, PaymentProvider, ProductNames, Reply,
};

const EATER: i64 = 42;

#[tokio::test]
async fn first_start_offers_language_then_main_menu() {
    let h = Harness::new();
    assert_eq!(h.command(EATER, Command::Start).await, vec![Reply::LanguagePicker]);
    assert_eq!(
        h.command(EATER, Command::SetLanguage(Language::En)).await,
        vec![Reply::LanguageSet {
            language: Language::En
        }]
    );
    assert_eq!(h.ledger.get_user(EATER).await.unwrap().language, Language::En);
    assert_eq!(h.command(EATER, Command::Start).await, vec![Reply::MainMenu]);
}

#[tokio::test]
async fn unrecognised_text_while_idle_shows_main_menu() {
    let h = Harness::new();
    assert_eq!(h.text(EATER, "hello there").await, vec![Reply::MainMenu]);
    assert!(h.state(EATER).await.is_idle());
}

#[tokio::test]
async fn manual_product_flow_commits_private_and_catalog() {
    let h = Harness::new();
    assert_eq!(
        h.command(EATER, Command::AddNewProduct).await,
        vec![Reply::Prompt(Prompt::Macros)]
    );
    assert_eq!(h.state(EATER).await, ConversationState::AwaitingMacros);

    h.text(EATER, "165 31 3.6 0").await;
    assert_eq!(
        h.state(EATER).await,
        ConversationState::AwaitingNames {
            per_100g: Nutrients::new(165.0, 31.0, 3.6, 0.0)
        }
    );

    let replies = h.text(EATER, "RU: Куриная грудка\nEN: Chicken breast").await;
    let [Reply::ProductCreated {
        product,
        catalog_added,
    }] = replies.as_slice()
    else {
        panic!("unexpected replies {:?}", replies);
    };
    assert!(*catalog_added);
    assert_eq!(product.names, ProductNames::new("Куриная грудка", "Chicken breast"));
    assert!(h.state(EATER).await.is_idle());
    assert_eq!(h.ledger.count_private_products(EATER).await.unwrap(), 1);
    assert_eq!(h.ledger.catalog_count().await, 1);

    let catalog = h.ledger.search_catalog_products("chicken", 10).await.unwrap();
    assert_eq!(catalog.len(), 1);
}

#[tokio::test]
async fn malformed_step_input_reprompts_in_place() {
    let h = Harness::new();
    h.command(EATER, Command::AddNewProduct).await;

    assert_eq!(
        h.text(EATER, "165 31").await,
        vec![Reply::InvalidInput(Prompt::Macros)]
    );
    assert_eq!(h.state(EATER).await, ConversationState::AwaitingMacros);

    // Menu buttons are not valid step input either.
    assert_eq!(
        h.command(EATER, Command::Diary).await,
        vec![Reply::InvalidInput(Prompt::Macros)]
    );

    h.text(EATER, "100 1 1 1").await;
    assert_eq!(
        h.text(EATER, "just a name").await,
        vec![Reply::InvalidInput(Prompt::Names)]
    );
    assert!(matches!(
        h.state(EATER).await,
        ConversationState::AwaitingNames { .. }
    ));
    assert_eq!(h.ledger.count_private_products(EATER).await.unwrap(), 0);
}

#[tokio::test]
async fn back_clears_any_step() {
    let h = Harness::new();
    h.command(EATER, Command::AddNewProduct).await;
    h.text(EATER, "100 1 1 1").await;
    assert_eq!(h.command(EATER, Command::Back).await, vec![Reply::MainMenu]);
    assert!(h.state(EATER).await.is_idle());
}

#[tokio::test]
async fn search_pick_meal_grams_logs_an_entry() {
    let h = Harness::new();
    let oats = h.add_product(EATER, "370 13 7 60", "Овсянка", "Oats").await;

    h.command(EATER, Command::FindForLog).await;
    let replies = h.text(EATER, "OAT").await;
    let [Reply::SearchResults {
        products,
        for_logging: true,
    }] = replies.as_slice()
    else {
        panic!("unexpected replies {:?}", replies);
    };
    assert_eq!(products[0].reference, oats);

    assert_eq!(h.pick(EATER, oats, true).await, vec![Reply::Prompt(Prompt::Meal)]);

    // A non-meal message is ignored and the step is kept.
    assert!(h.text(EATER, "tea").await.is_empty());
    assert_eq!(
        h.state(EATER).await,
        ConversationState::AwaitingMealSelection { product: oats }
    );

    h.command(EATER, Command::Meal(MealSlot::Breakfast)).await;
    assert_eq!(
        h.command(EATER, Command::AddGrams(50)).await,
        vec![Reply::Prompt(Prompt::Grams {
            running_total: 50.0
        })]
    );
    h.text(EATER, "+100").await;
    assert_eq!(
        h.state(EATER).await,
        ConversationState::AwaitingGrams {
            product: oats,
            meal: MealSlot::Breakfast,
            grams: 150.0
        }
    );

    assert_eq!(
        h.text(EATER, "plenty").await,
        vec![Reply::InvalidInput(Prompt::Grams {
            running_total: 150.0
        })]
    );

    // A typed absolute value overrides the running total.
    let replies = h.text(EATER, "80").await;
    let [Reply::FoodLogged {
        grams,
        meal,
        contribution,
        ..
    }] = replies.as_slice()
    else {
        panic!("unexpected replies {:?}", replies);
    };
    assert_eq!(*grams, 80.0);
    assert_eq!(*meal, MealSlot::Breakfast);
    assert!(close(contribution.kcal, 296.0));
    assert!(h.state(EATER).await.is_idle());

    let recent = h.ledger.recent_product_refs(EATER, 10).await.unwrap();
    assert_eq!(recent, vec![oats]);
}

#[tokio::test]
async fn commit_grams_uses_the_running_total() {
    let h = Harness::new();
    let rice = h.add_product(EATER, "130 2.7 0.3 28", "Рис", "Rice").await;
    h.pick(EATER, rice, true).await;
    h.text(EATER, "dinner").await;
    assert_eq!(
        h.command(EATER, Command::CommitGrams).await,
        vec![Reply::InvalidInput(Prompt::Grams { running_total: 0.0 })]
    );
    h.command(EATER, Command::AddGrams(200)).await;
    let replies = h.command(EATER, Command::CommitGrams).await;
    assert!(matches!(
        replies.as_slice(),
        [Reply::FoodLogged { grams, meal: MealSlot::Dinner, .. }] if *grams == 200.0
    ));
}

#[tokio::test]
async fn grams_commit_resets_when_product_vanished() {
    let h = Harness::new();
    h.add_product(EATER, "52 0.3 0.2 14", "Яблоко", "Apple").await;
    let catalog = h.ledger.search_catalog_products("apple", 1).await.unwrap();
    let apple = catalog[0].reference;

    h.pick(EATER, apple, true).await;
    h.command(EATER, Command::Meal(MealSlot::Snack)).await;
    h.ledger.remove_catalog_product(apple.id).await;

    assert_eq!(h.text(EATER, "120").await, vec![Reply::MainMenu]);
    assert!(h.state(EATER).await.is_idle());
    let recent = h.ledger.recent_product_refs(EATER, 10).await.unwrap();
    assert!(recent.is_empty());
}

#[tokio::test]
async fn picking_for_view_shows_profile() {
    let h = Harness::new();
    let tofu = h.add_product(EATER, "76 8 4.8 1.9", "Тофу", "Tofu").await;
    h.command(EATER, Command::Search).await;
    let replies = h.pick(EATER, tofu, false).await;
    assert!(matches!(
        replies.as_slice(),
        [Reply::ProductView { product }] if product.reference == tofu
    ));
    assert!(h.state(EATER).await.is_idle());
}

#[tokio::test]
async fn other_users_private_products_are_invisible() {
    let h = Harness::new();
    let mine = h.add_product(EATER, "100 1 1 1", "Секрет", "Secret sauce").await;
    assert_eq!(h.pick(7, mine, true).await, vec![Reply::ProductNotFound]);

    // The catalog twin is shared.
    h.command(7, Command::Search).await;
    let replies = h.text(7, "secret").await;
    let [Reply::SearchResults { products, .. }] = replies.as_slice() else {
        panic!("unexpected replies {:?}", replies);
    };
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].reference.variant, ProductVariant::Catalog);
}

#[tokio::test]
async fn search_without_results_keeps_the_step() {
    let h = Harness::new();
    h.command(EATER, Command::Search).await;
    assert_eq!(h.text(EATER, "durian").await, vec![Reply::NoResults]);
    assert_eq!(
        h.state(EATER).await,
        ConversationState::AwaitingSearchQuery { for_logging: false }
    );
}

#[tokio::test]
async fn numeric_search_falls_through_to_barcode() {
    let h = Harness::new();
    h.barcodes
        .add("4607001234567", "Kefir 2.5%", Nutrients::new(53.0, 2.9, 2.5, 4.0));

    h.command(EATER, Command::FindForLog).await;
    let replies = h.text(EATER, "4607001234567").await;
    let [Reply::BarcodeAdded {
        product,
        for_logging: true,
    }] = replies.as_slice()
    else {
        panic!("unexpected replies {:?}", replies);
    };
    assert_eq!(product.names, ProductNames::uniform("Kefir 2.5%"));
    assert!(h.state(EATER).await.is_idle());
    assert_eq!(h.ledger.catalog_count().await, 1);
}

#[tokio::test]
async fn numeric_search_at_quota_keeps_the_search_step() {
    let h = Harness::new();
    for i in 0..10 {
        h.add_product(EATER, "100 1 1 1", &format!("Продукт {}", i), &format!("Product {}", i))
            .await;
    }
    h.barcodes
        .add("4607", "Kefir 2.5%", Nutrients::new(53.0, 2.9, 2.5, 4.0));

    h.command(EATER, Command::FindForLog).await;
    let before = h.state(EATER).await;
    assert_eq!(
        h.text(EATER, "4607").await,
        vec![Reply::LimitReached { limit: 10 }]
    );
    assert_eq!(h.state(EATER).await, before);
    assert_eq!(h.barcodes.lookups.load(Ordering::SeqCst), 0);
    assert_eq!(h.ledger.count_private_products(EATER).await.unwrap(), 10);
}

#[tokio::test]
async fn barcode_miss_clears_state_and_creates_nothing() {
    let h = Harness::new();
    h.command(EATER, Command::ScanBarcode).await;
    assert_eq!(h.text(EATER, "0000000000").await, vec![Reply::NoResults]);
    assert!(h.state(EATER).await.is_idle());
    assert_eq!(h.ledger.count_private_products(EATER).await.unwrap(), 0);
    assert_eq!(h.ledger.catalog_count().await, 0);
}

#[tokio::test]
async fn barcode_with_unusable_profile_is_a_miss() {
    let h = Harness::new();
    h.barcodes
        .add("123", "Mystery", Nutrients::new(f64::NAN, 1.0, 1.0, 1.0));
    h.command(EATER, Command::ScanBarcode).await;
    assert_eq!(h.text(EATER, "123").await, vec![Reply::NoResults]);
    assert!(h.state(EATER).await.is_idle());
    assert_eq!(h.ledger.count_private_products(EATER).await.unwrap(), 0);
}

#[tokio::test]
async fn barcode_outage_keeps_the_step_for_retry() {
    let h = Harness::new();
    h.barcodes
        .add("777", "Crispbread", Nutrients::new(366.0, 10.0, 2.0, 70.0));
    h.barcodes.set_offline(true);

    h.command(EATER, Command::ScanBarcode).await;
    assert_eq!(h.text(EATER, "777").await, vec![Reply::NoResults]);
    assert_eq!(
        h.state(EATER).await,
        ConversationState::AwaitingBarcode { for_logging: true }
    );

    h.barcodes.set_offline(false);
    let replies = h.text(EATER, "777").await;
    assert!(matches!(replies.as_slice(), [Reply::BarcodeAdded { .. }]));

    assert_eq!(
        h.text(EATER, "not digits").await,
        vec![Reply::MainMenu],
        "state was cleared by the successful import"
    );
}

#[tokio::test]
async fn quota_blocks_the_eleventh_product_without_subscription() {
    let h = Harness::new();
    for i in 0..10 {
        h.add_product(EATER, "100 1 1 1", &format!("Продукт {}", i), &format!("Product {}", i))
            .await;
    }
    assert_eq!(
        h.command(EATER, Command::AddNewProduct).await,
        vec![Reply::LimitReached { limit: 10 }]
    );
    assert!(h.state(EATER).await.is_idle());

    h.ledger
        .extend_subscription(EATER, 30, chrono::Utc::now())
        .await
        .unwrap();
    assert_eq!(
        h.command(EATER, Command::AddNewProduct).await,
        vec![Reply::Prompt(Prompt::Macros)]
    );
    h.text(EATER, "100 1 1 1").await;
    let replies = h.text(EATER, "RU: Ещё\nEN: More").await;
    assert!(matches!(replies.as_slice(), [Reply::ProductCreated { .. }]));
    assert_eq!(h.ledger.count_private_products(EATER).await.unwrap(), 11);
}

#[tokio::test]
async fn feedback_requires_text() {
    let h = Harness::new();
    h.command(EATER, Command::Feedback).await;
    assert_eq!(
        h.text(EATER, "   ").await,
        vec![Reply::InvalidInput(Prompt::Feedback)]
    );
    assert_eq!(h.text(EATER, "Love it").await, vec![Reply::FeedbackThanks]);
    let inbox = h.ledger.list_feedback("new", 20).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].message, "Love it");
}

#[tokio::test]
async fn admin_commands_are_gated_by_handle() {
    let h = Harness::new();
    assert_eq!(h.command(EATER, Command::Admin).await, vec![Reply::AccessDenied]);
    assert_eq!(h.command(ADMIN, Command::Admin).await, vec![Reply::AdminMenu]);

    let replies = h.command(ADMIN, Command::AdminAnalytics).await;
    let [Reply::Analytics(snapshot)] = replies.as_slice() else {
        panic!("unexpected replies {:?}", replies);
    };
    assert_eq!(snapshot.total_users, 2);
}

#[tokio::test]
async fn admin_edits_prices_with_validation() {
    let h = Harness::new();
    assert_eq!(
        h.command(ADMIN, Command::SetPrice(PaymentProvider::Stars)).await,
        vec![Reply::Prompt(Prompt::Price {
            rail: PaymentProvider::Stars,
            current: 100
        })]
    );
    assert_eq!(
        h.text(ADMIN, "-5").await,
        vec![Reply::InvalidInput(Prompt::Price {
            rail: PaymentProvider::Stars,
            current: 100
        })]
    );
    assert_eq!(h.text(ADMIN, "150").await, vec![Reply::SettingSaved]);

    let replies = h.command(ADMIN, Command::AdminSubscription).await;
    assert!(matches!(
        replies.as_slice(),
        [Reply::AdminSubscription { price_stars: 150, price_rub: 199, enabled: false, .. }]
    ));
}

#[tokio::test]
async fn subscription_menu_entry_follows_the_toggle() {
    let h = Harness::new();
    assert_eq!(
        h.command(EATER, Command::More).await,
        vec![Reply::MoreMenu {
            subscription: false,
            admin: false
        }]
    );
    // Disabled: the subscription screen falls back to the more menu.
    assert!(matches!(
        h.command(EATER, Command::Subscription).await.as_slice(),
        [Reply::MoreMenu { .. }]
    ));

    h.command(ADMIN, Command::ToggleSubscription).await;
    let replies = h.command(EATER, Command::Subscription).await;
    assert!(matches!(
        replies.as_slice(),
        [Reply::SubscriptionScreen {
            active_until: None,
            price_stars: 100,
            price_rub: 199,
            redirect_rail: true,
            ..
        }]
    ));
}

#[tokio::test]
async fn diary_and_summary_reflect_logged_food() {
    let h = Harness::new();
    let bread = h.add_product(EATER, "250 8 3 48", "Хлеб", "Bread").await;
    for grams in ["40", "60"] {
        h.pick(EATER, bread, true).await;
        h.command(EATER, Command::Meal(MealSlot::Lunch)).await;
        h.text(EATER, grams).await;
    }

    let replies = h.command(EATER, Command::DiaryToday).await;
    let [Reply::Diary { lines, totals }] = replies.as_slice() else {
        panic!("unexpected replies {:?}", replies);
    };
    assert_eq!(lines.len(), 2);
    assert!(close(totals.kcal, 250.0));
    assert!(close(totals.carbs, 48.0));

    let replies = h
        .command(EATER, Command::ShowSummary(food_diary_core::nutrition::Period::Last7Days))
        .await;
    assert!(matches!(
        replies.as_slice(),
        [Reply::Summary { totals, .. }] if close(totals.protein, 8.0)
    ));
}
