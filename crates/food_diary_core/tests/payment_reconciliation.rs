mod common;

use chrono::{Duration, Utc};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{FakeGateway, Harness};
use food_diary_core::conversation::Command;
use food_diary_core::memory::InMemoryLedger;
use food_diary_core::payments::{InBandOutcome, STARS_CURRENCY};
use food_diary_core::ports::LedgerStore;
use food_diary_core::subscription::SubscriptionLedger;
use food_diary_core::{
    InBandPayment, Input, PaymentProvider, PaymentReconciler, PaymentStatus, Reconciliation, Reply,
};

const BUYER: i64 = 501;

async fn setup() -> (Arc<InMemoryLedger>, Arc<FakeGateway>, PaymentReconciler) {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.touch_user(BUYER, Some("buyer"), false).await.unwrap();
    let gateway = Arc::new(FakeGateway::default());
    let reconciler = PaymentReconciler::new(ledger.clone(), Some(gateway.clone()));
    (ledger, gateway, reconciler)
}

#[tokio::test]
async fn create_intent_persists_a_pending_row() {
    let (ledger, gateway, reconciler) = setup().await;
    let link = reconciler
        .create_intent(BUYER, 199, "Subscription", "key-1")
        .await
        .unwrap();
    assert_eq!(link.payment.status, PaymentStatus::Pending);
    assert_eq!(link.payment.idempotency_key, "key-1");
    assert!(link.confirmation_url.is_some());

    // A retry with the same key reaches the same provider payment and the same row.
    let retry = reconciler
        .create_intent(BUYER, 199, "Subscription", "key-1")
        .await
        .unwrap();
    assert_eq!(retry.payment.id, link.payment.id);
    assert_eq!(gateway.creates.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.payments().await.len(), 1);
}

#[tokio::test]
async fn duplicate_notifications_extend_exactly_once() {
    let (ledger, gateway, reconciler) = setup().await;
    let link = reconciler
        .create_intent(BUYER, 199, "Subscription", "key-2")
        .await
        .unwrap();
    let id = link.payment.provider_payment_id.clone();
    gateway.set_status(&id, "succeeded");

    let first = reconciler.reconcile(&id).await.unwrap();
    let Reconciliation::Settled {
        status: PaymentStatus::Succeeded,
        subscription_until: Some(until),
    } = first
    else {
        panic!("unexpected first reconciliation {:?}", first);
    };
    assert_eq!(
        reconciler.reconcile(&id).await.unwrap(),
        Reconciliation::AlreadySettled(PaymentStatus::Succeeded)
    );

    let user = ledger.get_user(BUYER).await.unwrap();
    assert_eq!(user.subscription_until, Some(until));
    let payments = ledger.payments().await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Succeeded);
}

#[tokio::test]
async fn concurrent_reconciliation_extends_once() {
    let (ledger, gateway, reconciler) = setup().await;
    let link = reconciler
        .create_intent(BUYER, 199, "Subscription", "key-3")
        .await
        .unwrap();
    let id = link.payment.provider_payment_id.clone();
    gateway.set_status(&id, "succeeded");

    let started = Utc::now();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let reconciler = reconciler.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move { reconciler.reconcile(&id).await }));
    }
    let mut settled = 0;
    for handle in handles {
        if let Reconciliation::Settled { .. } = handle.await.unwrap().unwrap() {
            settled += 1;
        }
    }
    assert_eq!(settled, 1);

    let until = ledger.get_user(BUYER).await.unwrap().subscription_until.unwrap();
    assert!(until >= started + Duration::days(30));
    assert!(until < started + Duration::days(31));
}

#[tokio::test]
async fn in_flight_and_failed_statuses_grant_nothing() {
    let (ledger, gateway, reconciler) = setup().await;
    let link = reconciler
        .create_intent(BUYER, 199, "Subscription", "key-4")
        .await
        .unwrap();
    let id = link.payment.provider_payment_id.clone();

    gateway.set_status(&id, "waiting_for_capture");
    assert_eq!(
        reconciler.reconcile(&id).await.unwrap(),
        Reconciliation::StillPending
    );

    gateway.set_status(&id, "canceled");
    assert_eq!(
        reconciler.reconcile(&id).await.unwrap(),
        Reconciliation::Settled {
            status: PaymentStatus::Canceled,
            subscription_until: None
        }
    );

    // Terminal rows are never overwritten by a later status.
    gateway.set_status(&id, "succeeded");
    assert_eq!(
        reconciler.reconcile(&id).await.unwrap(),
        Reconciliation::AlreadySettled(PaymentStatus::Canceled)
    );
    assert_eq!(ledger.get_user(BUYER).await.unwrap().subscription_until, None);
}

#[tokio::test]
async fn unknown_payment_ids_are_ignored_without_fetching() {
    let (_, gateway, reconciler) = setup().await;
    gateway.set_status("foreign", "succeeded");
    assert_eq!(
        reconciler.reconcile("foreign").await.unwrap(),
        Reconciliation::UnknownPayment
    );
    assert_eq!(gateway.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn extension_is_additive_while_active() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.touch_user(BUYER, None, false).await.unwrap();
    let subscriptions = SubscriptionLedger::new(ledger.clone());

    let first = subscriptions.extend(BUYER, 30).await.unwrap();
    let second = subscriptions.extend(BUYER, 30).await.unwrap();
    assert_eq!(second, first + Duration::days(30));
    assert!(subscriptions.is_active(BUYER).await.unwrap());

    // A lapsed grant restarts from now.
    let lapsed = Utc::now() - Duration::days(3);
    ledger.set_subscription_until(BUYER, Some(lapsed)).await;
    let renewed = subscriptions.extend(BUYER, 30).await.unwrap();
    assert!(renewed > Utc::now() + Duration::days(29));
}

#[tokio::test]
async fn in_band_payments_are_deduplicated_by_charge_id() {
    let (ledger, _, reconciler) = setup().await;
    let payment = InBandPayment {
        owner: BUYER,
        currency: STARS_CURRENCY.to_string(),
        total_amount: 100,
        charge_id: "charge-1".to_string(),
        invoice_payload: format!("sub30:{}:1700000000", BUYER),
    };

    let first = reconciler.record_in_band(payment.clone()).await.unwrap();
    let InBandOutcome::Activated {
        subscription_until: Some(until),
    } = first
    else {
        panic!("unexpected outcome {:?}", first);
    };
    assert_eq!(
        reconciler.record_in_band(payment).await.unwrap(),
        InBandOutcome::Duplicate
    );
    assert_eq!(
        ledger.get_user(BUYER).await.unwrap().subscription_until,
        Some(until)
    );

    let payments = ledger.payments().await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].provider, PaymentProvider::Stars);
    assert_eq!(payments[0].status, PaymentStatus::Succeeded);
}

#[tokio::test]
async fn in_band_payments_in_other_currencies_are_ignored() {
    let (ledger, _, reconciler) = setup().await;
    let outcome = reconciler
        .record_in_band(InBandPayment {
            owner: BUYER,
            currency: "USD".to_string(),
            total_amount: 5,
            charge_id: "charge-x".to_string(),
            invoice_payload: String::new(),
        })
        .await
        .unwrap();
    assert_eq!(outcome, InBandOutcome::Ignored);
    assert!(ledger.payments().await.is_empty());
}

#[tokio::test]
async fn stars_invoice_payload_names_the_buyer() {
    let (_, _, reconciler) = setup().await;
    let invoice = reconciler.stars_invoice(BUYER).await.unwrap();
    assert_eq!(invoice.amount, 100);
    assert_eq!(invoice.currency, STARS_CURRENCY);
    assert!(invoice.payload.starts_with(&format!("sub30:{}:", BUYER)));
}

#[tokio::test]
async fn check_payment_from_the_conversation_activates() {
    let h = Harness::new();
    h.command(common::ADMIN, Command::ToggleSubscription).await;

    let replies = h.command(BUYER, Command::PayRedirect).await;
    let [Reply::PaymentLink {
        url: Some(_),
        amount: 199,
    }] = replies.as_slice()
    else {
        panic!("unexpected replies {:?}", replies);
    };
    assert_eq!(
        h.command(BUYER, Command::CheckPayment).await,
        vec![Reply::PaymentPending]
    );

    h.gateway.set_status("pay-1", "succeeded");
    let replies = h.command(BUYER, Command::CheckPayment).await;
    assert!(matches!(
        replies.as_slice(),
        [Reply::SubscriptionActivated { until: Some(_) }]
    ));
    // Checking again reports the same entitlement without extending it.
    let before = h.ledger.get_user(BUYER).await.unwrap().subscription_until;
    h.command(BUYER, Command::CheckPayment).await;
    assert_eq!(h.ledger.get_user(BUYER).await.unwrap().subscription_until, before);
}

#[tokio::test]
async fn successful_payment_message_activates_via_engine() {
    let h = Harness::new();
    let payment = InBandPayment {
        owner: 0,
        currency: STARS_CURRENCY.to_string(),
        total_amount: 100,
        charge_id: "tg-charge".to_string(),
        invoice_payload: "sub30:501:1".to_string(),
    };
    let replies = h
        .send(BUYER, Input::SuccessfulPayment(payment.clone()))
        .await;
    assert!(matches!(
        replies.as_slice(),
        [Reply::SubscriptionActivated { until: Some(_) }]
    ));
    assert_eq!(
        h.send(BUYER, Input::SuccessfulPayment(payment)).await,
        vec![Reply::PaymentAlreadyRecorded]
    );
    // The owner comes from the sender, not the event body.
    assert_eq!(h.ledger.payments().await[0].owner, BUYER);
}

#[tokio::test]
async fn repeated_pay_requests_reuse_the_pending_payment() {
    let h = Harness::new();
    h.command(common::ADMIN, Command::ToggleSubscription).await;

    let first = h.command(BUYER, Command::PayRedirect).await;
    let second = h.command(BUYER, Command::PayRedirect).await;
    assert_eq!(first, second);
    assert!(matches!(
        second.as_slice(),
        [Reply::PaymentLink { url: Some(url), .. }] if url.ends_with("/pay-1")
    ));
    assert_eq!(h.gateway.creates.load(Ordering::SeqCst), 1);
    assert_eq!(h.ledger.payments().await.len(), 1);

    // Once that attempt is settled, the next request opens a new payment.
    h.gateway.set_status("pay-1", "canceled");
    let third = h.command(BUYER, Command::PayRedirect).await;
    assert!(matches!(
        third.as_slice(),
        [Reply::PaymentLink { url: Some(url), .. }] if url.ends_with("/pay-2")
    ));
    assert_eq!(h.gateway.creates.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn retry_after_a_lost_response_reaches_the_same_payment() {
    let h = Harness::new();
    h.command(common::ADMIN, Command::ToggleSubscription).await;

    h.gateway.lose_next_response();
    assert_eq!(
        h.command(BUYER, Command::PayRedirect).await,
        vec![Reply::PaymentUnavailable]
    );
    assert!(h.ledger.payments().await.is_empty());

    let replies = h.command(BUYER, Command::PayRedirect).await;
    assert!(matches!(replies.as_slice(), [Reply::PaymentLink { url: Some(_), .. }]));
    assert_eq!(h.gateway.creates.load(Ordering::SeqCst), 1);
    let payments = h.ledger.payments().await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].provider_payment_id, "pay-1");
}
