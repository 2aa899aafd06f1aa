#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use food_diary_core::conversation::{Command, PickRequest};
use food_diary_core::memory::{InMemoryConversationStore, InMemoryLedger};
use food_diary_core::ports::{
    BarcodeCatalog, BarcodeProduct, ConversationStore, PaymentGateway, PaymentIntent,
    PaymentRequest, PortError, PortResult, ProviderPayment,
};
use food_diary_core::{
    ConversationEngine, ConversationState, IncomingMessage, Input, Nutrients, ProductRef, Reply,
    UserId,
};

pub const ADMIN: UserId = 1;
pub const ADMIN_HANDLE: &str = "diary_admin";

//=========================================================================================
// Fake barcode catalog
//=========================================================================================

#[derive(Default)]
pub struct FakeBarcodes {
    products: Mutex<HashMap<String, BarcodeProduct>>,
    offline: Mutex<bool>,
    pub lookups: AtomicUsize,
}

impl FakeBarcodes {
    pub fn add(&self, code: &str, name: &str, per_100g: Nutrients) {
        self.products.lock().unwrap().insert(
            code.to_string(),
            BarcodeProduct {
                code: code.to_string(),
                name: name.to_string(),
                per_100g,
            },
        );
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }
}

#[async_trait]
impl BarcodeCatalog for FakeBarcodes {
    async fn lookup(&self, code: &str) -> PortResult<Option<BarcodeProduct>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if *self.offline.lock().unwrap() {
            return Err(PortError::Unavailable("connection timed out".to_string()));
        }
        Ok(self.products.lock().unwrap().get(code).cloned())
    }
}

//=========================================================================================
// Fake payment gateway
//=========================================================================================

#[derive(Default)]
pub struct FakeGateway {
    statuses: Mutex<HashMap<String, String>>,
    by_key: Mutex<HashMap<String, String>>,
    lose_next_response: Mutex<bool>,
    pub creates: AtomicUsize,
    pub fetches: AtomicUsize,
}

impl FakeGateway {
    pub fn set_status(&self, id: &str, status: &str) {
        self.statuses
            .lock()
            .unwrap()
            .insert(id.to_string(), status.to_string());
    }

    /// The next create call reaches the provider but its response never arrives.
    pub fn lose_next_response(&self) {
        *self.lose_next_response.lock().unwrap() = true;
    }
}

fn payment_json(id: &str, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "status": status,
        "confirmation": { "confirmation_url": format!("https://pay.example/confirm/{}", id) }
    })
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_payment(&self, request: PaymentRequest) -> PortResult<PaymentIntent> {
        let mut by_key = self.by_key.lock().unwrap();
        let id = match by_key.get(&request.idempotency_key) {
            Some(existing) => existing.clone(),
            None => {
                let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
                let id = format!("pay-{}", n);
                by_key.insert(request.idempotency_key.clone(), id.clone());
                self.set_status(&id, "pending");
                id
            }
        };
        drop(by_key);
        if std::mem::take(&mut *self.lose_next_response.lock().unwrap()) {
            return Err(PortError::Unavailable("response timed out".to_string()));
        }
        Ok(PaymentIntent {
            id: id.clone(),
            status: "pending".to_string(),
            confirmation_url: Some(format!("https://pay.example/confirm/{}", id)),
            raw: payment_json(&id, "pending"),
        })
    }

    async fn fetch_payment(&self, payment_id: &str) -> PortResult<ProviderPayment> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let status = self
            .statuses
            .lock()
            .unwrap()
            .get(payment_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(payment_id.to_string()))?;
        Ok(ProviderPayment {
            id: payment_id.to_string(),
            raw: payment_json(payment_id, &status),
            status,
        })
    }
}

//=========================================================================================
// Harness
//=========================================================================================

pub struct Harness {
    pub ledger: Arc<InMemoryLedger>,
    pub states: Arc<InMemoryConversationStore>,
    pub barcodes: Arc<FakeBarcodes>,
    pub gateway: Arc<FakeGateway>,
    pub engine: ConversationEngine,
}

impl Harness {
    pub fn new() -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let states = Arc::new(InMemoryConversationStore::new());
        let barcodes = Arc::new(FakeBarcodes::default());
        let gateway = Arc::new(FakeGateway::default());
        let engine = ConversationEngine::new(
            ledger.clone(),
            states.clone(),
            Some(barcodes.clone()),
            Some(gateway.clone()),
            Some(format!("@{}", ADMIN_HANDLE)),
        );
        Self {
            ledger,
            states,
            barcodes,
            gateway,
            engine,
        }
    }

    pub async fn send(&self, user: UserId, input: Input) -> Vec<Reply> {
        let handle = if user == ADMIN {
            ADMIN_HANDLE.to_string()
        } else {
            format!("eater{}", user)
        };
        self.engine
            .handle(IncomingMessage {
                sender: user,
                handle: Some(handle),
                input,
            })
            .await
            .unwrap()
    }

    pub async fn text(&self, user: UserId, text: &str) -> Vec<Reply> {
        self.send(user, Input::Text(text.to_string())).await
    }

    pub async fn command(&self, user: UserId, command: Command) -> Vec<Reply> {
        self.send(user, Input::Command(command)).await
    }

    pub async fn pick(&self, user: UserId, product: ProductRef, for_logging: bool) -> Vec<Reply> {
        self.send(
            user,
            Input::Pick(PickRequest {
                product,
                for_logging,
            }),
        )
        .await
    }

    pub async fn state(&self, user: UserId) -> ConversationState {
        self.states.get(user).await.unwrap()
    }

    /// Runs the manual add-product flow to completion and returns the private product.
    pub async fn add_product(&self, user: UserId, macros: &str, ru: &str, en: &str) -> ProductRef {
        self.command(user, Command::AddNewProduct).await;
        self.text(user, macros).await;
        let replies = self.text(user, &format!("RU: {}\nEN: {}", ru, en)).await;
        match replies.as_slice() {
            [Reply::ProductCreated { product, .. }] => product.reference,
            other => panic!("expected a created product, got {:?}", other),
        }
    }
}

pub fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
