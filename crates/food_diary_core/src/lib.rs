pub mod conversation;
pub mod domain;
pub mod memory;
pub mod nutrition;
pub mod payments;
pub mod ports;
pub mod products;
pub mod settings;
pub mod subscription;

pub use conversation::{ConversationEngine, ConversationState, IncomingMessage, Input, Reply};
pub use domain::{
    FoodLogEntry, Language, MealSlot, Nutrients, Payment, PaymentProvider, PaymentStatus,
    Product, ProductNames, ProductRef, User, UserId};
pub use payments::{InBandPayment, PaymentReconciler, Reconciliation};
pub use ports::{
    BarcodeCatalog, BarcodeProduct, ConversationStore, LedgerStore, PaymentGateway, PaymentIntent,
    PaymentRequest, PortError, PortResult, ProviderPayment, Settlement};
