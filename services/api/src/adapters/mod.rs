pub mod conversation_store;
pub mod db;
pub mod open_food_facts;
pub mod yookassa;

pub use conversation_store::PostgresConversationStore;
pub use db::DbAdapter;
pub use open_food_facts::OpenFoodFactsAdapter;
pub use yookassa::YooKassaAdapter;
