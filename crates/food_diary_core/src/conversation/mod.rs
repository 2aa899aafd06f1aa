//! The per-user multi-step conversation engine and its wire-independent message types.

pub mod engine;
pub mod input;
pub mod parse;
pub mod reply;
pub mod state;

pub use engine::ConversationEngine;
pub use input::{Command, IncomingMessage, Input, PickRequest, UnknownIdentifier};
pub use reply::{Keyboard, PickButton, Prompt, Reply};
pub use state::ConversationState;
