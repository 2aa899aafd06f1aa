//! services/api/src/web/protocol.rs
//!
//! Defines the JSON protocol between the messaging transport and the API server.
//! The transport forwards each user update as an `InboundMessage` and renders the
//! returned `OutboundReplies` (reply payload plus keyboard) back to the user.

use food_diary_core::conversation::{Command, Keyboard, PickRequest, UnknownIdentifier};
use food_diary_core::{InBandPayment, IncomingMessage, Input, Reply};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

//=========================================================================================
// Messages Sent FROM the Transport TO the Server
//=========================================================================================

/// One update from a user, already stripped of transport-specific framing.
#[derive(Deserialize, Debug, ToSchema)]
pub struct InboundMessage {
    /// Platform user id.
    pub sender_id: i64,
    /// Platform username, with or without the leading `@`.
    pub handle: Option<String>,
    pub message: InboundPayload,
}

#[derive(Deserialize, Debug, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundPayload {
    /// Typed text. A leading `/` that names a known command is treated as that command.
    Text { text: String },

    /// A menu button, identified by its command id (e.g. `add_food`, `meal:lunch`).
    Command { command: String },

    /// Inline button callback data: either a command id or a `pick:<variant>:<id>:<0|1>` pick.
    Callback { data: String },

    /// The platform's confirmation of an in-band payment.
    SuccessfulPayment {
        currency: String,
        total_amount: i64,
        charge_id: String,
        #[serde(default)]
        invoice_payload: String,
    },
}

impl InboundMessage {
    /// Converts the wire form into the engine's input. Unknown command ids are rejected.
    pub fn into_incoming(self) -> Result<IncomingMessage, UnknownIdentifier> {
        let input = match self.message {
            InboundPayload::Text { text } => {
                let command = text
                    .trim()
                    .strip_prefix('/')
                    .and_then(|c| c.parse::<Command>().ok());
                match command {
                    Some(command) => Input::Command(command),
                    None => Input::Text(text),
                }
            }
            InboundPayload::Command { command } => Input::Command(command.parse()?),
            InboundPayload::Callback { data } if data.starts_with("pick:") => {
                Input::Pick(data.parse::<PickRequest>()?)
            }
            InboundPayload::Callback { data } => Input::Command(data.parse()?),
            InboundPayload::SuccessfulPayment {
                currency,
                total_amount,
                charge_id,
                invoice_payload,
            } => Input::SuccessfulPayment(InBandPayment {
                owner: self.sender_id,
                currency,
                total_amount,
                charge_id,
                invoice_payload,
            }),
        };
        Ok(IncomingMessage {
            sender: self.sender_id,
            handle: self
                .handle
                .map(|h| h.trim().trim_start_matches('@').to_string())
                .filter(|h| !h.is_empty()),
            input,
        })
    }
}

//=========================================================================================
// Messages Sent FROM the Server TO the Transport
//=========================================================================================

/// A reply to render, with the keyboard to show under it.
#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct OutboundReply {
    /// Tagged by `kind`; the transport localizes it using the user's language.
    #[schema(value_type = Object)]
    pub reply: Reply,
    /// Tagged by `type`: `reply` (rows of command ids), `inline` (pick buttons) or `keep`.
    #[schema(value_type = Object)]
    pub keyboard: Keyboard,
}

impl From<Reply> for OutboundReply {
    fn from(reply: Reply) -> Self {
        let keyboard = reply.keyboard();
        Self { reply, keyboard }
    }
}

#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct OutboundReplies {
    pub replies: Vec<OutboundReply>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use food_diary_core::domain::ProductRef;
    use serde_json::json;

    fn inbound(value: serde_json::Value) -> IncomingMessage {
        serde_json::from_value::<InboundMessage>(value)
            .unwrap()
            .into_incoming()
            .unwrap()
    }

    #[test]
    fn slash_text_becomes_a_command() {
        let message = inbound(json!({
            "sender_id": 5,
            "handle": "@Someone",
            "message": { "type": "text", "text": "/start" }
        }));
        assert_eq!(message.input, Input::Command(Command::Start));
        assert_eq!(message.handle.as_deref(), Some("Someone"));

        let message = inbound(json!({
            "sender_id": 5,
            "message": { "type": "text", "text": "/not-a-command" }
        }));
        assert_eq!(message.input, Input::Text("/not-a-command".to_string()));
    }

    #[test]
    fn callbacks_carry_picks_or_commands() {
        let message = inbound(json!({
            "sender_id": 5,
            "message": { "type": "callback", "data": "pick:catalog:12:1" }
        }));
        assert_eq!(
            message.input,
            Input::Pick(PickRequest {
                product: ProductRef::catalog(12),
                for_logging: true
            })
        );

        let message = inbound(json!({
            "sender_id": 5,
            "message": { "type": "callback", "data": "check_payment" }
        }));
        assert_eq!(message.input, Input::Command(Command::CheckPayment));
    }

    #[test]
    fn unknown_command_ids_are_rejected() {
        let parsed: InboundMessage = serde_json::from_value(json!({
            "sender_id": 5,
            "message": { "type": "command", "command": "self_destruct" }
        }))
        .unwrap();
        assert!(parsed.into_incoming().is_err());
    }

    #[test]
    fn successful_payment_is_owned_by_the_sender() {
        let message = inbound(json!({
            "sender_id": 77,
            "message": {
                "type": "successful_payment",
                "currency": "XTR",
                "total_amount": 100,
                "charge_id": "c-1",
                "invoice_payload": "sub30:1:1"
            }
        }));
        let Input::SuccessfulPayment(payment) = message.input else {
            panic!("expected a payment");
        };
        assert_eq!(payment.owner, 77);
        assert_eq!(payment.charge_id, "c-1");
    }

    #[test]
    fn outbound_reply_carries_its_keyboard() {
        let value = serde_json::to_value(OutboundReply::from(Reply::MainMenu)).unwrap();
        assert_eq!(value["reply"]["kind"], "main_menu");
        assert_eq!(value["keyboard"]["type"], "reply");
        assert_eq!(value["keyboard"]["buttons"][0][0], "add_food");
    }
}
