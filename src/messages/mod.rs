//! Inbound and outbound message types.
//!
//! Webhook payloads from the messaging provider are normalized into
//! [`InboundEvent`] before they reach the conversation engine, so the engine
//! never sees provider-specific JSON.

use serde::{Deserialize, Serialize};

/// Kind of inbound event, as reported by the messaging provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Free-form text message.
    Text,
    /// Quick-reply button press.
    Button,
    /// Anything else (media, reactions, stickers, ...).
    #[serde(other)]
    Other,
}

/// A normalized inbound customer event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Sender phone number in E.164-ish form (as the provider reports it).
    pub phone_number: String,
    /// Message text. Empty for non-text events.
    #[serde(default)]
    pub text: String,
    /// Event kind.
    pub kind: EventKind,
    /// Button payload id, present only for button events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_id: Option<String>,
}

impl InboundEvent {
    /// Build a text event.
    pub fn text(phone_number: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            phone_number: phone_number.into(),
            text: text.into(),
            kind: EventKind::Text,
            button_id: None,
        }
    }

    /// Build a button-press event. The button title travels as `text`.
    pub fn button(
        phone_number: impl Into<String>,
        button_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            phone_number: phone_number.into(),
            text: title.into(),
            kind: EventKind::Button,
            button_id: Some(button_id.into()),
        }
    }

    /// Trimmed message text.
    pub fn trimmed_text(&self) -> &str {
        self.text.trim()
    }
}

/// A quick-reply button attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    /// Provider-visible payload id, echoed back on press.
    pub id: String,
    /// Label shown to the customer.
    pub title: String,
}

impl Button {
    /// Create a button.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}
