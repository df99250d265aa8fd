//! WhatsApp Cloud API gateway.
//!
//! Sends text and quick-reply button messages through the Graph API
//! `/{phone_id}/messages` endpoint. Payload shapes follow the interactive
//! message format; button lists are capped at the platform's three-button
//! limit before building the payload.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{cap_buttons, Delivery, GatewayError, GatewayResult, MessageGateway};
use crate::messages::Button;

/// WhatsApp Cloud API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Graph API base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Business phone number id.
    #[serde(default)]
    pub phone_id: String,
    /// Bearer token for the API.
    #[serde(default)]
    pub access_token: String,
    /// Timeout for a single send call, in seconds. Applies to the send
    /// only; a timeout is a delivery failure, never a state rollback.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://graph.facebook.com/v19.0".to_string()
}

fn default_send_timeout_secs() -> u64 {
    15
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            phone_id: String::new(),
            access_token: String::new(),
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

/// WhatsApp Cloud API message gateway.
pub struct WhatsAppGateway {
    config: WhatsAppConfig,
    client: reqwest::Client,
}

impl WhatsAppGateway {
    /// Create a gateway from config. Fails if the HTTP client cannot be
    /// built; falling back to a client without the configured timeout
    /// would silently change delivery semantics.
    pub fn new(config: WhatsAppConfig) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.send_timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}/messages",
            self.config.api_url.trim_end_matches('/'),
            self.config.phone_id
        )
    }

    async fn post(&self, payload: serde_json::Value) -> GatewayResult<Delivery> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: SendResponse = response.json().await?;
        let message_id = body
            .messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| GatewayError::SendFailed("no message id in response".to_string()))?;
        debug!(message_id = %message_id, "message accepted by provider");
        Ok(Delivery { message_id })
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

#[async_trait]
impl MessageGateway for WhatsAppGateway {
    async fn send_text(&self, to: &str, body: &str) -> GatewayResult<Delivery> {
        self.post(build_text_payload(to, body)).await
    }

    async fn send_buttons(
        &self,
        to: &str,
        body: &str,
        buttons: &[Button],
    ) -> GatewayResult<Delivery> {
        if buttons.is_empty() {
            return self.send_text(to, body).await;
        }
        self.post(build_buttons_payload(to, body, cap_buttons(buttons)))
            .await
    }
}

/// Build the plain-text message payload.
fn build_text_payload(to: &str, body: &str) -> serde_json::Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "text",
        "text": {
            "preview_url": false,
            "body": body,
        },
    })
}

/// Build the interactive quick-reply payload. Callers cap the button list
/// first.
fn build_buttons_payload(to: &str, body: &str, buttons: &[Button]) -> serde_json::Value {
    let button_items: Vec<serde_json::Value> = buttons
        .iter()
        .map(|b| {
            json!({
                "type": "reply",
                "reply": { "id": b.id, "title": b.title },
            })
        })
        .collect();

    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "interactive",
        "interactive": {
            "type": "button",
            "body": { "text": body },
            "action": { "buttons": button_items },
        },
    })
}
