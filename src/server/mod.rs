//! Webhook server.
//!
//! Exposes the WhatsApp Cloud API webhook pair: `GET /webhook` for the
//! subscription handshake and `POST /webhook` for inbound notifications.
//! Notifications are acknowledged with 200 immediately and processed on
//! spawned tasks; the provider retries on anything else, so engine faults
//! must never surface as HTTP errors.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::engine::{ConversationEngine, CustomerRef};
use crate::messages::InboundEvent;

/// Shared state for webhook handlers.
#[derive(Clone)]
pub struct ServerState {
    /// The conversation engine every event is fed into.
    pub engine: Arc<ConversationEngine>,
    /// Token the provider must echo during the subscription handshake.
    pub verify_token: String,
    /// Tenant all webhook traffic is routed to. Multi-number routing would
    /// key this off the webhook metadata instead.
    pub tenant_id: String,
}

/// Build the webhook router.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/webhook", get(verify_webhook).post(receive_webhook))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Subscription handshake query parameters, as sent by the provider.
#[derive(Debug, Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode", default)]
    mode: String,
    #[serde(rename = "hub.verify_token", default)]
    verify_token: String,
    #[serde(rename = "hub.challenge", default)]
    challenge: String,
}

/// `GET /webhook`: echo the challenge when the verify token matches.
async fn verify_webhook(
    State(state): State<ServerState>,
    Query(params): Query<VerifyParams>,
) -> Result<String, StatusCode> {
    if params.mode == "subscribe" && params.verify_token == state.verify_token {
        info!("webhook subscription verified");
        Ok(params.challenge)
    } else {
        warn!(mode = %params.mode, "webhook verification rejected");
        Err(StatusCode::FORBIDDEN)
    }
}

/// `POST /webhook`: parse the notification, spawn a task per message and
/// acknowledge immediately. Unparseable or non-message notifications
/// (statuses, reactions) are acknowledged and ignored.
async fn receive_webhook(
    State(state): State<ServerState>,
    Json(payload): Json<WebhookPayload>,
) -> StatusCode {
    let events = extract_events(&payload);
    if events.is_empty() {
        debug!("webhook notification carried no processable messages");
        return StatusCode::OK;
    }

    for event in events {
        let engine = state.engine.clone();
        let customer = CustomerRef::from_phone(event.phone_number.clone(), state.tenant_id.clone());
        tokio::spawn(async move {
            engine.process_event(&customer, &event).await;
        });
    }
    StatusCode::OK
}

/// WhatsApp Cloud API webhook notification. Only the fields the engine
/// needs; everything else is ignored by serde.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
struct WebhookEntry {
    #[serde(default)]
    changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
struct WebhookChange {
    #[serde(default)]
    value: WebhookValue,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookValue {
    #[serde(default)]
    messages: Vec<WebhookMessage>,
}

#[derive(Debug, Deserialize)]
struct WebhookMessage {
    from: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<TextBody>,
    #[serde(default)]
    interactive: Option<Interactive>,
}

#[derive(Debug, Deserialize)]
struct TextBody {
    body: String,
}

#[derive(Debug, Deserialize)]
struct Interactive {
    #[serde(default)]
    button_reply: Option<ButtonReply>,
}

#[derive(Debug, Deserialize)]
struct ButtonReply {
    id: String,
    title: String,
}

/// Flatten a webhook notification into inbound events. Pure, so the
/// translation is testable without a server.
pub fn extract_events(payload: &WebhookPayload) -> Vec<InboundEvent> {
    let mut events = Vec::new();
    for entry in &payload.entry {
        for change in &entry.changes {
            for message in &change.value.messages {
                match message.kind.as_str() {
                    "text" => {
                        if let Some(text) = &message.text {
                            events.push(InboundEvent::text(&message.from, &text.body));
                        }
                    }
                    "interactive" => {
                        if let Some(reply) = message
                            .interactive
                            .as_ref()
                            .and_then(|i| i.button_reply.as_ref())
                        {
                            events.push(InboundEvent::button(
                                &message.from,
                                &reply.id,
                                &reply.title,
                            ));
                        }
                    }
                    other => {
                        debug!(kind = other, "ignoring unsupported message type");
                    }
                }
            }
        }
    }
    events
}
