//! Messaging channels.
//!
//! Defines the outbound gateway interface the engine sends through, plus the
//! WhatsApp Cloud API implementation. The engine only ever sees the trait;
//! gateways are constructed once and passed in.

pub mod whatsapp;

use async_trait::async_trait;
use tracing::info;

use crate::messages::Button;

/// WhatsApp shows at most three quick-reply buttons; gateways truncate
/// longer lists rather than fail.
pub const MAX_QUICK_REPLY_BUTTONS: usize = 3;

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors from sending through a messaging gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider rejected message: status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("send timed out")]
    Timeout,
}

/// Successful delivery result.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Provider-assigned message id.
    pub message_id: String,
}

/// Outbound messaging gateway.
///
/// `(recipient, text)` or `(recipient, text, buttons)` in, delivery result
/// with a provider message id out. Implementations own their own timeout on
/// the send call.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Send a plain text message.
    async fn send_text(&self, to: &str, body: &str) -> GatewayResult<Delivery>;

    /// Send a text message with quick-reply buttons. Implementations cap
    /// the list at [`MAX_QUICK_REPLY_BUTTONS`].
    async fn send_buttons(&self, to: &str, body: &str, buttons: &[Button])
        -> GatewayResult<Delivery>;
}

/// Truncate a button list to the provider's UI limit, logging when it does.
pub fn cap_buttons(buttons: &[Button]) -> &[Button] {
    if buttons.len() > MAX_QUICK_REPLY_BUTTONS {
        tracing::warn!(
            count = buttons.len(),
            max = MAX_QUICK_REPLY_BUTTONS,
            "truncating quick-reply button list"
        );
        &buttons[..MAX_QUICK_REPLY_BUTTONS]
    } else {
        buttons
    }
}

/// Gateway that logs instead of sending. Backs the `simulate` CLI command
/// and local development.
#[derive(Debug, Default)]
pub struct LoggingGateway;

#[async_trait]
impl MessageGateway for LoggingGateway {
    async fn send_text(&self, to: &str, body: &str) -> GatewayResult<Delivery> {
        info!(to, body, "outbound text");
        Ok(Delivery {
            message_id: format!("local-{}", uuid::Uuid::new_v4()),
        })
    }

    async fn send_buttons(
        &self,
        to: &str,
        body: &str,
        buttons: &[Button],
    ) -> GatewayResult<Delivery> {
        let labels: Vec<&str> = cap_buttons(buttons).iter().map(|b| b.title.as_str()).collect();
        info!(to, body, buttons = ?labels, "outbound buttons");
        Ok(Delivery {
            message_id: format!("local-{}", uuid::Uuid::new_v4()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buttons(n: usize) -> Vec<Button> {
        (0..n)
            .map(|i| Button::new(format!("id{i}"), format!("Button {i}")))
            .collect()
    }

    #[test]
    fn test_cap_buttons_truncates() {
        let list = buttons(5);
        assert_eq!(cap_buttons(&list).len(), MAX_QUICK_REPLY_BUTTONS);
    }

    #[test]
    fn test_cap_buttons_keeps_short_lists() {
        let list = buttons(2);
        assert_eq!(cap_buttons(&list).len(), 2);
    }

    #[tokio::test]
    async fn test_logging_gateway_returns_message_id() {
        let gateway = LoggingGateway;
        let delivery = gateway.send_text("+254700000001", "hello").await.unwrap();
        assert!(delivery.message_id.starts_with("local-"));
    }
}
