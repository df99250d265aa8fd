//! Action dispatch.
//!
//! Maps each [`ActionName`] to exactly one registered executor at
//! construction time and isolates executor failures: an action that errors
//! is logged and reported as failed, and the state transition proceeds
//! regardless; the side effect and the state pointer are independent
//! concerns.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::channels::{GatewayError, MessageGateway};
use crate::flows::ActionName;
use crate::messages::Button;

/// Errors an action executor can surface.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Ephemeral context assembled per turn and handed to the executor.
///
/// Snapshotted from the session *before* the transition commits; executors
/// read and write session data only through this struct for the duration of
/// one call, and the orchestrator applies `context_data` and
/// `reset_session` back afterwards. Executors never hold a session or store
/// reference.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Customer phone / channel identifier.
    pub phone_number: String,
    /// Customer id.
    pub customer_id: String,
    /// Tenant (business) id.
    pub tenant_id: String,
    /// Raw inbound message text.
    pub message: String,
    /// Snapshot of the session's context bag; mutations are merged back
    /// after the call, success or failure.
    pub context_data: HashMap<String, serde_json::Value>,
    /// Normalized token of the state the transition leaves.
    pub source_state: String,
    /// Normalized token of the state the transition enters.
    pub target_state: String,
    /// Set by an executor to request logical retirement of the session;
    /// applied by the orchestrator after the transition commits.
    pub reset_session: bool,
}

/// One externally implemented, idempotent-intent operation.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Perform the action. Errors are caught at the dispatcher boundary.
    async fn execute(&self, ctx: &mut ActionContext) -> Result<(), ActionError>;
}

/// Static action-name → executor table.
///
/// Built once at startup; there is no dynamic dispatch by string, so a typo
/// in a flow definition fails at parse time and a missing registration is a
/// loud dispatch-time warning rather than a silent no-op.
pub struct ActionDispatcher {
    executors: HashMap<ActionName, Arc<dyn ActionExecutor>>,
}

impl ActionDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Create a dispatcher with the built-in executors registered:
    /// `NO_ACTION`, `RESET_SESSION`, `HANDLE_MPESA_PAYMENT` and
    /// `SEND_PAYMENT_OPTIONS`. Business executors (order creation,
    /// tracking, support hand-off) are registered by the embedding
    /// application.
    pub fn with_defaults(gateway: Arc<dyn MessageGateway>) -> Self {
        Self::new()
            .register(ActionName::NoAction, Arc::new(NoActionExecutor))
            .register(ActionName::ResetSession, Arc::new(ResetSessionExecutor))
            .register(
                ActionName::HandleMpesaPayment,
                Arc::new(MpesaInstructionsExecutor {
                    gateway: gateway.clone(),
                }),
            )
            .register(
                ActionName::SendPaymentOptions,
                Arc::new(PaymentOptionsExecutor { gateway }),
            )
    }

    /// Register an executor for an action name, replacing any previous one.
    pub fn register(mut self, name: ActionName, executor: Arc<dyn ActionExecutor>) -> Self {
        if self.executors.insert(name, executor).is_some() {
            debug!(action = %name, "replacing registered executor");
        }
        self
    }

    /// Whether an executor is registered for the name.
    pub fn has_executor(&self, name: ActionName) -> bool {
        self.executors.contains_key(&name)
    }

    /// Execute an action, returning success. Never raises: unknown names
    /// and executor errors are logged and reported as `false`.
    pub async fn execute(&self, name: ActionName, ctx: &mut ActionContext) -> bool {
        let Some(executor) = self.executors.get(&name) else {
            warn!(action = %name, "no executor registered for action");
            return false;
        };
        match executor.execute(ctx).await {
            Ok(()) => {
                debug!(action = %name, customer = %ctx.customer_id, "action executed");
                true
            }
            Err(e) => {
                error!(action = %name, customer = %ctx.customer_id, error = %e, "action failed");
                false
            }
        }
    }
}

impl Default for ActionDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// `NO_ACTION`: state transitions without side effects.
struct NoActionExecutor;

#[async_trait]
impl ActionExecutor for NoActionExecutor {
    async fn execute(&self, _ctx: &mut ActionContext) -> Result<(), ActionError> {
        Ok(())
    }
}

/// `RESET_SESSION`: request logical retirement of the session.
struct ResetSessionExecutor;

#[async_trait]
impl ActionExecutor for ResetSessionExecutor {
    async fn execute(&self, ctx: &mut ActionContext) -> Result<(), ActionError> {
        ctx.reset_session = true;
        Ok(())
    }
}

/// `HANDLE_MPESA_PAYMENT`: instruct the customer to pay via M-Pesa and
/// share the confirmation message.
struct MpesaInstructionsExecutor {
    gateway: Arc<dyn MessageGateway>,
}

#[async_trait]
impl ActionExecutor for MpesaInstructionsExecutor {
    async fn execute(&self, ctx: &mut ActionContext) -> Result<(), ActionError> {
        let body = "Please send your payment to our M-Pesa number and then share the \
                    transaction message/code/confirmation with us.";
        self.gateway.send_text(&ctx.phone_number, body).await?;
        Ok(())
    }
}

/// `SEND_PAYMENT_OPTIONS`: quick-reply buttons for the supported payment
/// methods.
struct PaymentOptionsExecutor {
    gateway: Arc<dyn MessageGateway>,
}

#[async_trait]
impl ActionExecutor for PaymentOptionsExecutor {
    async fn execute(&self, ctx: &mut ActionContext) -> Result<(), ActionError> {
        let buttons = vec![
            Button::new("pay_with_m-pesa", "M-Pesa"),
            Button::new("pay_cash", "Cash on Delivery"),
        ];
        self.gateway
            .send_buttons(
                &ctx.phone_number,
                "Please choose your payment method:",
                &buttons,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::LoggingGateway;

    fn context() -> ActionContext {
        ActionContext {
            phone_number: "+254700000001".into(),
            customer_id: "+254700000001".into(),
            tenant_id: "duka-001".into(),
            message: "hi".into(),
            context_data: HashMap::new(),
            source_state: "initial".into(),
            target_state: "welcome".into(),
            reset_session: false,
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl ActionExecutor for FailingExecutor {
        async fn execute(&self, _ctx: &mut ActionContext) -> Result<(), ActionError> {
            Err(ActionError::Failed("order service unavailable".into()))
        }
    }

    struct ContextWritingExecutor;

    #[async_trait]
    impl ActionExecutor for ContextWritingExecutor {
        async fn execute(&self, ctx: &mut ActionContext) -> Result<(), ActionError> {
            ctx.context_data
                .insert("pending_order_id".into(), serde_json::json!(42));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unknown_action_returns_false() {
        let dispatcher = ActionDispatcher::new();
        let mut ctx = context();
        assert!(!dispatcher.execute(ActionName::CreateOrder, &mut ctx).await);
    }

    #[tokio::test]
    async fn test_failing_executor_is_caught() {
        let dispatcher =
            ActionDispatcher::new().register(ActionName::CreateOrder, Arc::new(FailingExecutor));
        let mut ctx = context();
        assert!(!dispatcher.execute(ActionName::CreateOrder, &mut ctx).await);
    }

    #[tokio::test]
    async fn test_executor_writes_context() {
        let dispatcher = ActionDispatcher::new()
            .register(ActionName::CreateOrder, Arc::new(ContextWritingExecutor));
        let mut ctx = context();
        assert!(dispatcher.execute(ActionName::CreateOrder, &mut ctx).await);
        assert_eq!(ctx.context_data["pending_order_id"], 42);
    }

    #[tokio::test]
    async fn test_reset_session_sets_flag() {
        let dispatcher = ActionDispatcher::with_defaults(Arc::new(LoggingGateway));
        let mut ctx = context();
        assert!(dispatcher.execute(ActionName::ResetSession, &mut ctx).await);
        assert!(ctx.reset_session);
    }

    #[tokio::test]
    async fn test_defaults_cover_builtins() {
        let dispatcher = ActionDispatcher::with_defaults(Arc::new(LoggingGateway));
        assert!(dispatcher.has_executor(ActionName::NoAction));
        assert!(dispatcher.has_executor(ActionName::ResetSession));
        assert!(dispatcher.has_executor(ActionName::HandleMpesaPayment));
        assert!(dispatcher.has_executor(ActionName::SendPaymentOptions));
        assert!(!dispatcher.has_executor(ActionName::CreateOrder));
    }

    #[tokio::test]
    async fn test_no_action_succeeds() {
        let dispatcher = ActionDispatcher::with_defaults(Arc::new(LoggingGateway));
        let mut ctx = context();
        assert!(dispatcher.execute(ActionName::NoAction, &mut ctx).await);
        assert!(!ctx.reset_session);
    }
}
