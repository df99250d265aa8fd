//! Conversation engine.
//!
//! Ties the flow store, session store, trigger matcher, action dispatcher
//! and messaging gateway together: one inbound customer event in, one
//! atomic logical turn out. Every branch ends in either a sent message or a
//! logged no-op; no fault propagates to the webhook caller.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::channels::MessageGateway;
use crate::engine::actions::{ActionContext, ActionDispatcher};
use crate::engine::matcher::match_transition;
use crate::flows::{normalize_state_token, Flow, FlowProvider, FlowState};
use crate::messages::{Button, InboundEvent};
use crate::sessions::{
    check_session, ConsistencyReport, RecoveryAction, Session, SessionStore, INITIAL_STATE,
};

/// Generic apology used when no flow is configured or a state has nothing
/// to re-prompt with.
pub const FALLBACK_MESSAGE: &str =
    "I'm sorry, I didn't understand that. Please try again or contact support.";

/// Prefix for re-prompting the current state's message on no-match.
pub const NOT_UNDERSTOOD_PREFIX: &str = "I didn't understand that.";

/// Identifies the customer a turn belongs to.
#[derive(Debug, Clone)]
pub struct CustomerRef {
    /// Stable customer id (for WhatsApp, the wa_id / phone number).
    pub customer_id: String,
    /// Channel address to reply to.
    pub phone_number: String,
    /// Tenant whose flow governs the conversation.
    pub tenant_id: String,
}

impl CustomerRef {
    /// Customer keyed by phone number, the common WhatsApp case.
    pub fn from_phone(phone_number: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        let phone_number = phone_number.into();
        Self {
            customer_id: phone_number.clone(),
            phone_number,
            tenant_id: tenant_id.into(),
        }
    }
}

/// What a turn did. Delivery failures are logged, not reflected here; the
/// outcome describes the engine's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// No active flow (or no usable state); the fixed apology was sent and
    /// the session was not touched.
    FallbackSent,
    /// A transition fired and the session now points at `state`.
    /// `message_sent` is false for a silent transition (target state has no
    /// message body).
    Transitioned { state: String, message_sent: bool },
    /// No transition matched; the session stayed at `state` and the
    /// customer was re-prompted.
    Reprompted { state: String },
}

/// The conversation engine. Construct one per process with explicitly
/// passed-in dependencies; it owns nothing global.
pub struct ConversationEngine {
    flows: Arc<dyn FlowProvider>,
    sessions: Arc<SessionStore>,
    dispatcher: ActionDispatcher,
    gateway: Arc<dyn MessageGateway>,
    fallback_message: String,
}

impl ConversationEngine {
    /// Create an engine.
    pub fn new(
        flows: Arc<dyn FlowProvider>,
        sessions: Arc<SessionStore>,
        dispatcher: ActionDispatcher,
        gateway: Arc<dyn MessageGateway>,
    ) -> Self {
        Self {
            flows,
            sessions,
            dispatcher,
            gateway,
            fallback_message: FALLBACK_MESSAGE.to_string(),
        }
    }

    /// Override the generic apology message.
    pub fn with_fallback_message(mut self, message: impl Into<String>) -> Self {
        self.fallback_message = message.into();
        self
    }

    /// Session store handle, for maintenance tasks.
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Process one inbound event as an atomic logical turn.
    ///
    /// The per-customer session lock is held from fetch through persist,
    /// serializing turns for the same customer; the outbound reply is sent
    /// after the lock is released. A committed transition is never rolled
    /// back by an action or delivery failure.
    pub async fn process_event(&self, customer: &CustomerRef, event: &InboundEvent) -> TurnOutcome {
        let Some(flow) = self.flows.active_flow(&customer.tenant_id) else {
            warn!(tenant = %customer.tenant_id, "no active flow for tenant");
            self.deliver(&customer.phone_number, &self.fallback_message, &[])
                .await;
            return TurnOutcome::FallbackSent;
        };

        let handle = self.sessions.get_or_create(&customer.customer_id).await;
        let mut session = handle.lock().await;

        let Some(current) = self.resolve_current_state(&flow, &mut session).await else {
            // A validated flow always has a start state; an empty flow can
            // only appear through a live edit.
            error!(flow = %flow.id, "active flow has no usable state");
            drop(session);
            self.deliver(&customer.phone_number, &self.fallback_message, &[])
                .await;
            return TurnOutcome::FallbackSent;
        };
        let current = current.clone();

        debug!(
            customer = %customer.customer_id,
            state = %current.token(),
            kind = ?event.kind,
            "processing inbound event"
        );

        let transitions = current.sorted_transitions();
        let Some(transition) = match_transition(&transitions, event) else {
            // Stay put and re-prompt; the session is not mutated.
            let state_token = current.token();
            drop(session);
            self.reprompt(&customer.phone_number, &current).await;
            return TurnOutcome::Reprompted { state: state_token };
        };
        let transition = transition.clone();
        let target_token = transition.target_token();

        // Context snapshot before any session mutation.
        let mut ctx = ActionContext {
            phone_number: customer.phone_number.clone(),
            customer_id: customer.customer_id.clone(),
            tenant_id: customer.tenant_id.clone(),
            message: event.trimmed_text().to_string(),
            context_data: session.context_data.clone(),
            source_state: current.token(),
            target_state: target_token.clone(),
            reset_session: false,
        };

        if let Some(action) = transition.action {
            // Success or failure, the transition proceeds.
            let ok = self.dispatcher.execute(action, &mut ctx).await;
            if !ok {
                info!(action = %action, customer = %customer.customer_id, "action reported failure, transition proceeds");
            }
        }

        if let Err(e) = self.sessions.set_context(&mut session, ctx.context_data).await {
            warn!(customer = %customer.customer_id, error = %e, "failed to persist session context");
        }
        if let Err(e) = self
            .sessions
            .set_state(&mut session, target_token.clone())
            .await
        {
            warn!(customer = %customer.customer_id, error = %e, "failed to persist session state");
        }
        if ctx.reset_session {
            debug!(customer = %customer.customer_id, "action requested session reset");
            if let Err(e) = self.sessions.mark_inactive(&mut session).await {
                warn!(customer = %customer.customer_id, error = %e, "failed to retire session");
            }
        }
        drop(session);

        // Compose the reply for the new state. A target without a message
        // body is a valid silent transition.
        let message_sent = match flow.find_state(&target_token) {
            Some(target) => match &target.message_body {
                Some(body) => {
                    self.deliver(&customer.phone_number, body, &target.buttons)
                        .await;
                    true
                }
                None => false,
            },
            None => {
                // Flow edited mid-flight; next turn recovers via drift.
                warn!(state = %target_token, flow = %flow.id, "transition target missing from flow");
                false
            }
        };

        TurnOutcome::Transitioned {
            state: target_token,
            message_sent,
        }
    }

    /// Resolve the session's current state against the flow, committing a
    /// recovery to the start state when the stored token is unknown. Drift
    /// is a normal, expected branch: flows are edited while conversations
    /// are live.
    async fn resolve_current_state<'a>(
        &self,
        flow: &'a Flow,
        session: &mut Session,
    ) -> Option<&'a FlowState> {
        let token = normalize_state_token(&session.current_state);
        if let Some(state) = flow.find_state(&token) {
            return Some(state);
        }

        let start = flow.resolve_start_state()?;
        if token == INITIAL_STATE {
            debug!(customer = %session.customer_id, start = %start.token(), "first contact, entering start state");
        } else {
            warn!(
                customer = %session.customer_id,
                stored = %token,
                start = %start.token(),
                "stored state missing from active flow, recovering to start state"
            );
        }
        // Commit the recovery so the session is valid even if nothing
        // matches this turn.
        if let Err(e) = self.sessions.set_state(session, start.token()).await {
            warn!(customer = %session.customer_id, error = %e, "failed to persist recovered state");
        }
        Some(start)
    }

    /// Re-send the current state's message with a not-understood prefix, or
    /// the generic apology if the state has no body. Buttons are preserved.
    async fn reprompt(&self, phone_number: &str, state: &FlowState) {
        match &state.message_body {
            Some(body) => {
                let message = format!("{} {}", NOT_UNDERSTOOD_PREFIX, body);
                self.deliver(phone_number, &message, &state.buttons).await;
            }
            None => {
                self.deliver(phone_number, &self.fallback_message, &[])
                    .await;
            }
        }
    }

    async fn deliver(&self, to: &str, body: &str, buttons: &[Button]) {
        let result = if buttons.is_empty() {
            self.gateway.send_text(to, body).await
        } else {
            self.gateway.send_buttons(to, body, buttons).await
        };
        match result {
            Ok(delivery) => {
                debug!(to, message_id = %delivery.message_id, "reply delivered")
            }
            // Delivery failure never rolls back the committed transition.
            Err(e) => error!(to, error = %e, "failed to deliver reply"),
        }
    }

    /// Run the consistency check for a customer against the active flow.
    /// Returns `None` when the tenant has no active flow.
    pub async fn check_customer(&self, customer: &CustomerRef) -> Option<ConsistencyReport> {
        let flow = self.flows.active_flow(&customer.tenant_id)?;
        let handle = self.sessions.get_or_create(&customer.customer_id).await;
        let session = handle.lock().await;
        Some(check_session(&flow, &session))
    }

    /// Run the consistency check and apply its recommended recovery:
    /// re-enter the start state (clearing context), or clear stale context
    /// in place.
    pub async fn repair_customer(&self, customer: &CustomerRef) -> Option<ConsistencyReport> {
        let flow = self.flows.active_flow(&customer.tenant_id)?;
        let handle = self.sessions.get_or_create(&customer.customer_id).await;
        let mut session = handle.lock().await;
        let report = check_session(&flow, &session);

        match report.recommended {
            RecoveryAction::None => {}
            RecoveryAction::ReenterStart => {
                if let Some(start) = flow.resolve_start_state() {
                    info!(
                        customer = %customer.customer_id,
                        issues = ?report.issues,
                        "repairing session: re-entering start state"
                    );
                    if let Err(e) = self.sessions.set_context(&mut session, Default::default()).await
                    {
                        warn!(customer = %customer.customer_id, error = %e, "failed to persist repair");
                    }
                    if let Err(e) = self.sessions.set_state(&mut session, start.token()).await {
                        warn!(customer = %customer.customer_id, error = %e, "failed to persist repair");
                    }
                }
            }
            RecoveryAction::ClearContext => {
                info!(customer = %customer.customer_id, "repairing session: clearing stale context");
                if let Err(e) = self.sessions.set_context(&mut session, Default::default()).await {
                    warn!(customer = %customer.customer_id, error = %e, "failed to persist repair");
                }
            }
        }

        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::actions::{ActionError, ActionExecutor};
    use crate::flows::{ActionName, FlowTransition, InMemoryFlowStore, Trigger};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Gateway that records every send for assertions.
    #[derive(Default)]
    struct RecordingGateway {
        sent: Mutex<Vec<(String, String, Vec<Button>)>>,
    }

    impl RecordingGateway {
        fn sent(&self) -> Vec<(String, String, Vec<Button>)> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl MessageGateway for RecordingGateway {
        async fn send_text(
            &self,
            to: &str,
            body: &str,
        ) -> crate::channels::GatewayResult<crate::channels::Delivery> {
            self.sent
                .lock()
                .push((to.to_string(), body.to_string(), Vec::new()));
            Ok(crate::channels::Delivery {
                message_id: "wamid.test".into(),
            })
        }

        async fn send_buttons(
            &self,
            to: &str,
            body: &str,
            buttons: &[Button],
        ) -> crate::channels::GatewayResult<crate::channels::Delivery> {
            self.sent
                .lock()
                .push((to.to_string(), body.to_string(), buttons.to_vec()));
            Ok(crate::channels::Delivery {
                message_id: "wamid.test".into(),
            })
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl ActionExecutor for FailingExecutor {
        async fn execute(&self, _ctx: &mut ActionContext) -> Result<(), ActionError> {
            Err(ActionError::Failed("payment backend down".into()))
        }
    }

    fn state(name: &str, body: Option<&str>) -> FlowState {
        FlowState {
            name: name.to_string(),
            message_body: body.map(|s| s.to_string()),
            buttons: Vec::new(),
            is_start_state: false,
            requires_context: Vec::new(),
            transitions: Vec::new(),
        }
    }

    fn payment_flow() -> Flow {
        let mut initial = state("Initial", Some("Say hi to begin."));
        initial.is_start_state = true;
        initial.transitions.push(FlowTransition {
            target_state: "Welcome".into(),
            trigger: Trigger::Keyword { value: "hi".into() },
            priority: 10,
            action: None,
        });

        let mut awaiting = state("Awaiting Payment", Some("Choose a payment method."));
        awaiting.buttons.push(Button::new("pay_cash", "Cash"));
        awaiting.transitions.push(FlowTransition {
            target_state: "Paid".into(),
            trigger: Trigger::ButtonId {
                value: "pay_cash".into(),
            },
            priority: 0,
            action: Some(ActionName::HandleCashPayment),
        });

        let mut welcome = state("Welcome", Some("Welcome! What would you like?"));
        welcome.transitions.push(FlowTransition {
            target_state: "Awaiting Payment".into(),
            trigger: Trigger::AnyText,
            priority: 0,
            action: None,
        });

        Flow {
            id: "orders-v1".into(),
            tenant_id: "duka-001".into(),
            name: "Orders".into(),
            active: true,
            start_state: None,
            states: vec![initial, welcome, awaiting, state("Paid", Some("Asante!"))],
        }
    }

    fn engine_with(
        flow: Option<Flow>,
        dispatcher: ActionDispatcher,
    ) -> (ConversationEngine, Arc<RecordingGateway>) {
        let flows = Arc::new(InMemoryFlowStore::with_flows(flow.into_iter().collect()));
        let gateway = Arc::new(RecordingGateway::default());
        let engine = ConversationEngine::new(
            flows,
            Arc::new(SessionStore::new()),
            dispatcher,
            gateway.clone(),
        );
        (engine, gateway)
    }

    fn customer() -> CustomerRef {
        CustomerRef::from_phone("+254700000001", "duka-001")
    }

    #[tokio::test]
    async fn test_keyword_transition_sends_target_message() {
        let (engine, gateway) = engine_with(Some(payment_flow()), ActionDispatcher::new());
        let outcome = engine
            .process_event(&customer(), &InboundEvent::text("+254700000001", "hi"))
            .await;
        assert_eq!(
            outcome,
            TurnOutcome::Transitioned {
                state: "welcome".into(),
                message_sent: true
            }
        );
        let sent = gateway.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "Welcome! What would you like?");
    }

    #[tokio::test]
    async fn test_no_match_reprompts_without_mutation() {
        let (engine, gateway) = engine_with(Some(payment_flow()), ActionDispatcher::new());
        let c = customer();
        // First contact recovers into the start state, then "bye" matches
        // nothing there.
        let outcome = engine
            .process_event(&c, &InboundEvent::text("+254700000001", "bye"))
            .await;
        assert_eq!(
            outcome,
            TurnOutcome::Reprompted {
                state: "initial".into()
            }
        );
        let sent = gateway.sent();
        assert_eq!(
            sent[0].1,
            format!("{} {}", NOT_UNDERSTOOD_PREFIX, "Say hi to begin.")
        );

        let handle = engine.sessions().get_or_create(&c.customer_id).await;
        assert_eq!(handle.lock().await.current_state, "initial");
    }

    #[tokio::test]
    async fn test_failing_action_does_not_block_transition() {
        let dispatcher = ActionDispatcher::new()
            .register(ActionName::HandleCashPayment, Arc::new(FailingExecutor));
        let (engine, gateway) = engine_with(Some(payment_flow()), dispatcher);
        let c = customer();

        // Walk to Awaiting Payment.
        engine
            .process_event(&c, &InboundEvent::text("+254700000001", "hi"))
            .await;
        engine
            .process_event(&c, &InboundEvent::text("+254700000001", "2 sodas"))
            .await;

        let outcome = engine
            .process_event(&c, &InboundEvent::button("+254700000001", "pay_cash", "Cash"))
            .await;
        assert_eq!(
            outcome,
            TurnOutcome::Transitioned {
                state: "paid".into(),
                message_sent: true
            }
        );
        let handle = engine.sessions().get_or_create(&c.customer_id).await;
        assert_eq!(handle.lock().await.current_state, "paid");
        assert_eq!(gateway.sent().last().unwrap().1, "Asante!");
    }

    #[tokio::test]
    async fn test_no_flow_sends_fallback_without_session_mutation() {
        let (engine, gateway) = engine_with(None, ActionDispatcher::new());
        let outcome = engine
            .process_event(&customer(), &InboundEvent::text("+254700000001", "hi"))
            .await;
        assert_eq!(outcome, TurnOutcome::FallbackSent);
        assert_eq!(gateway.sent()[0].1, FALLBACK_MESSAGE);
        assert_eq!(engine.sessions().loaded_count(), 0);
    }

    #[tokio::test]
    async fn test_drift_recovery_commits_even_on_no_match() {
        let (engine, _gateway) = engine_with(Some(payment_flow()), ActionDispatcher::new());
        let c = customer();
        let handle = engine.sessions().get_or_create(&c.customer_id).await;
        {
            let mut session = handle.lock().await;
            session.current_state = "state_from_old_flow_version".into();
        }

        let outcome = engine
            .process_event(&c, &InboundEvent::text("+254700000001", "no keyword here"))
            .await;
        // Recovered to the start state; the event matched nothing there,
        // but the recovery itself is committed.
        assert_eq!(
            outcome,
            TurnOutcome::Reprompted {
                state: "initial".into()
            }
        );
        assert_eq!(handle.lock().await.current_state, "initial");
    }

    #[tokio::test]
    async fn test_drift_recovery_processes_event_same_turn() {
        let (engine, _gateway) = engine_with(Some(payment_flow()), ActionDispatcher::new());
        let c = customer();
        let handle = engine.sessions().get_or_create(&c.customer_id).await;
        {
            let mut session = handle.lock().await;
            session.current_state = "renamed_branch".into();
        }

        let outcome = engine
            .process_event(&c, &InboundEvent::text("+254700000001", "hi"))
            .await;
        assert_eq!(
            outcome,
            TurnOutcome::Transitioned {
                state: "welcome".into(),
                message_sent: true
            }
        );
    }

    #[tokio::test]
    async fn test_idempotent_state_pointer() {
        let (engine, _gateway) = engine_with(Some(payment_flow()), ActionDispatcher::new());
        let c = customer();
        let event = InboundEvent::text("+254700000001", "hi");

        engine.process_event(&c, &event).await;
        let handle = engine.sessions().get_or_create(&c.customer_id).await;
        let first = handle.lock().await.current_state.clone();

        // Reset to the same starting point and replay.
        {
            let mut session = handle.lock().await;
            session.current_state = INITIAL_STATE.into();
        }
        engine.process_event(&c, &event).await;
        assert_eq!(handle.lock().await.current_state, first);
    }

    #[tokio::test]
    async fn test_silent_transition() {
        let mut flow = payment_flow();
        // Point the welcome transition at a silent state.
        flow.states.push(state("Quiet", None));
        flow.states[1].transitions[0].target_state = "Quiet".into();

        let (engine, gateway) = engine_with(Some(flow), ActionDispatcher::new());
        let c = customer();
        engine
            .process_event(&c, &InboundEvent::text("+254700000001", "hi"))
            .await;
        let before = gateway.sent().len();

        let outcome = engine
            .process_event(&c, &InboundEvent::text("+254700000001", "order please"))
            .await;
        assert_eq!(
            outcome,
            TurnOutcome::Transitioned {
                state: "quiet".into(),
                message_sent: false
            }
        );
        assert_eq!(gateway.sent().len(), before);
    }

    #[tokio::test]
    async fn test_reset_session_action_retires_session() {
        let mut flow = payment_flow();
        flow.states[1].transitions[0].action = Some(ActionName::ResetSession);

        let gateway_arc: Arc<dyn MessageGateway> = Arc::new(RecordingGateway::default());
        let dispatcher = ActionDispatcher::with_defaults(gateway_arc);
        let (engine, _gateway) = engine_with(Some(flow), dispatcher);
        let c = customer();

        engine
            .process_event(&c, &InboundEvent::text("+254700000001", "hi"))
            .await;
        engine
            .process_event(&c, &InboundEvent::text("+254700000001", "start over"))
            .await;

        // The store revives retired sessions on next contact.
        let handle = engine.sessions().get_or_create(&c.customer_id).await;
        let session = handle.lock().await;
        assert!(session.is_active);
        assert_eq!(session.current_state, INITIAL_STATE);
    }

    #[tokio::test]
    async fn test_repair_reenters_start_for_missing_context() {
        let mut flow = payment_flow();
        flow.states[2].requires_context = vec!["pending_order_id".into()];
        let (engine, _gateway) = engine_with(Some(flow), ActionDispatcher::new());
        let c = customer();

        let handle = engine.sessions().get_or_create(&c.customer_id).await;
        {
            let mut session = handle.lock().await;
            session.current_state = "awaiting_payment".into();
        }

        let report = engine.repair_customer(&c).await.unwrap();
        assert!(!report.valid);
        assert_eq!(report.recommended, RecoveryAction::ReenterStart);
        assert_eq!(handle.lock().await.current_state, "initial");
    }
}
