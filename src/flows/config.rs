//! Flow definition types.
//!
//! A flow is a tenant-scoped conversation graph: a set of states, each with
//! an optional outbound message and button list, connected by prioritized,
//! trigger-guarded transitions. Definitions are data (loaded from a file or
//! an admin surface) and the engine treats them as read-only per turn.

use serde::{Deserialize, Serialize};

use crate::messages::Button;

/// Normalize a human state name to its storage/comparison token:
/// trimmed, lowercased, spaces replaced with underscores.
///
/// `"Awaiting Payment"` → `"awaiting_payment"`.
pub fn normalize_state_token(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// A tenant's conversation flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    /// Unique identifier for the flow.
    pub id: String,
    /// Tenant (business/group) this flow belongs to.
    pub tenant_id: String,
    /// Human-readable name.
    pub name: String,
    /// Whether this is the tenant's active flow. At most one flow per
    /// tenant may be active at a time.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Explicitly designated start state name, if any.
    #[serde(default)]
    pub start_state: Option<String>,
    /// States in definition order.
    pub states: Vec<FlowState>,
}

fn default_active() -> bool {
    true
}

impl Flow {
    /// Look up a state by its normalized token.
    pub fn find_state(&self, token: &str) -> Option<&FlowState> {
        self.states.iter().find(|s| s.token() == token)
    }

    /// Resolve the flow's start state: the explicitly designated state,
    /// else the first state flagged `is_start_state`, else the first state
    /// in definition order.
    pub fn resolve_start_state(&self) -> Option<&FlowState> {
        if let Some(name) = &self.start_state {
            let token = normalize_state_token(name);
            if let Some(state) = self.find_state(&token) {
                return Some(state);
            }
        }
        self.states
            .iter()
            .find(|s| s.is_start_state)
            .or_else(|| self.states.first())
    }
}

/// A node in a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowState {
    /// Human name; compared via [`normalize_state_token`].
    pub name: String,
    /// Message sent to the customer on entering this state. A state without
    /// a body produces a silent entry.
    #[serde(default)]
    pub message_body: Option<String>,
    /// Quick-reply buttons attached to the state message.
    #[serde(default)]
    pub buttons: Vec<Button>,
    /// Marks this state as a start-state candidate.
    #[serde(default)]
    pub is_start_state: bool,
    /// Context keys that must be present in the session for this state to
    /// be well-formed (e.g. a payment state requiring a pending order id).
    #[serde(default)]
    pub requires_context: Vec<String>,
    /// Outgoing transitions in definition order.
    #[serde(default)]
    pub transitions: Vec<FlowTransition>,
}

impl FlowState {
    /// Normalized storage token for this state.
    pub fn token(&self) -> String {
        normalize_state_token(&self.name)
    }

    /// Outgoing transitions sorted by descending priority. The sort is
    /// stable, so equal priorities keep definition order.
    pub fn sorted_transitions(&self) -> Vec<&FlowTransition> {
        let mut transitions: Vec<&FlowTransition> = self.transitions.iter().collect();
        transitions.sort_by_key(|t| std::cmp::Reverse(t.priority));
        transitions
    }

    /// A state is terminal if it has no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        self.transitions.is_empty()
    }
}

/// A directed, prioritized, trigger-guarded edge between two states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowTransition {
    /// Name of the target state.
    pub target_state: String,
    /// Matching rule for this transition.
    pub trigger: Trigger,
    /// Higher priorities are evaluated first; ties break by definition order.
    #[serde(default)]
    pub priority: i32,
    /// Action invoked when this transition fires.
    #[serde(default)]
    pub action: Option<ActionName>,
}

impl FlowTransition {
    /// Normalized token of the target state.
    pub fn target_token(&self) -> String {
        normalize_state_token(&self.target_state)
    }
}

/// Matching rule attached to a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Exact, case-sensitive match on a quick-reply button id.
    ButtonId {
        /// System-generated button payload id.
        value: String,
    },
    /// Exact keyword match on text messages (trimmed, case-insensitive).
    Keyword {
        /// Keyword to match.
        value: String,
    },
    /// Catch-all for any non-empty text message.
    AnyText,
    /// Internal trigger, never matched against user input.
    System,
}

/// Named, externally implemented side-effecting operations a transition can
/// invoke. A closed set: unknown identifiers are rejected when the flow
/// definition is parsed, not at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionName {
    CreateOrder,
    TrackOrder,
    CancelOrder,
    HandleMpesaPayment,
    HandleCashPayment,
    HandlePaymentConfirmation,
    SendWelcomeMessage,
    SendHelpMessage,
    SendPaymentOptions,
    ContactSupport,
    NoAction,
    ResetSession,
}

impl std::fmt::Display for ActionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CreateOrder => "CREATE_ORDER",
            Self::TrackOrder => "TRACK_ORDER",
            Self::CancelOrder => "CANCEL_ORDER",
            Self::HandleMpesaPayment => "HANDLE_MPESA_PAYMENT",
            Self::HandleCashPayment => "HANDLE_CASH_PAYMENT",
            Self::HandlePaymentConfirmation => "HANDLE_PAYMENT_CONFIRMATION",
            Self::SendWelcomeMessage => "SEND_WELCOME_MESSAGE",
            Self::SendHelpMessage => "SEND_HELP_MESSAGE",
            Self::SendPaymentOptions => "SEND_PAYMENT_OPTIONS",
            Self::ContactSupport => "CONTACT_SUPPORT",
            Self::NoAction => "NO_ACTION",
            Self::ResetSession => "RESET_SESSION",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(name: &str) -> FlowState {
        FlowState {
            name: name.to_string(),
            message_body: None,
            buttons: Vec::new(),
            is_start_state: false,
            requires_context: Vec::new(),
            transitions: Vec::new(),
        }
    }

    #[test]
    fn test_normalize_state_token() {
        assert_eq!(normalize_state_token("Awaiting Payment"), "awaiting_payment");
        assert_eq!(normalize_state_token("  WELCOME "), "welcome");
        assert_eq!(normalize_state_token("paid"), "paid");
    }

    #[test]
    fn test_find_state_by_token() {
        let flow = Flow {
            id: "f1".into(),
            tenant_id: "t1".into(),
            name: "Orders".into(),
            active: true,
            start_state: None,
            states: vec![state("Awaiting Payment"), state("Paid")],
        };
        assert!(flow.find_state("awaiting_payment").is_some());
        assert!(flow.find_state("Awaiting Payment").is_none());
        assert!(flow.find_state("missing").is_none());
    }

    #[test]
    fn test_start_state_explicit_wins() {
        let mut welcome = state("Welcome");
        welcome.is_start_state = true;
        let flow = Flow {
            id: "f1".into(),
            tenant_id: "t1".into(),
            name: "Orders".into(),
            active: true,
            start_state: Some("Menu".into()),
            states: vec![welcome, state("Menu")],
        };
        assert_eq!(flow.resolve_start_state().unwrap().token(), "menu");
    }

    #[test]
    fn test_start_state_flag_then_first() {
        let mut flagged = state("Flagged");
        flagged.is_start_state = true;
        let flow = Flow {
            id: "f1".into(),
            tenant_id: "t1".into(),
            name: "Orders".into(),
            active: true,
            start_state: None,
            states: vec![state("First"), flagged],
        };
        assert_eq!(flow.resolve_start_state().unwrap().token(), "flagged");

        let flow = Flow {
            id: "f2".into(),
            tenant_id: "t1".into(),
            name: "Orders".into(),
            active: true,
            start_state: None,
            states: vec![state("First"), state("Second")],
        };
        assert_eq!(flow.resolve_start_state().unwrap().token(), "first");
    }

    #[test]
    fn test_sorted_transitions_stable_desc() {
        let mut s = state("Menu");
        for (target, priority) in [("a", 1), ("b", 5), ("c", 5), ("d", 10)] {
            s.transitions.push(FlowTransition {
                target_state: target.to_string(),
                trigger: Trigger::AnyText,
                priority,
                action: None,
            });
        }
        let order: Vec<&str> = s
            .sorted_transitions()
            .iter()
            .map(|t| t.target_state.as_str())
            .collect();
        // Descending priority; b before c because b is defined first.
        assert_eq!(order, vec!["d", "b", "c", "a"]);
    }

    #[test]
    fn test_action_name_parse_rejects_unknown() {
        let ok: Result<ActionName, _> = serde_json::from_str("\"CREATE_ORDER\"");
        assert_eq!(ok.unwrap(), ActionName::CreateOrder);
        let err: Result<ActionName, _> = serde_json::from_str("\"LAUNCH_ROCKET\"");
        assert!(err.is_err());
    }

    #[test]
    fn test_trigger_parse() {
        let t: Trigger = json5::from_str(r#"{ kind: "keyword", value: "hi" }"#).unwrap();
        assert_eq!(
            t,
            Trigger::Keyword {
                value: "hi".into()
            }
        );
        let t: Trigger = json5::from_str(r#"{ kind: "any_text" }"#).unwrap();
        assert_eq!(t, Trigger::AnyText);
    }
}
