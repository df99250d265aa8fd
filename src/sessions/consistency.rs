//! Session/state consistency checking.
//!
//! State changes arrive from several entry points (webhook turns, scheduled
//! jobs, admin resets), which opens windows where a session's stored state
//! and its context bag drift apart: a state token that no longer exists in
//! the active flow, or a state whose upstream context never arrived. This
//! module is the single place that decides whether a `(current_state,
//! context_data)` pairing is well-formed and what recovery to apply.

use serde::{Deserialize, Serialize};

use crate::flows::Flow;
use crate::sessions::{Session, INITIAL_STATE};

/// Recommended recovery for an inconsistent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Nothing to do.
    None,
    /// Re-enter the flow's start state.
    ReenterStart,
    /// Keep the state, drop leftover context from a previous conversation.
    ClearContext,
}

/// Outcome of a consistency check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyReport {
    /// Whether the session is well-formed for the flow.
    pub valid: bool,
    /// Specific findings, empty when fully consistent.
    pub issues: Vec<String>,
    /// What to do about it.
    pub recommended: RecoveryAction,
}

impl ConsistencyReport {
    fn ok() -> Self {
        Self {
            valid: true,
            issues: Vec::new(),
            recommended: RecoveryAction::None,
        }
    }
}

/// Check a session against the tenant's active flow.
///
/// Rules, in order of severity:
/// - `current_state` missing from the flow (state drift) → invalid,
///   re-enter the start state.
/// - state present but its `requires_context` keys are absent → invalid,
///   re-enter the start state (the conversation skipped the step that
///   should have produced the context).
/// - session sits at the start state with leftover context → valid but
///   flagged; the context belongs to a finished conversation and should be
///   cleared in place.
pub fn check_session(flow: &Flow, session: &Session) -> ConsistencyReport {
    // The initial sentinel is expected before first contact resolves it.
    if session.current_state == INITIAL_STATE && session.context_data.is_empty() {
        return ConsistencyReport::ok();
    }

    let Some(state) = flow.find_state(&session.current_state) else {
        return ConsistencyReport {
            valid: false,
            issues: vec![format!(
                "state '{}' does not exist in active flow '{}'",
                session.current_state, flow.id
            )],
            recommended: RecoveryAction::ReenterStart,
        };
    };

    let missing: Vec<&String> = state
        .requires_context
        .iter()
        .filter(|key| !session.context_data.contains_key(key.as_str()))
        .collect();
    if !missing.is_empty() {
        return ConsistencyReport {
            valid: false,
            issues: missing
                .into_iter()
                .map(|key| {
                    format!(
                        "state '{}' requires context key '{}' which is absent",
                        state.name, key
                    )
                })
                .collect(),
            recommended: RecoveryAction::ReenterStart,
        };
    }

    let at_start = flow
        .resolve_start_state()
        .map(|s| s.token() == session.current_state)
        .unwrap_or(false);
    if at_start && !session.context_data.is_empty() {
        return ConsistencyReport {
            valid: true,
            issues: vec![format!(
                "session carries {} leftover context key(s) at the start state",
                session.context_data.len()
            )],
            recommended: RecoveryAction::ClearContext,
        };
    }

    ConsistencyReport::ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::{FlowState, FlowTransition, Trigger};

    fn flow_with_payment_state() -> Flow {
        Flow {
            id: "orders-v1".into(),
            tenant_id: "t1".into(),
            name: "Orders".into(),
            active: true,
            start_state: None,
            states: vec![
                FlowState {
                    name: "Welcome".into(),
                    message_body: Some("Hi".into()),
                    buttons: Vec::new(),
                    is_start_state: true,
                    requires_context: Vec::new(),
                    transitions: vec![FlowTransition {
                        target_state: "Awaiting Payment".into(),
                        trigger: Trigger::AnyText,
                        priority: 0,
                        action: None,
                    }],
                },
                FlowState {
                    name: "Awaiting Payment".into(),
                    message_body: Some("Pay now".into()),
                    buttons: Vec::new(),
                    is_start_state: false,
                    requires_context: vec!["pending_order_id".into()],
                    transitions: Vec::new(),
                },
            ],
        }
    }

    #[test]
    fn test_valid_state_with_required_context() {
        let flow = flow_with_payment_state();
        let mut session = Session::new("c1");
        session.current_state = "awaiting_payment".into();
        session
            .context_data
            .insert("pending_order_id".into(), serde_json::json!(7));
        let report = check_session(&flow, &session);
        assert!(report.valid);
        assert!(report.issues.is_empty());
        assert_eq!(report.recommended, RecoveryAction::None);
    }

    #[test]
    fn test_payment_state_without_order_context() {
        let flow = flow_with_payment_state();
        let mut session = Session::new("c1");
        session.current_state = "awaiting_payment".into();
        let report = check_session(&flow, &session);
        assert!(!report.valid);
        assert!(report.issues[0].contains("pending_order_id"));
        assert_eq!(report.recommended, RecoveryAction::ReenterStart);
    }

    #[test]
    fn test_unknown_state_is_drift() {
        let flow = flow_with_payment_state();
        let mut session = Session::new("c1");
        session.current_state = "gone_state".into();
        let report = check_session(&flow, &session);
        assert!(!report.valid);
        assert_eq!(report.recommended, RecoveryAction::ReenterStart);
    }

    #[test]
    fn test_initial_sentinel_is_fine() {
        let flow = flow_with_payment_state();
        let session = Session::new("c1");
        assert!(check_session(&flow, &session).valid);
    }

    #[test]
    fn test_leftover_context_at_start_state() {
        let flow = flow_with_payment_state();
        let mut session = Session::new("c1");
        session.current_state = "welcome".into();
        session
            .context_data
            .insert("pending_order_id".into(), serde_json::json!(7));
        let report = check_session(&flow, &session);
        assert!(report.valid);
        assert_eq!(report.recommended, RecoveryAction::ClearContext);
        assert_eq!(report.issues.len(), 1);
    }
}
