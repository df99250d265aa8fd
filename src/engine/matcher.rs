//! Trigger matching.
//!
//! Pure first-match-wins resolution of an inbound event against a state's
//! priority-sorted transitions. Ordering is significant: a catch-all
//! `any_text` trigger placed above a keyword shadows it, which is a
//! flow-authoring responsibility, not something the matcher corrects.

use crate::flows::{FlowTransition, Trigger};
use crate::messages::{EventKind, InboundEvent};

/// Return the first transition whose trigger matches the event, or `None`.
/// `transitions` must already be sorted by descending priority (see
/// [`crate::flows::FlowState::sorted_transitions`]).
pub fn match_transition<'a>(
    transitions: &[&'a FlowTransition],
    event: &InboundEvent,
) -> Option<&'a FlowTransition> {
    transitions
        .iter()
        .find(|t| matches_trigger(&t.trigger, event))
        .copied()
}

/// Evaluate a single trigger against an event.
fn matches_trigger(trigger: &Trigger, event: &InboundEvent) -> bool {
    match trigger {
        // Button ids are system-generated tokens: exact and case-sensitive.
        Trigger::ButtonId { value } => {
            event.kind == EventKind::Button && event.button_id.as_deref() == Some(value.as_str())
        }
        // Exact keyword equality on trimmed, lowercased text. Deliberately
        // no substring matching, to avoid accidental transitions.
        Trigger::Keyword { value } => {
            event.kind == EventKind::Text
                && event.trimmed_text().to_lowercase() == value.trim().to_lowercase()
        }
        Trigger::AnyText => event.kind == EventKind::Text && !event.trimmed_text().is_empty(),
        // System triggers are driven internally, never by user input.
        Trigger::System => false,
    }
}
