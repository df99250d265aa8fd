//! Conversation engine: trigger matching, action dispatch and turn
//! orchestration over the flow and session stores.

pub mod actions;
pub mod matcher;
pub mod orchestrator;

pub use actions::{ActionContext, ActionDispatcher, ActionError, ActionExecutor};
pub use matcher::match_transition;
pub use orchestrator::{
    ConversationEngine, CustomerRef, TurnOutcome, FALLBACK_MESSAGE, NOT_UNDERSTOOD_PREFIX,
};
