//! Conversation sessions.
//!
//! One session per customer: a persisted pointer into the active flow
//! (`current_state`) plus a free-form context bag that actions use to pass
//! data to one another. Sessions are never physically deleted; they are
//! logically retired via `is_active` or stale-session cleanup.

pub mod consistency;
pub mod store;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use consistency::{check_session, ConsistencyReport, RecoveryAction};
pub use store::{SessionHandle, SessionStore, SessionStoreError};

/// Sentinel state token for sessions that have not matched any flow state
/// yet. Not required to exist in a flow; the engine recovers to the flow's
/// start state on first contact.
pub const INITIAL_STATE: &str = "initial";

/// Per-customer conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Owning customer id.
    pub customer_id: String,
    /// Normalized token of the customer's current flow state.
    pub current_state: String,
    /// Open key/value bag for action-to-action data passing.
    #[serde(default)]
    pub context_data: HashMap<String, serde_json::Value>,
    /// Logical-retirement flag; retired sessions are replaced on next contact.
    #[serde(default = "default_is_active")]
    pub is_active: bool,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Last mutation time; drives stale-session cleanup.
    pub updated_at: DateTime<Utc>,
}

fn default_is_active() -> bool {
    true
}

impl Session {
    /// Create a fresh session in the initial sentinel state.
    pub fn new(customer_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            customer_id: customer_id.into(),
            current_state: INITIAL_STATE.to_string(),
            context_data: HashMap::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Bump `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
