//! Flow store.
//!
//! Read-only provider of the single active flow per tenant, plus loading and
//! structural validation of flow definition files. The engine clones the
//! flow per turn; nothing holds state/transition identity across requests,
//! so definitions can be replaced while conversations are live.

use std::collections::HashSet;
use std::path::Path;

use parking_lot::RwLock;
use tracing::info;

use crate::flows::config::{normalize_state_token, Flow, Trigger};

/// Errors from loading flow definitions.
#[derive(Debug, thiserror::Error)]
pub enum FlowStoreError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse flow definitions: {0}")]
    Parse(String),
    #[error("invalid flow '{flow_id}': {issues:?}")]
    Invalid { flow_id: String, issues: Vec<String> },
}

/// Provider of active flows, read-only from the engine's perspective.
pub trait FlowProvider: Send + Sync {
    /// Return the tenant's single active flow, if one is configured.
    /// Implementations return an owned clone so callers never share graph
    /// object identity across turns.
    fn active_flow(&self, tenant_id: &str) -> Option<Flow>;
}

/// In-memory flow store. Definitions are replaced wholesale on reload.
#[derive(Debug, Default)]
pub struct InMemoryFlowStore {
    flows: RwLock<Vec<Flow>>,
}

impl InMemoryFlowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from already-validated flows.
    pub fn with_flows(flows: Vec<Flow>) -> Self {
        Self {
            flows: RwLock::new(flows),
        }
    }

    /// Load and validate flow definitions from a JSON5 file.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, FlowStoreError> {
        let flows = load_flows_file(path)?;
        Ok(Self::with_flows(flows))
    }

    /// Replace all definitions.
    pub fn replace_all(&self, flows: Vec<Flow>) {
        let count = flows.len();
        *self.flows.write() = flows;
        info!(count, "flow definitions replaced");
    }

    /// Number of loaded flows.
    pub fn flow_count(&self) -> usize {
        self.flows.read().len()
    }
}

impl FlowProvider for InMemoryFlowStore {
    fn active_flow(&self, tenant_id: &str) -> Option<Flow> {
        self.flows
            .read()
            .iter()
            .find(|f| f.active && f.tenant_id == tenant_id)
            .cloned()
    }
}

/// Load flow definitions from a JSON5 file, failing on structural problems.
pub fn load_flows_file(path: impl AsRef<Path>) -> Result<Vec<Flow>, FlowStoreError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| FlowStoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let flows: Vec<Flow> =
        json5::from_str(&raw).map_err(|e| FlowStoreError::Parse(e.to_string()))?;

    for flow in &flows {
        let issues = validate_flow(flow);
        if !issues.is_empty() {
            return Err(FlowStoreError::Invalid {
                flow_id: flow.id.clone(),
                issues,
            });
        }
    }
    if let Some(issue) = check_active_uniqueness(&flows) {
        return Err(FlowStoreError::Parse(issue));
    }

    info!(count = flows.len(), path = %path.display(), "loaded flow definitions");
    Ok(flows)
}

/// Structural validation of a single flow. Returns human-readable findings;
/// an empty list means the flow is well-formed.
pub fn validate_flow(flow: &Flow) -> Vec<String> {
    let mut issues = Vec::new();

    if flow.states.is_empty() {
        issues.push("flow has no states".to_string());
        return issues;
    }

    let mut tokens = HashSet::new();
    for state in &flow.states {
        if !tokens.insert(state.token()) {
            issues.push(format!("duplicate state token '{}'", state.token()));
        }
    }

    if flow.resolve_start_state().is_none() {
        issues.push("no resolvable start state".to_string());
    }
    if let Some(name) = &flow.start_state {
        if !tokens.contains(&normalize_state_token(name)) {
            issues.push(format!("designated start state '{}' does not exist", name));
        }
    }

    for state in &flow.states {
        for transition in &state.transitions {
            if !tokens.contains(&transition.target_token()) {
                issues.push(format!(
                    "state '{}' has a transition to unknown state '{}'",
                    state.name, transition.target_state
                ));
            }
            match &transition.trigger {
                Trigger::ButtonId { value } if value.is_empty() => issues.push(format!(
                    "state '{}' has a button trigger with an empty id",
                    state.name
                )),
                Trigger::Keyword { value } if value.trim().is_empty() => issues.push(format!(
                    "state '{}' has a keyword trigger with an empty value",
                    state.name
                )),
                _ => {}
            }
        }
    }

    issues
}

/// At most one active flow per tenant.
fn check_active_uniqueness(flows: &[Flow]) -> Option<String> {
    let mut active_tenants = HashSet::new();
    for flow in flows.iter().filter(|f| f.active) {
        if !active_tenants.insert(flow.tenant_id.as_str()) {
            return Some(format!(
                "tenant '{}' has more than one active flow",
                flow.tenant_id
            ));
        }
    }
    None
}
