//! dukabot: a conversation engine for WhatsApp order-taking.
//!
//! Small businesses take orders over WhatsApp; dukabot drives those
//! conversations from data-defined flows instead of code. A flow is a graph
//! of states connected by prioritized, trigger-guarded transitions; the
//! engine resolves each inbound customer message against the customer's
//! session, fires at most one transition (with its optional side-effecting
//! action) and replies with the new state's message.
//!
//! The main pieces:
//! - [`flows`] -- flow definition types, loading and validation
//! - [`sessions`] -- per-customer session state, persistence, consistency
//! - [`engine`] -- trigger matching, action dispatch, turn orchestration
//! - [`channels`] -- outbound messaging gateways (WhatsApp Cloud API)
//! - [`server`] -- the inbound webhook surface

pub mod channels;
pub mod cli;
pub mod config;
pub mod engine;
pub mod flows;
pub mod logging;
pub mod messages;
pub mod server;
pub mod sessions;
