//! Flow System Module
//!
//! Data-defined conversation graphs: each tenant (business) has one active
//! flow made of states and prioritized, trigger-guarded transitions. The
//! engine interprets the active flow per inbound event; definitions live
//! outside the engine and may change between turns.
//!
//! # Example Flow Definition
//!
//! ```json5
//! [
//!   {
//!     id: "orders-v1",
//!     tenant_id: "duka-001",
//!     name: "Order taking",
//!     states: [
//!       {
//!         name: "Initial",
//!         is_start_state: true,
//!         message_body: "Karibu! Say hi to begin.",
//!         transitions: [
//!           { target_state: "Welcome", trigger: { kind: "keyword", value: "hi" }, priority: 10 },
//!         ],
//!       },
//!       {
//!         name: "Welcome",
//!         message_body: "What would you like to order?",
//!         transitions: [
//!           { target_state: "Awaiting Payment", trigger: { kind: "any_text" }, action: "CREATE_ORDER" },
//!         ],
//!       },
//!       {
//!         name: "Awaiting Payment",
//!         message_body: "Please choose your payment method:",
//!         requires_context: ["pending_order_id"],
//!         buttons: [
//!           { id: "pay_with_m-pesa", title: "M-Pesa" },
//!           { id: "pay_cash", title: "Cash on Delivery" },
//!         ],
//!         transitions: [
//!           { target_state: "Paid", trigger: { kind: "button_id", value: "pay_cash" }, action: "HANDLE_CASH_PAYMENT" },
//!         ],
//!       },
//!       { name: "Paid", message_body: "Asante! Your order is confirmed." },
//!     ],
//!   },
//! ]
//! ```

pub mod config;
pub mod store;

pub use config::{
    normalize_state_token, ActionName, Flow, FlowState, FlowTransition, Trigger,
};
pub use store::{load_flows_file, validate_flow, FlowProvider, FlowStoreError, InMemoryFlowStore};
