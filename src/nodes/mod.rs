//! Node implementations.
//!
//! Nodes are the building blocks of workflows. Each handler receives its
//! node's config plus a read-only [`NodeContext`] and returns a
//! [`NodeResult`]; the engine decides what happens next from the handler's
//! [`ControlFlow`] class.

mod delay;
mod error_handler;
mod http;
mod if_else;
mod loop_node;
mod registry;
mod set;
mod subworkflow;
mod switch;
pub mod template;
mod trigger;
mod types;

pub use delay::DelayNode;
pub use error_handler::ErrorHandlerNode;
pub use http::{HttpRequestNode, WebhookNode};
pub use if_else::{evaluate, IfElseNode};
pub use loop_node::LoopNode;
pub use registry::NodeRegistry;
pub use set::SetNode;
pub use subworkflow::SubWorkflowNode;
pub use switch::SwitchNode;
pub use trigger::TriggerNode;
pub use types::{
    missing_required_field, ControlFlow, Node, NodeContext, NodeKind, NodeResult,
};
