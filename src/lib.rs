//! nodeflow - graph workflow execution core
//!
//! nodeflow interprets a user-authored graph of nodes and edges. It walks the
//! graph depth-first from its trigger, dispatches each node to a handler,
//! passes each result to the node's children, and isolates failing external
//! services behind per-resource circuit breakers.
//!
//! ## Example
//!
//! ```yaml
//! name: order-alert
//! nodes:
//!   - id: start
//!     type: manual_trigger
//!   - id: check
//!     type: if_else
//!     config:
//!       value1: "{{input.total}}"
//!       operator: greater_than
//!       value2: 100
//!   - id: notify
//!     type: webhook
//!     branchTag: "true"
//!     config:
//!       url: https://hooks.example.com/orders
//! edges:
//!   - { source: start, target: check }
//!   - { source: check, target: notify }
//! ```

pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod nodes;
pub mod storage;
pub mod telemetry;
pub mod workflow;

pub use engine::{Engine, ExecutionResult};
pub use error::{Error, Result, WorkflowFailure};
