//! Workflow definition, parsing, and graph construction.
//!
//! A workflow is a list of nodes plus a list of edges. Edges carry no
//! semantics of their own; what a fan-out means is decided by the source
//! node's control-flow class and the target node's branch/case tag.

mod graph;
mod parser;
mod types;

pub use graph::{validate, Diagnostic, Diagnostics, ExecutionGraph};
pub use parser::{parse_workflow, parse_workflow_file};
pub use types::*;
