//! Per-run mutable state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::ExecutionError;

/// One active loop in the current path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopFrame {
    pub node_id: String,
    pub iteration: usize,
    pub max_iterations: usize,
}

/// State owned by a single engine for the lifetime of a single run.
///
/// Only the engine writes to it. Handlers see a read-only snapshot through
/// [`NodeContext`](crate::nodes::NodeContext).
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub execution_id: String,
    /// Free-form scratch space available to handlers
    pub variables: HashMap<String, Value>,
    /// Last result produced by each node
    pub outputs: HashMap<String, Value>,
    /// When each node last started
    pub checkpoints: HashMap<String, DateTime<Utc>>,
    /// Node-level failures in the order they happened, recovered or not
    pub errors: Vec<ExecutionError>,
    pub loop_stack: Vec<LoopFrame>,
    /// Most recent node whose handler completed
    pub last_completed: Option<String>,
    pub nodes_executed: usize,
}

impl ExecutionContext {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            ..Self::default()
        }
    }

    pub fn with_variables(mut self, variables: HashMap<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn checkpoint(&mut self, node_id: &str) {
        self.checkpoints.insert(node_id.to_string(), Utc::now());
    }

    /// Store a node's result and count it as executed.
    pub fn complete(&mut self, node_id: &str, output: Value) {
        self.outputs.insert(node_id.to_string(), output);
        self.last_completed = Some(node_id.to_string());
        self.nodes_executed += 1;
    }

    pub fn record_error(&mut self, node_id: &str, message: impl Into<String>) {
        self.errors.push(ExecutionError {
            node_id: node_id.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn get_output(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }

    pub fn loop_depth(&self) -> usize {
        self.loop_stack.len()
    }

    pub fn push_loop(&mut self, node_id: &str, max_iterations: usize) {
        self.loop_stack.push(LoopFrame {
            node_id: node_id.to_string(),
            iteration: 0,
            max_iterations,
        });
    }

    /// Update the iteration counter of the innermost loop.
    pub fn set_iteration(&mut self, iteration: usize) {
        if let Some(frame) = self.loop_stack.last_mut() {
            frame.iteration = iteration;
        }
    }

    pub fn pop_loop(&mut self) -> Option<LoopFrame> {
        self.loop_stack.pop()
    }
}
