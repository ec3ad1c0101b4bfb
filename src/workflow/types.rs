//! Workflow type definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A complete workflow definition as produced by the authoring tool.
///
/// # Example YAML
///
/// ```yaml
/// name: order-alert
/// nodes:
///   - id: start
///     type: manual_trigger
///   - id: check
///     type: if_else
///     config:
///       value1: "{{input.total}}"
///       operator: greater_than
///       value2: 100
///   - id: notify
///     type: webhook
///     branchTag: "true"
///     config:
///       url: https://hooks.example.com/orders
/// edges:
///   - { source: start, target: check }
///   - { source: check, target: notify }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name, used in logs and run records
    #[serde(default)]
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Initial values for the run's variable scratch space
    #[serde(default)]
    pub variables: HashMap<String, Value>,

    /// Nodes in the graph
    pub nodes: Vec<Node>,

    /// Directed edges between nodes, in declaration order
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// A node in the workflow graph.
///
/// Nodes are immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique node ID within this workflow
    pub id: String,

    /// Node type tag (manual_trigger, if_else, http_request, ...)
    #[serde(rename = "type", alias = "typeTag")]
    pub type_tag: String,

    /// Display label
    #[serde(default)]
    pub label: String,

    /// Node-specific configuration
    #[serde(default = "empty_config")]
    pub config: Value,

    /// Selects this node as the "true" or "false" child of an if_else parent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_tag: Option<String>,

    /// Selects this node as a case child of a switch parent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_tag: Option<String>,
}

fn empty_config() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Node {
    pub fn new(id: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_tag: type_tag.into(),
            label: String::new(),
            config: empty_config(),
            branch_tag: None,
            case_tag: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_branch(mut self, tag: impl Into<String>) -> Self {
        self.branch_tag = Some(tag.into());
        self
    }

    pub fn with_case(mut self, tag: impl Into<String>) -> Self {
        self.case_tag = Some(tag.into());
        self
    }
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}
