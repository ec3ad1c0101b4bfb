//! Node registry - maps node kinds to handlers.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::types::{Node, NodeContext, NodeKind, NodeResult};
use super::{
    DelayNode, ErrorHandlerNode, HttpRequestNode, IfElseNode, LoopNode, SetNode,
    SubWorkflowNode, SwitchNode, TriggerNode, WebhookNode,
};
use crate::error::{Error, Result};

/// Registry of available node types.
///
/// Built-in kinds are registered by [`NodeRegistry::new`]; any other tag can
/// be added at runtime and is stored under [`NodeKind::Custom`].
#[derive(Clone)]
pub struct NodeRegistry {
    nodes: HashMap<NodeKind, Arc<dyn Node>>,
}

impl NodeRegistry {
    /// Create a new registry with the built-in nodes.
    pub fn new() -> Self {
        let mut registry = Self::empty();

        registry.register(Arc::new(TriggerNode::manual()));
        registry.register(Arc::new(TriggerNode::webhook()));
        registry.register(Arc::new(TriggerNode::schedule()));
        registry.register(Arc::new(IfElseNode::new()));
        registry.register(Arc::new(SwitchNode::new()));
        registry.register(Arc::new(LoopNode::new()));
        registry.register(Arc::new(ErrorHandlerNode::new()));
        registry.register(Arc::new(SetNode::new()));
        registry.register(Arc::new(DelayNode::new()));
        registry.register(Arc::new(HttpRequestNode::new()));
        registry.register(Arc::new(WebhookNode::new()));
        registry.register(Arc::new(SubWorkflowNode::new()));

        registry
    }

    /// Create an empty registry (for testing).
    pub fn empty() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Register a node under its own kind, replacing any previous handler.
    pub fn register(&mut self, node: Arc<dyn Node>) {
        self.nodes.insert(node.kind(), node);
    }

    /// Register a node under an explicit type tag.
    pub fn register_as(&mut self, type_tag: &str, node: Arc<dyn Node>) {
        self.nodes.insert(NodeKind::from_tag(type_tag), node);
    }

    /// Look up the handler for a type tag.
    pub fn resolve(&self, type_tag: &str) -> Option<Arc<dyn Node>> {
        self.get(&NodeKind::from_tag(type_tag))
    }

    /// Get a node by kind.
    pub fn get(&self, kind: &NodeKind) -> Option<Arc<dyn Node>> {
        self.nodes.get(kind).cloned()
    }

    /// Check if a node type is registered.
    pub fn has(&self, type_tag: &str) -> bool {
        self.nodes.contains_key(&NodeKind::from_tag(type_tag))
    }

    /// Execute a node by type tag.
    pub async fn execute(
        &self,
        type_tag: &str,
        config: &Value,
        ctx: &NodeContext,
    ) -> Result<NodeResult> {
        let node = self
            .resolve(type_tag)
            .ok_or_else(|| Error::Node(format!("Unknown node type: {}", type_tag)))?;

        node.execute(config, ctx).await
    }

    /// List all registered type tags, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.nodes.keys().map(|k| k.as_str()).collect();
        tags.sort_unstable();
        tags
    }

    /// Get descriptions of all registered nodes, sorted by tag.
    pub fn descriptions(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<(&str, &str)> = self
            .nodes
            .iter()
            .map(|(kind, node)| (kind.as_str(), node.description()))
            .collect();
        out.sort_unstable_by_key(|(tag, _)| *tag);
        out
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
