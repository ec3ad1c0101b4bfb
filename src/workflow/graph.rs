//! Execution graph construction and structural validation.

use std::collections::{HashMap, HashSet};
use std::fmt;

use super::types::{Edge, Node};
use crate::config::EngineConfig;
use crate::error::StructuralError;

/// Adjacency map built once per run and read-only afterwards.
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    nodes: HashMap<String, Node>,
    /// Node IDs in declaration order
    order: Vec<String>,
    /// Children of each node, in edge-declaration order
    adjacency: HashMap<String, Vec<String>>,
}

impl ExecutionGraph {
    /// Build the adjacency map.
    ///
    /// Fails only on references that make the graph unusable: duplicate node
    /// IDs and edges pointing at nodes that do not exist.
    pub fn build(nodes: &[Node], edges: &[Edge]) -> Result<Self, StructuralError> {
        let mut by_id = HashMap::with_capacity(nodes.len());
        let mut order = Vec::with_capacity(nodes.len());
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::with_capacity(nodes.len());

        for node in nodes {
            if by_id.insert(node.id.clone(), node.clone()).is_some() {
                return Err(StructuralError::DuplicateNode(node.id.clone()));
            }
            order.push(node.id.clone());
            adjacency.insert(node.id.clone(), Vec::new());
        }

        for edge in edges {
            if !by_id.contains_key(&edge.source) {
                return Err(StructuralError::UnknownNode(edge.source.clone()));
            }
            if !by_id.contains_key(&edge.target) {
                return Err(StructuralError::UnknownNode(edge.target.clone()));
            }
            adjacency
                .entry(edge.source.clone())
                .or_default()
                .push(edge.target.clone());
        }

        Ok(Self {
            nodes: by_id,
            order,
            adjacency,
        })
    }

    /// Look up a node by ID.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Children of a node in edge-declaration order.
    pub fn children(&self, id: &str) -> &[String] {
        self.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// IDs of all nodes matching the trigger predicate, in declaration order.
    pub fn triggers(&self, config: &EngineConfig) -> Vec<&str> {
        self.nodes()
            .filter(|n| config.is_trigger(&n.type_tag))
            .map(|n| n.id.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Detect a directed cycle.
    ///
    /// Roots are tried in declaration order and children in edge order, so
    /// the reported node is stable for a given graph.
    pub fn find_cycle(&self) -> Option<&str> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for id in &self.order {
            if !visited.contains(id.as_str()) {
                if let Some(found) = self.dfs(id, &mut visited, &mut rec_stack) {
                    return Some(found);
                }
            }
        }

        None
    }

    fn dfs<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
    ) -> Option<&'a str> {
        visited.insert(node);
        rec_stack.insert(node);

        for child in self.children(node) {
            if rec_stack.contains(child.as_str()) {
                return Some(child.as_str());
            }
            if !visited.contains(child.as_str()) {
                if let Some(found) = self.dfs(child, visited, rec_stack) {
                    return Some(found);
                }
            }
        }

        rec_stack.remove(node);
        None
    }
}

/// A non-fatal structural finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// More than one node matched the trigger predicate
    MultipleTriggers(Vec<String>),
    /// A non-trigger node that no edge touches
    Orphaned(String),
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::MultipleTriggers(ids) => {
                write!(f, "Multiple trigger nodes found: {}", ids.join(", "))
            }
            Diagnostic::Orphaned(id) => {
                write!(f, "Node '{}' is not connected and will not execute", id)
            }
        }
    }
}

/// Outcome of a successful validation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Diagnostics {
    pub triggers: Vec<String>,
    pub warnings: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Orphaned node IDs.
    pub fn orphans(&self) -> Vec<&str> {
        self.warnings
            .iter()
            .filter_map(|w| match w {
                Diagnostic::Orphaned(id) => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Validate a node/edge list.
///
/// Fatal: duplicate IDs, dangling edges, no trigger, any directed cycle.
/// Warnings: more than one trigger, orphaned nodes.
pub fn validate(
    nodes: &[Node],
    edges: &[Edge],
    config: &EngineConfig,
) -> Result<Diagnostics, StructuralError> {
    let graph = ExecutionGraph::build(nodes, edges)?;

    let triggers: Vec<String> = graph
        .triggers(config)
        .into_iter()
        .map(str::to_string)
        .collect();
    if triggers.is_empty() {
        return Err(StructuralError::NoTrigger);
    }

    let mut warnings = Vec::new();
    if triggers.len() > 1 {
        warnings.push(Diagnostic::MultipleTriggers(triggers.clone()));
    }

    let connected: HashSet<&str> = edges
        .iter()
        .flat_map(|e| [e.source.as_str(), e.target.as_str()])
        .collect();
    for node in graph.nodes() {
        if !config.is_trigger(&node.type_tag) && !connected.contains(node.id.as_str()) {
            warnings.push(Diagnostic::Orphaned(node.id.clone()));
        }
    }

    if let Some(node) = graph.find_cycle() {
        return Err(StructuralError::CircularDependency(node.to_string()));
    }

    Ok(Diagnostics { triggers, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (Vec<Node>, Vec<Edge>) {
        (
            vec![
                Node::new("start", "manual_trigger"),
                Node::new("a", "set"),
                Node::new("b", "set"),
            ],
            vec![Edge::new("start", "a"), Edge::new("a", "b")],
        )
    }

    #[test]
    fn test_build_preserves_edge_order() {
        let nodes = vec![
            Node::new("start", "manual_trigger"),
            Node::new("c2", "set"),
            Node::new("c1", "set"),
        ];
        let edges = vec![Edge::new("start", "c1"), Edge::new("start", "c2")];
        let graph = ExecutionGraph::build(&nodes, &edges).unwrap();

        assert_eq!(graph.children("start"), ["c1", "c2"]);
        assert!(graph.children("c1").is_empty());
        assert!(graph.children("missing").is_empty());
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_build_rejects_dangling_edge() {
        let nodes = vec![Node::new("start", "manual_trigger")];
        let edges = vec![Edge::new("start", "ghost")];
        assert_eq!(
            ExecutionGraph::build(&nodes, &edges).unwrap_err(),
            StructuralError::UnknownNode("ghost".into())
        );
    }

    #[test]
    fn test_build_rejects_duplicate_ids() {
        let nodes = vec![Node::new("a", "manual_trigger"), Node::new("a", "set")];
        assert_eq!(
            ExecutionGraph::build(&nodes, &[]).unwrap_err(),
            StructuralError::DuplicateNode("a".into())
        );
    }

    #[test]
    fn test_validate_valid_chain() {
        let (nodes, edges) = chain();
        let diagnostics = validate(&nodes, &edges, &EngineConfig::default()).unwrap();
        assert_eq!(diagnostics.triggers, vec!["start"]);
        assert!(!diagnostics.has_warnings());
    }

    #[test]
    fn test_validate_no_trigger() {
        let nodes = vec![Node::new("a", "set"), Node::new("b", "set")];
        let edges = vec![Edge::new("a", "b")];
        assert_eq!(
            validate(&nodes, &edges, &EngineConfig::default()).unwrap_err(),
            StructuralError::NoTrigger
        );
    }

    #[test]
    fn test_validate_multiple_triggers_is_warning() {
        let nodes = vec![
            Node::new("t1", "manual_trigger"),
            Node::new("t2", "webhook_trigger"),
            Node::new("a", "set"),
        ];
        let edges = vec![Edge::new("t1", "a"), Edge::new("t2", "a")];
        let diagnostics = validate(&nodes, &edges, &EngineConfig::default()).unwrap();

        assert_eq!(
            diagnostics.warnings,
            vec![Diagnostic::MultipleTriggers(vec!["t1".into(), "t2".into()])]
        );
    }

    #[test]
    fn test_validate_orphan_is_warning() {
        let (mut nodes, edges) = chain();
        nodes.push(Node::new("lonely", "set"));
        let diagnostics = validate(&nodes, &edges, &EngineConfig::default()).unwrap();

        assert_eq!(diagnostics.orphans(), vec!["lonely"]);
    }

    #[test]
    fn test_validate_cycle() {
        let (nodes, mut edges) = chain();
        edges.push(Edge::new("b", "a"));
        assert!(matches!(
            validate(&nodes, &edges, &EngineConfig::default()),
            Err(StructuralError::CircularDependency(_))
        ));
    }

    #[test]
    fn test_cycle_detected_regardless_of_declaration_order() {
        let (nodes, mut edges) = chain();
        edges.push(Edge::new("b", "a"));

        let mut reversed_nodes = nodes.clone();
        reversed_nodes.reverse();
        let mut reversed_edges = edges.clone();
        reversed_edges.reverse();

        let config = EngineConfig::default();
        assert!(validate(&nodes, &edges, &config).is_err());
        assert!(validate(&reversed_nodes, &reversed_edges, &config).is_err());
    }

    #[test]
    fn test_self_loop_is_cycle() {
        let nodes = vec![Node::new("start", "manual_trigger"), Node::new("a", "set")];
        let edges = vec![Edge::new("start", "a"), Edge::new("a", "a")];
        assert_eq!(
            validate(&nodes, &edges, &EngineConfig::default()).unwrap_err(),
            StructuralError::CircularDependency("a".into())
        );
    }

    #[test]
    fn test_validate_is_idempotent() {
        let (mut nodes, edges) = chain();
        nodes.push(Node::new("lonely", "set"));
        nodes.push(Node::new("t2", "schedule_trigger"));
        let config = EngineConfig::default();

        let first = validate(&nodes, &edges, &config);
        let second = validate(&nodes, &edges, &config);
        assert_eq!(first, second);
    }
}
