//! Node trait, node kinds, and the context handed to handlers.

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::registry::NodeRegistry;
use crate::config::EngineConfig;
use crate::credentials::CredentialProvider;
use crate::error::Result;

/// How the engine walks a node's children once its handler has returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    /// Visit every child in edge order
    Sequential,
    /// Visit the child whose branch tag matches `conditionMet`
    Branch,
    /// Visit the child whose case tag matches `case`
    Switch,
    /// Visit all children once per iteration
    Loop,
}

/// Known node types. Any other tag is carried as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    ManualTrigger,
    WebhookTrigger,
    ScheduleTrigger,
    IfElse,
    Switch,
    Loop,
    ErrorHandler,
    Set,
    Delay,
    HttpRequest,
    Webhook,
    SubWorkflow,
    Custom(String),
}

impl NodeKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "manual_trigger" => NodeKind::ManualTrigger,
            "webhook_trigger" => NodeKind::WebhookTrigger,
            "schedule_trigger" => NodeKind::ScheduleTrigger,
            "if_else" => NodeKind::IfElse,
            "switch" => NodeKind::Switch,
            "loop" => NodeKind::Loop,
            "error_handler" => NodeKind::ErrorHandler,
            "set" => NodeKind::Set,
            "delay" => NodeKind::Delay,
            "http_request" => NodeKind::HttpRequest,
            "webhook" => NodeKind::Webhook,
            "sub_workflow" => NodeKind::SubWorkflow,
            other => NodeKind::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::ManualTrigger => "manual_trigger",
            NodeKind::WebhookTrigger => "webhook_trigger",
            NodeKind::ScheduleTrigger => "schedule_trigger",
            NodeKind::IfElse => "if_else",
            NodeKind::Switch => "switch",
            NodeKind::Loop => "loop",
            NodeKind::ErrorHandler => "error_handler",
            NodeKind::Set => "set",
            NodeKind::Delay => "delay",
            NodeKind::HttpRequest => "http_request",
            NodeKind::Webhook => "webhook",
            NodeKind::SubWorkflow => "sub_workflow",
            NodeKind::Custom(tag) => tag,
        }
    }

    pub fn control_flow(&self) -> ControlFlow {
        match self {
            NodeKind::IfElse => ControlFlow::Branch,
            NodeKind::Switch => ControlFlow::Switch,
            NodeKind::Loop => ControlFlow::Loop,
            _ => ControlFlow::Sequential,
        }
    }

    /// Config fields that must be present before the handler runs.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            NodeKind::IfElse => &["operator"],
            NodeKind::Switch => &["value"],
            NodeKind::Delay => &["duration_ms"],
            NodeKind::HttpRequest | NodeKind::Webhook => &["url"],
            NodeKind::SubWorkflow => &["nodes"],
            _ => &[],
        }
    }
}

impl FromStr for NodeKind {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(NodeKind::from_tag(s))
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Return the first required field that is absent, null, or an empty string.
pub fn missing_required_field<'a>(config: &Value, fields: &[&'a str]) -> Option<&'a str> {
    fields.iter().copied().find(|field| match config.get(*field) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    })
}

/// Result of node execution.
#[derive(Debug, Clone)]
pub struct NodeResult {
    /// Output data, stored as the node's output and passed to children
    pub data: Value,
    /// Metadata (timing, debug info, etc.), logged but not propagated
    pub metadata: Value,
}

impl NodeResult {
    /// Create a new result with just data.
    pub fn new(data: Value) -> Self {
        Self {
            data,
            metadata: serde_json::json!({}),
        }
    }

    /// Create a result with data and metadata.
    pub fn with_metadata(data: Value, metadata: Value) -> Self {
        Self { data, metadata }
    }
}

/// Read-only view of the run handed to a handler.
#[derive(Clone)]
pub struct NodeContext {
    /// ID of the node being executed
    pub node_id: String,

    /// Output of the parent node (or the trigger input for the trigger)
    pub input: Value,

    /// All node outputs so far (keyed by node ID)
    pub node_outputs: HashMap<String, Value>,

    /// Run variables
    pub variables: Value,

    /// Execution ID
    pub execution_id: String,

    /// Workflow name
    pub workflow_name: String,

    /// User on whose behalf the run executes, for credential lookup
    pub user_id: Option<String>,

    /// Number of enclosing sub-workflow runs
    pub subworkflow_depth: usize,

    /// Engine limits, shared with nested runs
    pub config: Arc<EngineConfig>,

    /// Credential provider for handlers that call authenticated services
    pub credentials: Option<Arc<dyn CredentialProvider>>,

    /// Node registry (for sub-workflow execution)
    pub registry: Option<Arc<NodeRegistry>>,
}

impl fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext")
            .field("node_id", &self.node_id)
            .field("input", &self.input)
            .field("execution_id", &self.execution_id)
            .field("workflow_name", &self.workflow_name)
            .field("user_id", &self.user_id)
            .field("subworkflow_depth", &self.subworkflow_depth)
            .finish_non_exhaustive()
    }
}

impl NodeContext {
    /// Create a new context.
    pub fn new(execution_id: &str, workflow_name: &str) -> Self {
        Self {
            node_id: String::new(),
            input: Value::Null,
            node_outputs: HashMap::new(),
            variables: serde_json::json!({}),
            execution_id: execution_id.to_string(),
            workflow_name: workflow_name.to_string(),
            user_id: None,
            subworkflow_depth: 0,
            config: Arc::new(EngineConfig::default()),
            credentials: None,
            registry: None,
        }
    }

    /// Set the input data.
    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    /// Set variables.
    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_node_id(mut self, node_id: &str) -> Self {
        self.node_id = node_id.to_string();
        self
    }

    pub fn with_config(mut self, config: Arc<EngineConfig>) -> Self {
        self.config = config;
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_registry(mut self, registry: Arc<NodeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Get a previous node's output.
    pub fn get_output(&self, node_id: &str) -> Option<&Value> {
        self.node_outputs.get(node_id)
    }
}

/// Trait that all node types must implement.
///
/// Handlers receive the node config and a snapshot of the run. They never
/// mutate run state; everything they want to publish goes in the returned
/// [`NodeResult`].
#[async_trait]
pub trait Node: Send + Sync {
    /// Get the node type tag (e.g., "if_else", "http_request").
    fn node_type(&self) -> &str;

    /// Registry key for this handler.
    fn kind(&self) -> NodeKind {
        NodeKind::from_tag(self.node_type())
    }

    /// How the engine dispatches children after this handler returns.
    fn control_flow(&self) -> ControlFlow {
        self.kind().control_flow()
    }

    /// Config fields checked before `execute` is called.
    fn required_fields(&self) -> &'static [&'static str] {
        self.kind().required_fields()
    }

    /// External resource this call addresses, if any.
    ///
    /// When `Some`, the engine routes the call through the circuit breaker
    /// for that key. Keys are derived from the same context the call will
    /// run with, so templated targets resolve to the concrete resource.
    fn resource_key(&self, _config: &Value, _ctx: &NodeContext) -> Option<String> {
        None
    }

    /// Execute the node with the given configuration and context.
    async fn execute(&self, config: &Value, ctx: &NodeContext) -> Result<NodeResult>;

    /// Get a description of this node type.
    fn description(&self) -> &str {
        "A workflow node"
    }
}
