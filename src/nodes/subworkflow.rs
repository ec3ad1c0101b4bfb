//! SubWorkflow node - run an inline graph in a fresh engine.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::template::resolve_value;
use super::types::{Node, NodeContext, NodeResult};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::workflow::{Edge, Node as WorkflowNode, WorkflowDefinition};

/// SubWorkflow node for executing nested graphs.
pub struct SubWorkflowNode;

impl SubWorkflowNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SubWorkflowNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct SubWorkflowConfig {
    /// Name used for logs and run records
    #[serde(default)]
    name: Option<String>,

    nodes: Vec<WorkflowNode>,

    #[serde(default)]
    edges: Vec<Edge>,

    #[serde(default)]
    variables: Map<String, Value>,

    /// Input to pass to the sub-workflow (defaults to the current input)
    #[serde(default)]
    input: Option<Value>,
}

#[async_trait]
impl Node for SubWorkflowNode {
    fn node_type(&self) -> &str {
        "sub_workflow"
    }

    fn description(&self) -> &str {
        "Execute a nested workflow and wait for it to finish"
    }

    async fn execute(&self, config: &Value, ctx: &NodeContext) -> Result<NodeResult> {
        let config: SubWorkflowConfig = serde_json::from_value(config.clone())
            .map_err(|e| Error::Node(format!("Invalid sub_workflow config: {}", e)))?;

        let max_depth = ctx.config.max_subworkflow_depth;
        if ctx.subworkflow_depth >= max_depth {
            return Err(Error::Node(format!(
                "Maximum sub-workflow depth ({}) exceeded",
                max_depth
            )));
        }

        let registry = ctx.registry.clone().ok_or_else(|| {
            Error::Node("SubWorkflow node requires registry in context".to_string())
        })?;

        let name = config
            .name
            .unwrap_or_else(|| format!("{}/{}", ctx.workflow_name, ctx.node_id));
        let input = match &config.input {
            Some(input) => resolve_value(input, ctx),
            None => ctx.input.clone(),
        };
        let definition = WorkflowDefinition {
            name: name.clone(),
            description: String::new(),
            variables: config.variables.into_iter().collect(),
            nodes: config.nodes,
            edges: config.edges,
        };

        debug!(
            parent = %ctx.execution_id,
            depth = ctx.subworkflow_depth + 1,
            "Starting sub-workflow '{}'", name
        );

        let mut engine = Engine::new(registry)
            .with_config(ctx.config.clone())
            .with_subworkflow_depth(ctx.subworkflow_depth + 1);
        if let Some(credentials) = &ctx.credentials {
            engine = engine.with_credentials(credentials.clone());
        }
        if let Some(user_id) = &ctx.user_id {
            engine = engine.with_user_id(user_id);
        }

        let result = engine
            .run(&definition, input)
            .await
            .map_err(|failure| Error::SubWorkflow {
                name: name.clone(),
                source: Box::new(failure.error),
            })?;

        let output = engine
            .context()
            .last_completed
            .as_deref()
            .and_then(|id| engine.context().get_output(id))
            .cloned()
            .unwrap_or(Value::Null);

        info!(
            "Sub-workflow '{}' completed ({} nodes, {}ms)",
            name, result.nodes_executed, result.duration_ms
        );

        Ok(NodeResult::with_metadata(
            json!({
                "success": true,
                "executionId": result.execution_id,
                "nodesExecuted": result.nodes_executed,
                "output": output,
            }),
            json!({
                "duration_ms": result.duration_ms,
                "depth": ctx.subworkflow_depth + 1,
            }),
        ))
    }
}
