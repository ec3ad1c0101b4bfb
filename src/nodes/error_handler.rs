//! Error handler node - receives `{ error, failedNode }` from a failed parent.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::types::{Node, NodeContext, NodeResult};
use crate::error::Result;

/// Error handler node implementation.
pub struct ErrorHandlerNode;

impl ErrorHandlerNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ErrorHandlerNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for ErrorHandlerNode {
    fn node_type(&self) -> &str {
        "error_handler"
    }

    fn description(&self) -> &str {
        "Recover from a failure of the parent node"
    }

    async fn execute(&self, config: &Value, ctx: &NodeContext) -> Result<NodeResult> {
        let error = ctx.input.get("error").cloned().unwrap_or(Value::Null);
        let failed_node = ctx.input.get("failedNode").cloned().unwrap_or(Value::Null);

        info!(
            execution_id = %ctx.execution_id,
            failed_node = %failed_node,
            "Handling node failure"
        );

        Ok(NodeResult::new(json!({
            "success": true,
            "handled": true,
            "error": error,
            "failedNode": failed_node,
            "fallback": config.get("fallback").cloned().unwrap_or(Value::Null),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_handler_echoes_failure() {
        let node = ErrorHandlerNode::new();
        let ctx = NodeContext::new("exec-1", "wf")
            .with_input(json!({"error": "boom", "failedNode": "fetch"}));

        let result = node
            .execute(&json!({"fallback": {"items": []}}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.data["handled"], true);
        assert_eq!(result.data["error"], "boom");
        assert_eq!(result.data["failedNode"], "fetch");
        assert_eq!(result.data["fallback"], json!({"items": []}));
    }
}
