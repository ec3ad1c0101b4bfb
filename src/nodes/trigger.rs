//! Trigger nodes - entry points that hand the trigger input to the graph.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::types::{Node, NodeContext, NodeKind, NodeResult};
use crate::error::Result;

/// Trigger node. One struct serves every trigger flavour; the engine treats
/// them identically once the run has started.
pub struct TriggerNode {
    kind: NodeKind,
}

impl TriggerNode {
    pub fn manual() -> Self {
        Self {
            kind: NodeKind::ManualTrigger,
        }
    }

    pub fn webhook() -> Self {
        Self {
            kind: NodeKind::WebhookTrigger,
        }
    }

    pub fn schedule() -> Self {
        Self {
            kind: NodeKind::ScheduleTrigger,
        }
    }
}

#[async_trait]
impl Node for TriggerNode {
    fn node_type(&self) -> &str {
        self.kind.as_str()
    }

    fn kind(&self) -> NodeKind {
        self.kind.clone()
    }

    fn description(&self) -> &str {
        match self.kind {
            NodeKind::WebhookTrigger => "Start a run from an inbound webhook payload",
            NodeKind::ScheduleTrigger => "Start a run on a schedule",
            _ => "Start a run manually",
        }
    }

    async fn execute(&self, config: &Value, ctx: &NodeContext) -> Result<NodeResult> {
        Ok(NodeResult::with_metadata(
            ctx.input.clone(),
            json!({
                "trigger": self.kind.as_str(),
                "schedule": config.get("cron").cloned().unwrap_or(Value::Null),
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_passes_input_through() {
        let node = TriggerNode::webhook();
        let ctx = NodeContext::new("exec-1", "wf").with_input(json!({"event": "push"}));

        let result = node.execute(&json!({}), &ctx).await.unwrap();
        assert_eq!(result.data, json!({"event": "push"}));
        assert_eq!(result.metadata["trigger"], "webhook_trigger");
    }

    #[test]
    fn test_trigger_kinds() {
        assert_eq!(TriggerNode::manual().kind(), NodeKind::ManualTrigger);
        assert_eq!(TriggerNode::schedule().node_type(), "schedule_trigger");
    }
}
