//! Loop node - computes how many times its children are re-run.
//!
//! The engine performs the iterations; this handler only decides the count.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::template::{as_f64, resolve_value};
use super::types::{Node, NodeContext, NodeResult};
use crate::error::{Error, Result};

/// Loop node implementation.
pub struct LoopNode;

impl LoopNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoopNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct LoopConfig {
    /// Fixed iteration count
    #[serde(default)]
    iterations: Option<Value>,
    /// Array (or reference to one); one iteration per element
    #[serde(default)]
    items: Option<Value>,
}

#[async_trait]
impl Node for LoopNode {
    fn node_type(&self) -> &str {
        "loop"
    }

    fn description(&self) -> &str {
        "Re-run child nodes a fixed number of times or once per item"
    }

    async fn execute(&self, config: &Value, ctx: &NodeContext) -> Result<NodeResult> {
        let config: LoopConfig = serde_json::from_value(config.clone())
            .map_err(|e| Error::Node(format!("Invalid loop config: {}", e)))?;
        let max = ctx.config.max_loop_iterations;

        let items = match &config.items {
            Some(raw) => match resolve_value(raw, ctx) {
                Value::Array(items) => Some(items),
                other => {
                    return Err(Error::Node(format!(
                        "Loop 'items' must resolve to an array, got {}",
                        other
                    )))
                }
            },
            None => None,
        };

        let requested = match (&items, &config.iterations) {
            (Some(items), _) => items.len(),
            (None, Some(raw)) => {
                let count = as_f64(&resolve_value(raw, ctx)).ok_or_else(|| {
                    Error::Node(format!("Loop 'iterations' is not a number: {}", raw))
                })?;
                if count < 0.0 {
                    return Err(Error::Node(format!(
                        "Loop 'iterations' must be non-negative, got {}",
                        count
                    )));
                }
                count as usize
            }
            (None, None) => {
                return Err(Error::Node(
                    "Loop requires either 'iterations' or 'items'".to_string(),
                ))
            }
        };

        let iterations = if requested > max {
            warn!(
                node_id = %ctx.node_id,
                requested,
                max,
                "Loop iteration count capped"
            );
            max
        } else {
            requested
        };

        let mut data = json!({
            "success": true,
            "iterations": iterations,
            "data": ctx.input,
        });
        if let Some(mut items) = items {
            items.truncate(iterations);
            data["items"] = Value::Array(items);
        }

        Ok(NodeResult::with_metadata(
            data,
            json!({ "requested": requested, "capped": requested > max }),
        ))
    }
}
