//! Delay node - pause the run for a fixed duration.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::template::{as_f64, resolve_value};
use super::types::{Node, NodeContext, NodeResult};
use crate::error::{Error, Result};

/// Longest pause a single delay node may request (1 hour).
const MAX_DELAY_MS: u64 = 60 * 60 * 1000;

/// Delay node that pauses execution and passes its input through.
pub struct DelayNode;

impl DelayNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DelayNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct DelayConfig {
    /// Milliseconds to wait; a number or a `{{ ref }}` resolving to one
    duration_ms: Value,
}

#[async_trait]
impl Node for DelayNode {
    fn node_type(&self) -> &str {
        "delay"
    }

    fn description(&self) -> &str {
        "Pause execution for a number of milliseconds"
    }

    async fn execute(&self, config: &Value, ctx: &NodeContext) -> Result<NodeResult> {
        let config: DelayConfig = serde_json::from_value(config.clone())
            .map_err(|e| Error::Node(format!("Invalid delay config: {}", e)))?;

        let delay_ms = delay_millis(&resolve_value(&config.duration_ms, ctx))?;

        if delay_ms > 0 {
            info!(
                "Delay node pausing for {}ms (execution: {})",
                delay_ms, ctx.execution_id
            );
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        Ok(NodeResult::with_metadata(
            ctx.input.clone(),
            json!({ "waited_ms": delay_ms }),
        ))
    }
}

fn delay_millis(value: &Value) -> Result<u64> {
    let ms = as_f64(value)
        .ok_or_else(|| Error::Node(format!("Delay 'duration_ms' is not a number: {}", value)))?;
    if ms < 0.0 {
        return Err(Error::Node("Delay duration cannot be negative".to_string()));
    }
    let ms = ms as u64;
    if ms > MAX_DELAY_MS {
        return Err(Error::Node(format!(
            "Delay duration {}ms exceeds maximum of {}ms",
            ms, MAX_DELAY_MS
        )));
    }
    Ok(ms)
}
