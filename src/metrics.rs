//! Prometheus metrics for nodeflow.
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed, either by the embedding application or by
//! [`init_metrics`].
//!
//! ## Metrics
//!
//! ### Counters
//! - `nodeflow_runs_total` - Workflow runs by status
//! - `nodeflow_nodes_executed_total` - Node executions by node_type and status
//! - `nodeflow_circuit_transitions_total` - Breaker state changes by target state
//!
//! ### Histograms
//! - `nodeflow_run_duration_seconds` - Run duration
//! - `nodeflow_node_duration_seconds` - Node duration by node_type

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

use crate::engine::CircuitState;
use crate::error::{Error, Result};

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Safe to call more than once.
pub fn init_metrics() -> Result<&'static PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::Config(format!("Failed to install metrics recorder: {}", e)))?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Render current metrics in Prometheus text format.
pub fn render_metrics() -> String {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

/// Record a finished run.
pub fn record_run(status: &str, duration: Duration) {
    counter!("nodeflow_runs_total", "status" => status.to_string()).increment(1);
    histogram!("nodeflow_run_duration_seconds").record(duration.as_secs_f64());
}

/// Record a node execution.
pub fn record_node_execution(node_type: &str, status: &str, duration: Duration) {
    counter!(
        "nodeflow_nodes_executed_total",
        "node_type" => node_type.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(
        "nodeflow_node_duration_seconds",
        "node_type" => node_type.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a circuit breaker state change.
pub fn record_circuit_transition(to: CircuitState) {
    counter!("nodeflow_circuit_transitions_total", "to" => to.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_run("completed", Duration::from_millis(5));
        record_node_execution("set", "success", Duration::from_millis(1));
        record_circuit_transition(CircuitState::Open);
    }

    #[test]
    fn test_render_after_init() {
        let handle = init_metrics().unwrap();
        record_run("failed", Duration::from_millis(3));
        assert!(handle.render().contains("nodeflow_runs_total"));
        assert!(!render_metrics().is_empty());
    }
}
