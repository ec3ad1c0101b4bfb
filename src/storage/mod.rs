//! Run persistence.
//!
//! The engine reports run progress to an [`ExecutionSink`]. Sinks are
//! optional; a run without one only logs through `tracing`.

mod memory;
mod models;
mod sqlite;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub use memory::MemorySink;
pub use models::*;
pub use sqlite::SqliteSink;

/// Destination for run records and per-node log lines.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    /// Create a run record in the `running` state and return its ID.
    async fn create_run(&self, workflow_name: &str, input: &Value) -> Result<String>;

    /// Apply a partial update to a run.
    async fn update_run(&self, run_id: &str, patch: RunPatch) -> Result<()>;

    /// Attach a log line to a run.
    async fn append_log(
        &self,
        run_id: &str,
        node_id: Option<&str>,
        level: LogLevel,
        message: &str,
        data: Option<&Value>,
    ) -> Result<()>;
}
