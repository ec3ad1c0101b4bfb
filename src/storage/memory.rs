//! In-memory sink for tests and embedding.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{LogEntry, LogLevel, RunPatch, RunRecord, RunStatus};
use super::ExecutionSink;
use crate::error::{Error, Result};

/// Keeps every run and log line in memory.
#[derive(Default)]
pub struct MemorySink {
    runs: RwLock<HashMap<String, RunRecord>>,
    logs: RwLock<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_run(&self, run_id: &str) -> Option<RunRecord> {
        self.runs.read().await.get(run_id).cloned()
    }

    /// All runs, oldest first.
    pub async fn runs(&self) -> Vec<RunRecord> {
        let mut runs: Vec<RunRecord> = self.runs.read().await.values().cloned().collect();
        runs.sort_by_key(|r| r.started_at);
        runs
    }

    /// Log lines of one run in append order.
    pub async fn logs(&self, run_id: &str) -> Vec<LogEntry> {
        self.logs
            .read()
            .await
            .iter()
            .filter(|entry| entry.run_id == run_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ExecutionSink for MemorySink {
    async fn create_run(&self, workflow_name: &str, input: &Value) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let record = RunRecord {
            id: id.clone(),
            workflow_name: workflow_name.to_string(),
            status: RunStatus::Running,
            input: input.clone(),
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            nodes_executed: 0,
            error: None,
            last_checkpoint: None,
        };
        self.runs.write().await.insert(id.clone(), record);
        Ok(id)
    }

    async fn update_run(&self, run_id: &str, patch: RunPatch) -> Result<()> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| Error::Storage(format!("Run not found: {}", run_id)))?;
        patch.apply(run);
        Ok(())
    }

    async fn append_log(
        &self,
        run_id: &str,
        node_id: Option<&str>,
        level: LogLevel,
        message: &str,
        data: Option<&Value>,
    ) -> Result<()> {
        if !self.runs.read().await.contains_key(run_id) {
            return Err(Error::Storage(format!("Run not found: {}", run_id)));
        }
        self.logs.write().await.push(LogEntry {
            run_id: run_id.to_string(),
            node_id: node_id.map(str::to_string),
            level,
            message: message.to_string(),
            data: data.cloned(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_run_lifecycle() {
        let sink = MemorySink::new();
        let id = sink.create_run("wf", &json!({"a": 1})).await.unwrap();

        sink.append_log(&id, Some("start"), LogLevel::Info, "ok", None)
            .await
            .unwrap();
        sink.update_run(&id, RunPatch::progress(1, "start"))
            .await
            .unwrap();
        sink.update_run(&id, RunPatch::completed(1, 12)).await.unwrap();

        let run = sink.get_run(&id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.nodes_executed, 1);
        assert_eq!(run.last_checkpoint.as_deref(), Some("start"));
        assert_eq!(sink.logs(&id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_run_rejected() {
        let sink = MemorySink::new();
        assert!(sink.update_run("nope", RunPatch::default()).await.is_err());
        assert!(sink
            .append_log("nope", None, LogLevel::Warn, "x", None)
            .await
            .is_err());
    }
}
