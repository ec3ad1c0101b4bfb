//! Storage models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown status: {}", s)),
        }
    }
}

/// Log level of a run log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// Run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    pub input: Value,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub nodes_executed: usize,
    pub error: Option<String>,
    /// Last node whose handler completed before the run ended
    pub last_checkpoint: Option<String>,
}

/// Partial update applied to a run record. `None` fields are left as-is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub nodes_executed: Option<usize>,
    pub error: Option<String>,
    pub last_checkpoint: Option<String>,
}

impl RunPatch {
    pub fn completed(nodes_executed: usize, duration_ms: u64) -> Self {
        Self {
            status: Some(RunStatus::Completed),
            finished_at: Some(Utc::now()),
            duration_ms: Some(duration_ms),
            nodes_executed: Some(nodes_executed),
            ..Self::default()
        }
    }

    pub fn failed(
        error: impl Into<String>,
        last_checkpoint: Option<String>,
        nodes_executed: usize,
        duration_ms: u64,
    ) -> Self {
        Self {
            status: Some(RunStatus::Failed),
            finished_at: Some(Utc::now()),
            duration_ms: Some(duration_ms),
            nodes_executed: Some(nodes_executed),
            error: Some(error.into()),
            last_checkpoint,
        }
    }

    /// Progress update written after each node.
    pub fn progress(nodes_executed: usize, last_checkpoint: &str) -> Self {
        Self {
            nodes_executed: Some(nodes_executed),
            last_checkpoint: Some(last_checkpoint.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn apply(&self, run: &mut RunRecord) {
        if let Some(status) = self.status {
            run.status = status;
        }
        if let Some(at) = self.finished_at {
            run.finished_at = Some(at);
        }
        if let Some(ms) = self.duration_ms {
            run.duration_ms = Some(ms);
        }
        if let Some(n) = self.nodes_executed {
            run.nodes_executed = n;
        }
        if let Some(error) = &self.error {
            run.error = Some(error.clone());
        }
        if let Some(id) = &self.last_checkpoint {
            run.last_checkpoint = Some(id.clone());
        }
    }
}

/// One log line attached to a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub run_id: String,
    /// `None` for run-level lines
    pub node_id: Option<String>,
    pub level: LogLevel,
    pub message: String,
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}
