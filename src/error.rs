//! Error types for nodeflow.
//!
//! Errors carry a stable machine-parseable code so that callers embedding
//! the engine can decide between retrying, surfacing, or ignoring a failure.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for nodeflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Structural problems with a graph, detected before anything executes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    #[error("Workflow has no trigger node")]
    NoTrigger,

    #[error("Circular dependency detected involving node '{0}'")]
    CircularDependency(String),

    #[error("Edge references unknown node '{0}'")]
    UnknownNode(String),

    #[error("Duplicate node ID: {0}")]
    DuplicateNode(String),
}

/// nodeflow error types.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Structural error: {0}")]
    Structural(#[from] StructuralError),

    #[error("Node '{node_id}' is missing required config field '{field}'")]
    ConfigValidation { node_id: String, field: String },

    #[error("Node error: {0}")]
    Node(String),

    /// A request that could not be built; nothing was sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Sub-workflow '{name}' failed: {source}")]
    SubWorkflow {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Circuit open for '{0}'")]
    CircuitOpen(String),

    #[error("Loop depth exceeded at node '{node_id}' (max {max_depth})")]
    LoopDepthExceeded { node_id: String, max_depth: usize },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the error code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Structural(_) => "STRUCTURAL_ERROR",
            Error::ConfigValidation { .. } => "CONFIG_VALIDATION_ERROR",
            Error::Node(_) => "NODE_ERROR",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::SubWorkflow { source, .. } => source.code(),
            Error::CircuitOpen(_) => "CIRCUIT_OPEN",
            Error::LoopDepthExceeded { .. } => "LOOP_DEPTH_EXCEEDED",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Parse(_) => "PARSE_ERROR",
            Error::Credential(_) => "CREDENTIAL_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Yaml(_) => "YAML_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Whether a retry later might succeed without changing the workflow.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::CircuitOpen(_) => true,
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::SubWorkflow { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Whether this failure says something about the remote resource.
    ///
    /// Failures raised before anything was sent (bad config, missing
    /// credentials, unbuildable requests) leave circuit breakers untouched.
    pub fn counts_against_breaker(&self) -> bool {
        match self {
            Error::ConfigValidation { .. }
            | Error::InvalidRequest(_)
            | Error::Credential(_)
            | Error::Config(_)
            | Error::Parse(_)
            | Error::CircuitOpen(_)
            | Error::LoopDepthExceeded { .. } => false,
            Error::SubWorkflow { source, .. } => source.counts_against_breaker(),
            _ => true,
        }
    }

    /// Convert to a JSON error envelope.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        })
    }
}

/// A node-level failure recorded in the execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    pub node_id: String,
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// A run that did not complete.
///
/// Carries everything recorded up to the failure so callers can inspect
/// where the run stopped.
#[derive(Error, Debug)]
#[error("Execution {execution_id} failed: {error}")]
pub struct WorkflowFailure {
    pub execution_id: String,
    #[source]
    pub error: Error,
    pub errors: Vec<ExecutionError>,
    pub last_checkpoint: Option<String>,
    pub nodes_executed: usize,
    pub duration_ms: u64,
}

impl WorkflowFailure {
    pub fn code(&self) -> &'static str {
        self.error.code()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "executionId": self.execution_id,
            "error": {
                "code": self.code(),
                "message": self.error.to_string(),
            },
            "errors": self.errors,
            "lastCheckpoint": self.last_checkpoint,
            "nodesExecuted": self.nodes_executed,
            "durationMs": self.duration_ms,
        })
    }
}
