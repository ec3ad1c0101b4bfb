//! Configuration management.
//!
//! nodeflow configuration can come from:
//! - Config file (~/.config/nodeflow/config.toml)
//! - Environment variables (NODEFLOW_*), applied last

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::CircuitBreakerConfig;
use crate::error::{Error, Result};

/// nodeflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Interpreter limits and naming conventions
    #[serde(default)]
    pub engine: EngineConfig,

    /// Defaults for every per-resource circuit breaker
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    /// Outbound HTTP settings for the http_request/webhook nodes
    #[serde(default)]
    pub http: HttpConfig,

    /// Run record storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Credential bundles for authenticated nodes
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Log output
    #[serde(default)]
    pub logging: LogConfig,
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum nesting of loop nodes within one path
    #[serde(default = "default_max_loop_depth")]
    pub max_loop_depth: usize,

    /// Upper bound on the iteration count a loop node may request
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: usize,

    /// Maximum nesting of sub_workflow nodes
    #[serde(default = "default_max_subworkflow_depth")]
    pub max_subworkflow_depth: usize,

    /// A node is a trigger when its type tag contains this pattern
    #[serde(default = "default_trigger_pattern")]
    pub trigger_pattern: String,

    /// Type tag of nodes that recover failures of their parent
    #[serde(default = "default_error_handler_type")]
    pub error_handler_type: String,

    /// Circuit breaker defaults for this engine's breakers
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    /// Timeout applied by HTTP-backed nodes
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_loop_depth: default_max_loop_depth(),
            max_loop_iterations: default_max_loop_iterations(),
            max_subworkflow_depth: default_max_subworkflow_depth(),
            trigger_pattern: default_trigger_pattern(),
            error_handler_type: default_error_handler_type(),
            circuit_breaker: CircuitBreakerSettings::default(),
            http_timeout_seconds: default_http_timeout(),
        }
    }
}

impl EngineConfig {
    /// Whether a type tag denotes a trigger node.
    pub fn is_trigger(&self, type_tag: &str) -> bool {
        type_tag.contains(self.trigger_pattern.as_str())
    }

    /// Whether a type tag denotes an error-handler node.
    pub fn is_error_handler(&self, type_tag: &str) -> bool {
        type_tag == self.error_handler_type
    }
}

fn default_max_loop_depth() -> usize {
    5
}

fn default_max_loop_iterations() -> usize {
    1000
}

fn default_max_subworkflow_depth() -> usize {
    5
}

fn default_trigger_pattern() -> String {
    "trigger".to_string()
}

fn default_error_handler_type() -> String {
    "error_handler".to_string()
}

fn default_http_timeout() -> u64 {
    30
}

/// Circuit breaker settings as they appear in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures before a breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds an open breaker waits before allowing a trial call
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_seconds: default_cooldown_seconds(),
        }
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold.max(1),
            cooldown: Duration::from_secs(settings.cooldown_seconds),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_seconds() -> u64 {
    30
}

/// HTTP configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_http_timeout(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite run database (no persistence when unset)
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

/// Credentials configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// JSON credentials file (defaults to ~/.config/nodeflow/credentials.json)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default location plus environment overrides.
    pub fn load() -> Self {
        let mut config = Self::config_path()
            .and_then(|path| Self::load_from_path(&path).ok())
            .unwrap_or_default();
        config.apply_env_overrides();
        config.sync_sections();
        config
    }

    /// Load configuration from an explicit file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;
        config.sync_sections();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid config file: {}", e)))?;
        config.sync_sections();
        Ok(config)
    }

    /// Default config file location.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("nodeflow").join("config.toml"))
    }

    /// Engine configuration with the top-level breaker and HTTP sections applied.
    pub fn engine_config(&self) -> EngineConfig {
        self.engine.clone()
    }

    fn sync_sections(&mut self) {
        self.engine.circuit_breaker = self.circuit_breaker.clone();
        self.engine.http_timeout_seconds = self.http.timeout_seconds;
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<usize>("NODEFLOW_MAX_LOOP_DEPTH") {
            self.engine.max_loop_depth = v;
        }
        if let Some(v) = env_parse::<usize>("NODEFLOW_MAX_LOOP_ITERATIONS") {
            self.engine.max_loop_iterations = v;
        }
        if let Some(v) = env_parse::<usize>("NODEFLOW_MAX_SUBWORKFLOW_DEPTH") {
            self.engine.max_subworkflow_depth = v;
        }
        if let Some(v) = env_parse::<u32>("NODEFLOW_BREAKER_FAILURE_THRESHOLD") {
            self.circuit_breaker.failure_threshold = v;
        }
        if let Some(v) = env_parse::<u64>("NODEFLOW_BREAKER_COOLDOWN_SECONDS") {
            self.circuit_breaker.cooldown_seconds = v;
        }
        if let Some(v) = env_parse::<u64>("NODEFLOW_HTTP_TIMEOUT_SECONDS") {
            self.http.timeout_seconds = v;
        }
        if let Ok(path) = std::env::var("NODEFLOW_DATABASE_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("NODEFLOW_CREDENTIALS_PATH") {
            self.credentials.path = Some(PathBuf::from(path));
        }
        if let Ok(level) = std::env::var("NODEFLOW_LOG_LEVEL") {
            self.logging.level = level;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.max_loop_depth, 5);
        assert_eq!(config.engine.trigger_pattern, "trigger");
        assert_eq!(config.engine.error_handler_type, "error_handler");
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.cooldown_seconds, 30);
        assert!(config.storage.database_path.is_none());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = Config::from_toml(
            r#"
[engine]
max_loop_depth = 3

[circuit_breaker]
failure_threshold = 2
cooldown_seconds = 10

[http]
timeout_seconds = 5
"#,
        )
        .unwrap();

        assert_eq!(config.engine.max_loop_depth, 3);
        assert_eq!(config.engine.max_loop_iterations, 1000);
        assert_eq!(config.engine.circuit_breaker.failure_threshold, 2);
        assert_eq!(config.engine.http_timeout_seconds, 5);

        let breaker: CircuitBreakerConfig = (&config.circuit_breaker).into();
        assert_eq!(breaker.cooldown, Duration::from_secs(10));
    }

    #[test]
    fn test_credentials_path_from_toml() {
        let config = Config::from_toml(
            r#"
[credentials]
path = "/etc/nodeflow/credentials.json"
"#,
        )
        .unwrap();
        assert_eq!(
            config.credentials.path,
            Some(PathBuf::from("/etc/nodeflow/credentials.json"))
        );
        assert!(Config::default().credentials.path.is_none());
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml("engine = [").unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_trigger_predicate() {
        let engine = EngineConfig::default();
        assert!(engine.is_trigger("manual_trigger"));
        assert!(engine.is_trigger("webhook_trigger"));
        assert!(!engine.is_trigger("http_request"));
        assert!(engine.is_error_handler("error_handler"));
    }
}
