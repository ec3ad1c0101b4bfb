//! Circuit breaker pattern for resilient external service calls.
//!
//! The circuit breaker prevents cascade failures by stopping requests to failing services.
//!
//! ## States
//!
//! - **Closed**: Normal operation, requests pass through
//! - **Open**: Requests fail immediately without attempting the call
//! - **HalfOpen**: A single trial request is allowed to test if the service recovered
//!
//! ## Configuration
//!
//! - `failure_threshold`: Consecutive failures before opening (default: 5)
//! - `cooldown`: How long to stay open before half-open (default: 30s)
//!
//! Breakers are owned by one engine. There is no process-wide registry, so
//! a struggling service seen by one run never short-circuits another run.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::metrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Service failing - requests rejected immediately
    Open,
    /// Testing recovery - one trial request allowed
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// How long to stay open before transitioning to half-open
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker for a single resource.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    /// Consecutive failure count
    failure_count: u32,
    /// When the circuit last opened
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default configuration.
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a new circuit breaker with custom configuration.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
        }
    }

    /// Current state as a caller would observe it.
    ///
    /// An open circuit whose cool-down has elapsed reports `HalfOpen`; the
    /// transition itself happens on the next call.
    pub fn state(&self) -> CircuitState {
        match self.state {
            CircuitState::Open if self.cooldown_elapsed() => CircuitState::HalfOpen,
            state => state,
        }
    }

    /// Consecutive failures seen while closed.
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    fn cooldown_elapsed(&self) -> bool {
        self.opened_at
            .map(|at| at.elapsed() >= self.config.cooldown)
            .unwrap_or(true)
    }

    /// Decide whether a call may proceed, moving Open to HalfOpen when due.
    fn try_acquire(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.cooldown_elapsed() {
                    self.transition(CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful request.
    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                self.failure_count = 0;
                self.opened_at = None;
                self.transition(CircuitState::Closed);
                info!("Circuit breaker closed after recovery");
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed request.
    pub fn record_failure(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.config.failure_threshold {
                    self.open();
                    warn!(
                        "Circuit breaker opened after {} failures",
                        self.config.failure_threshold
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.open();
                warn!("Circuit breaker reopened after failure in half-open state");
            }
            CircuitState::Open => {}
        }
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.opened_at = None;
    }

    fn open(&mut self) {
        self.opened_at = Some(Instant::now());
        self.transition(CircuitState::Open);
    }

    fn transition(&mut self, to: CircuitState) {
        if self.state != to {
            debug!(from = %self.state, to = %to, "Circuit breaker transition");
            metrics::record_circuit_transition(to);
        }
        self.state = to;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-engine set of breakers, one per resource key, created on first use.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: HashMap<String, CircuitBreaker>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    /// Create a new registry with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new registry with custom default configuration.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: HashMap::new(),
            default_config: config,
        }
    }

    /// Get or create the breaker for a resource.
    pub fn get_or_create(&mut self, resource_key: &str) -> &mut CircuitBreaker {
        let config = &self.default_config;
        self.breakers
            .entry(resource_key.to_string())
            .or_insert_with(|| CircuitBreaker::with_config(config.clone()))
    }

    /// Observed state for a resource. Unknown resources are closed.
    pub fn state(&self, resource_key: &str) -> CircuitState {
        self.breakers
            .get(resource_key)
            .map(CircuitBreaker::state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Run `operation` under the breaker for `resource_key`.
    ///
    /// While the circuit is open the operation is never polled and
    /// `Error::CircuitOpen` is returned instead. Errors for which
    /// [`Error::counts_against_breaker`] is false leave the breaker as it was.
    pub async fn execute<F, T>(&mut self, resource_key: &str, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let breaker = self.get_or_create(resource_key);
        if !breaker.try_acquire() {
            debug!(resource = %resource_key, "Circuit open, short-circuiting call");
            return Err(Error::CircuitOpen(resource_key.to_string()));
        }

        let result = operation.await;

        let breaker = self.get_or_create(resource_key);
        match &result {
            Ok(_) => breaker.record_success(),
            Err(e) if !e.counts_against_breaker() => {
                debug!(resource = %resource_key, error = %e, "Local failure, breaker unchanged");
            }
            Err(e) => {
                debug!(resource = %resource_key, error = %e, "Call failed under circuit breaker");
                breaker.record_failure();
            }
        }
        result
    }

    /// Alias of [`execute`](Self::execute) for read-style calls.
    pub async fn fire<F, T>(&mut self, resource_key: &str, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.execute(resource_key, operation).await
    }

    /// Number of resources with a breaker.
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
