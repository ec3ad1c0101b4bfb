//! Execution engine for workflows.

mod circuit_breaker;
mod context;
mod executor;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
};
pub use context::{ExecutionContext, LoopFrame};
pub use executor::{Engine, ExecutionResult};
