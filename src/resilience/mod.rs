//! Protection around calls into the model: per-dependency circuit breakers
//! and bounded exponential retry.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitSnapshot, CircuitState};
pub use retry::RetryPolicy;
