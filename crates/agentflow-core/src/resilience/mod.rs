//! Failure isolation for remote agents.
//!
//! - `breaker` -- three-state circuit breaker for a single target
//! - `registry` -- lazily created breakers keyed by agent id

pub mod breaker;
pub mod registry;

pub use breaker::{BreakerStatus, CallPermit, CircuitBreaker, CircuitOpenError, CircuitState};
pub use registry::BreakerRegistry;
