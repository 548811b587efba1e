//! Engine configuration types for AgentFlow.
//!
//! `EngineConfig` represents the top-level `config.toml` that controls
//! timeouts, retry backoff, circuit breaking, session retention, and the
//! static agent table. All fields have sensible defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: ExecutionConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    /// Static agent table used by the built-in agent registry.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Orchestrator-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Per-attempt step timeout when a step does not set its own.
    #[serde(default = "default_step_timeout_ms")]
    pub default_step_timeout_ms: u64,
    /// Workflow timeout when neither the graph nor the caller sets one.
    #[serde(default = "default_workflow_timeout_secs")]
    pub workflow_timeout_secs: u64,
    /// Whether a workflow timeout compensates the steps completed so far.
    #[serde(default = "default_true")]
    pub rollback_on_timeout: bool,
    /// Capacity of the lifecycle event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_step_timeout_ms() -> u64 {
    30_000
}

fn default_workflow_timeout_secs() -> u64 {
    1800
}

fn default_true() -> bool {
    true
}

fn default_event_capacity() -> usize {
    1024
}

impl ExecutionConfig {
    pub fn default_step_timeout(&self) -> Duration {
        Duration::from_millis(self.default_step_timeout_ms)
    }

    pub fn workflow_timeout(&self) -> Duration {
        Duration::from_secs(self.workflow_timeout_secs)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_ms: default_step_timeout_ms(),
            workflow_timeout_secs: default_workflow_timeout_secs(),
            rollback_on_timeout: true,
            event_capacity: default_event_capacity(),
        }
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Exponential backoff settings.
///
/// `max_retries` is the number of retries after the first attempt; steps
/// override it with their own retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl RetryConfig {
    /// Same backoff shape with a different retry budget.
    pub fn with_max_retries(&self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self.clone()
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

/// Per-target circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time since the last failure before an open circuit admits a trial call.
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
    /// Consecutive half-open successes needed to close the circuit; also the
    /// number of trial calls admitted while half-open.
    #[serde(default = "default_half_open_max_attempts")]
    pub half_open_max_attempts: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    60_000
}

fn default_half_open_max_attempts() -> u32 {
    3
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            half_open_max_attempts: default_half_open_max_attempts(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Context store retention settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_max_sessions() -> usize {
    10_000
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            max_sessions: default_max_sessions(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// One entry in the static agent table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    /// Base URL the HTTP transport posts tasks to.
    pub endpoint: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.engine.default_step_timeout_ms, 30_000);
        assert_eq!(config.engine.workflow_timeout_secs, 1800);
        assert!(config.engine.rollback_on_timeout);
        assert_eq!(config.retry.initial_delay_ms, 100);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.sessions.max_sessions, 10_000);
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.retry.backoff_multiplier, 2.0);
        assert_eq!(config.circuit_breaker.half_open_max_attempts, 3);
        assert_eq!(config.sessions.sweep_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
[engine]
default_step_timeout_ms = 5000
rollback_on_timeout = false

[retry]
initial_delay_ms = 250
backoff_multiplier = 3.0

[circuit_breaker]
failure_threshold = 2

[[agents]]
id = "fetcher"
endpoint = "http://localhost:8081"

[[agents]]
id = "billing"
endpoint = "http://localhost:8082"
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.default_step_timeout(), Duration::from_secs(5));
        assert!(!config.engine.rollback_on_timeout);
        assert_eq!(config.engine.workflow_timeout_secs, 1800);
        assert_eq!(config.retry.initial_delay_ms, 250);
        assert_eq!(config.retry.max_delay_ms, 10_000);
        assert_eq!(config.circuit_breaker.failure_threshold, 2);
        assert_eq!(config.circuit_breaker.reset_timeout_ms, 60_000);
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.agents[1].id, "billing");
    }

    #[test]
    fn test_retry_config_with_max_retries_keeps_backoff() {
        let base = RetryConfig {
            initial_delay_ms: 50,
            ..RetryConfig::default()
        };
        let step = base.with_max_retries(4);
        assert_eq!(step.max_retries, 4);
        assert_eq!(step.initial_delay_ms, 50);
    }
}
