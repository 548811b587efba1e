//! Circuit breaker for a single remote target.
//!
//! `Closed` passes calls through and counts consecutive failures. Reaching
//! `failure_threshold` opens the circuit: calls are rejected with
//! `CircuitOpenError` without being attempted. The first call after
//! `reset_timeout` has elapsed since the last failure moves the breaker to
//! `HalfOpen`, which admits up to `half_open_max_attempts` trial calls.
//! That many consecutive successes close the circuit; any failure reopens it.
//!
//! State lives behind a `std::sync::Mutex` that is only held for the
//! transition itself, never across the wrapped call's `.await`.
//!
//! Admission hands out a [`CallPermit`]. A half-open trial whose permit is
//! dropped without an outcome (the call was cancelled or aborted) gives its
//! slot back, so an abandoned trial can never wedge the breaker half-open.

use std::future::Future;
use std::sync::Mutex;

use agentflow_types::config::CircuitBreakerConfig;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

/// Public view of a breaker's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

/// Returned instead of dispatching while the circuit is open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit open for '{target}'")]
pub struct CircuitOpenError {
    pub target: String,
}

/// Snapshot of a breaker for status output.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub target: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed { consecutive_failures: u32 },
    Open,
    HalfOpen { trials: u32, successes: u32 },
}

/// Admission to one call. Report the outcome with [`CallPermit::succeed`] or
/// [`CallPermit::fail`]; dropping it unreported releases a half-open trial slot.
#[must_use = "an unreported permit records nothing"]
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    /// Half-open episode this permit is a trial of.
    trial_of: Option<u64>,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn fail(mut self, error: &str) {
        self.settled = true;
        self.breaker.record_failure(error);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(episode) = self.trial_of {
            self.breaker.release_trial(episode);
        }
    }
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    /// Bumped on every entry into `HalfOpen`.
    episode: u64,
    last_failure: Option<Instant>,
    total_calls: u64,
    total_failures: u64,
    last_error: Option<String>,
}

/// Three-state failure-isolation guard for one target.
#[derive(Debug)]
pub struct CircuitBreaker {
    target: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(target: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            target: target.into(),
            config,
            inner: Mutex::new(Inner {
                phase: Phase::Closed {
                    consecutive_failures: 0,
                },
                episode: 0,
                last_failure: None,
                total_calls: 0,
                total_failures: 0,
                last_error: None,
            }),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Current state. Does not perform the timed `Open -> HalfOpen` transition;
    /// that happens on the next call.
    pub fn state(&self) -> CircuitState {
        match self.lock().phase {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Run `operation` under the breaker.
    ///
    /// While open (or while half-open with every trial slot taken) the
    /// operation is not invoked and `CircuitOpenError` is returned through
    /// `E`'s `From` impl.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError> + std::fmt::Display,
    {
        let permit = self.try_acquire()?;

        let result = operation().await;
        match &result {
            Ok(_) => permit.succeed(),
            Err(err) => permit.fail(&err.to_string()),
        }
        result
    }

    /// Admit or reject a call, performing the timed reopen check.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, CircuitOpenError> {
        let mut inner = self.lock();
        let trial_of = match inner.phase {
            Phase::Closed { .. } => None,
            Phase::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| t.elapsed() >= self.config.reset_timeout())
                    .unwrap_or(true);
                if !elapsed {
                    return Err(self.open_error());
                }
                tracing::info!(target_id = self.target.as_str(), "circuit half-open, admitting trial call");
                inner.episode += 1;
                inner.phase = Phase::HalfOpen {
                    trials: 1,
                    successes: 0,
                };
                Some(inner.episode)
            }
            Phase::HalfOpen { trials, successes } => {
                if trials >= self.config.half_open_max_attempts.max(1) {
                    return Err(self.open_error());
                }
                inner.phase = Phase::HalfOpen {
                    trials: trials + 1,
                    successes,
                };
                Some(inner.episode)
            }
        };
        Ok(CallPermit {
            breaker: self,
            trial_of,
            settled: false,
        })
    }

    /// Give back a trial slot taken in `episode` by a call that never reported.
    fn release_trial(&self, episode: u64) {
        let mut inner = self.lock();
        if inner.episode != episode {
            return;
        }
        if let Phase::HalfOpen { trials, successes } = inner.phase {
            tracing::debug!(target_id = self.target.as_str(), "trial call abandoned, slot released");
            inner.phase = Phase::HalfOpen {
                trials: trials.saturating_sub(1).max(successes),
                successes,
            };
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.total_calls += 1;

        match inner.phase {
            Phase::Closed { .. } => {
                inner.phase = Phase::Closed {
                    consecutive_failures: 0,
                };
            }
            Phase::HalfOpen { trials, successes } => {
                let successes = successes + 1;
                if successes >= self.config.half_open_max_attempts.max(1) {
                    tracing::info!(target_id = self.target.as_str(), "circuit closed after successful trials");
                    inner.phase = Phase::Closed {
                        consecutive_failures: 0,
                    };
                } else {
                    inner.phase = Phase::HalfOpen { trials, successes };
                }
            }
            // A call admitted before the circuit opened; it does not prove recovery.
            Phase::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self, error: &str) {
        let mut inner = self.lock();
        inner.total_calls += 1;
        inner.total_failures += 1;
        inner.last_failure = Some(Instant::now());
        inner.last_error = Some(error.to_string());

        match inner.phase {
            Phase::Closed {
                consecutive_failures,
            } => {
                let count = consecutive_failures + 1;
                if count >= self.config.failure_threshold.max(1) {
                    tracing::warn!(
                        target_id = self.target.as_str(),
                        failures = count,
                        error,
                        "circuit opened"
                    );
                    inner.phase = Phase::Open;
                } else {
                    inner.phase = Phase::Closed {
                        consecutive_failures: count,
                    };
                }
            }
            Phase::HalfOpen { .. } => {
                tracing::warn!(target_id = self.target.as_str(), error, "trial call failed, circuit reopened");
                inner.phase = Phase::Open;
            }
            Phase::Open => {}
        }
    }

    pub fn status(&self) -> BreakerStatus {
        let inner = self.lock();
        let (state, consecutive_failures) = match inner.phase {
            Phase::Closed {
                consecutive_failures,
            } => (CircuitState::Closed, consecutive_failures),
            Phase::Open => (CircuitState::Open, 0),
            Phase::HalfOpen { .. } => (CircuitState::HalfOpen, 0),
        };
        BreakerStatus {
            target: self.target.clone(),
            state,
            consecutive_failures,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            last_error: inner.last_error.clone(),
        }
    }

    fn open_error(&self) -> CircuitOpenError {
        CircuitOpenError {
            target: self.target.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("circuit breaker lock poisoned")
    }
}
