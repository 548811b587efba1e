//! Step dispatch: retry around circuit breaker around a timed transport call.

use std::sync::Arc;
use std::time::Duration;

use agentflow_types::config::RetryConfig;
use agentflow_types::transport::{
    DispatchOptions, DispatchOutcome, PaymentRequirements, TransportError,
};
use agentflow_types::workflow::{RollbackAction, TaskPayload, WorkflowStep};
use serde_json::Value;
use thiserror::Error;

use super::retry::{RetryOutcome, RetryPolicy};
use crate::resilience::{BreakerRegistry, CircuitOpenError};
use crate::transport::BoxTransport;

/// Why a single dispatch did not produce data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("agent '{agent_id}' requires payment of {} {}", .requirements.amount, .requirements.asset)]
    PaymentRequired {
        agent_id: String,
        requirements: PaymentRequirements,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DispatchError {
    /// Payment demands and unknown agents fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            DispatchError::PaymentRequired { .. }
                | DispatchError::Transport(TransportError::AgentNotFound(_))
        )
    }
}

/// Sends step and rollback tasks through the fault-tolerance layers.
///
/// Shared by `Arc` with parallel member tasks.
#[derive(Debug)]
pub struct StepDispatcher {
    transport: Arc<BoxTransport>,
    breakers: Arc<BreakerRegistry>,
    retry: RetryConfig,
    default_timeout: Duration,
}

impl StepDispatcher {
    pub fn new(
        transport: Arc<BoxTransport>,
        breakers: Arc<BreakerRegistry>,
        retry: RetryConfig,
        default_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            breakers,
            retry,
            default_timeout,
        }
    }

    /// Per-attempt budget for `step`.
    pub fn step_timeout(&self, step: &WorkflowStep) -> Duration {
        step.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout)
    }

    /// Dispatch a step with its own retry budget.
    pub async fn dispatch_step(&self, step: &WorkflowStep, payload: TaskPayload) -> RetryOutcome<Value, DispatchError> {
        let timeout = self.step_timeout(step);
        let retry = self.retry.with_max_retries(step.retries);
        let agent_id = step.agent_id.as_str();
        let intent = step.intent.as_str();

        RetryPolicy::retry_if(
            move || self.attempt(agent_id, intent, payload.clone(), timeout),
            &retry,
            &step.id,
            DispatchError::is_retryable,
        )
        .await
    }

    /// Dispatch a compensation once, without retry.
    pub async fn dispatch_rollback(&self, action: &RollbackAction, payload: TaskPayload) -> Result<Value, DispatchError> {
        self.attempt(&action.agent_id, &action.intent, payload, self.default_timeout)
            .await
    }

    /// One attempt: breaker admission, then the transport call under a timeout.
    ///
    /// A payment demand is a healthy answer as far as the breaker is
    /// concerned; it is turned into an error only after the breaker has
    /// recorded the call.
    pub async fn attempt(
        &self,
        agent_id: &str,
        intent: &str,
        payload: TaskPayload,
        timeout: Duration,
    ) -> Result<Value, DispatchError> {
        let breaker = self.breakers.get(agent_id);
        let outcome = breaker
            .execute(|| async move {
                let send = self
                    .transport
                    .send(agent_id, intent, payload, DispatchOptions { timeout });
                match tokio::time::timeout(timeout, send).await {
                    Ok(result) => result.map_err(DispatchError::from),
                    Err(_) => Err(DispatchError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                }
            })
            .await?;

        match outcome {
            DispatchOutcome::Completed { data } => Ok(data),
            DispatchOutcome::PaymentRequired { requirements } => {
                tracing::info!(agent_id, intent, amount = requirements.amount.as_str(), "agent requires payment");
                Err(DispatchError::PaymentRequired {
                    agent_id: agent_id.to_string(),
                    requirements,
                })
            }
        }
    }
}
