//! Transport contract types.
//!
//! The engine dispatches every step through a transport it does not own.
//! These types describe that boundary: what a dispatch returns, how it can
//! fail, and where an agent lives.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Per-dispatch options passed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Budget for this single attempt.
    pub timeout: Duration,
}

/// Terms an agent demands before it will perform a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequirements {
    /// Amount in the smallest unit of `asset`.
    pub amount: String,
    /// Asset or currency identifier.
    pub asset: String,
    /// Where payment should be sent.
    pub pay_to: String,
    /// Free-form extra terms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Successful transport-level outcome of a dispatch.
///
/// "Payment required" is a normal, typed answer from an agent rather than
/// an error, so callers match on it instead of inspecting error strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The agent performed the task and returned data.
    Completed { data: Value },
    /// The agent refused until the stated terms are met.
    PaymentRequired { requirements: PaymentRequirements },
}

impl DispatchOutcome {
    pub fn completed(data: Value) -> Self {
        DispatchOutcome::Completed { data }
    }
}

/// Errors raised by transports and agent lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("agent '{0}' not found")]
    AgentNotFound(String),

    #[error("network error: {0}")]
    Network(String),

    /// The agent answered, but with an error.
    #[error("agent rejected task: {0}")]
    Rejected(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// A resolved, deliverable address for an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEndpoint {
    pub agent_id: String,
    /// Base URL (or other transport address) of the agent.
    pub endpoint: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::AgentNotFound("billing".to_string());
        assert_eq!(err.to_string(), "agent 'billing' not found");
        let err = TransportError::Network("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_dispatch_outcome_tagged_serde() {
        let outcome = DispatchOutcome::completed(json!({"ok": true}));
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["outcome"], "completed");
        assert_eq!(value["data"]["ok"], true);

        let parsed: DispatchOutcome = serde_json::from_value(json!({
            "outcome": "payment_required",
            "requirements": {"amount": "100", "asset": "usdc", "pay_to": "0xabc"}
        }))
        .unwrap();
        assert!(matches!(parsed, DispatchOutcome::PaymentRequired { .. }));
    }
}
