//! Transport and AgentLookup trait definitions.
//!
//! Both use native async fn in traits (RPITIT, Rust 2024 edition).
//! Implementations live in agentflow-infra (e.g., `HttpTransport`,
//! `StaticAgentRegistry`); tests use scripted in-memory transports.

use agentflow_types::transport::{
    AgentEndpoint, DispatchOptions, DispatchOutcome, TransportError,
};
use agentflow_types::workflow::TaskPayload;

/// Delivers a task to an agent and returns its answer.
///
/// The engine treats `payload` as an opaque key/value bag. A transport must
/// honour `opts.timeout` where it can; the engine additionally bounds every
/// attempt with `tokio::time::timeout`.
pub trait Transport: Send + Sync {
    /// Short name for logs (e.g., "http").
    fn name(&self) -> &str;

    fn send(
        &self,
        agent_id: &str,
        intent: &str,
        payload: TaskPayload,
        opts: DispatchOptions,
    ) -> impl std::future::Future<Output = Result<DispatchOutcome, TransportError>> + Send;
}

/// Resolves an agent id to a deliverable endpoint.
///
/// Used by transports, not by the engine. Unknown ids fail with
/// `TransportError::AgentNotFound`, which reaches the engine as an ordinary
/// step failure.
pub trait AgentLookup: Send + Sync {
    fn resolve(
        &self,
        agent_id: &str,
    ) -> impl std::future::Future<Output = Result<AgentEndpoint, TransportError>> + Send;
}
