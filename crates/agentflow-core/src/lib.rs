//! AgentFlow engine.
//!
//! Builds validated workflow graphs over remote agents and executes them:
//! dependency resolution, parallel groups, retry with backoff, per-agent
//! circuit breakers, compensating rollback, and TTL-bounded session state.
//! Transports and agent lookup are traits; concrete adapters live in
//! `agentflow-infra`.

pub mod event;
pub mod resilience;
pub mod session;
pub mod transport;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testutil;
