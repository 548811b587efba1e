//! Infrastructure layer for AgentFlow.
//!
//! Implementations of the boundary traits defined in `agentflow-core`:
//! TOML config loading, a static agent registry, and an HTTP transport.

pub mod config;
pub mod http_transport;
pub mod registry;

pub use http_transport::HttpTransport;
pub use registry::StaticAgentRegistry;
