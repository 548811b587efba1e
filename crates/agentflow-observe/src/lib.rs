//! Observability setup for AgentFlow binaries.
//!
//! Installs the global `tracing` subscriber: an `EnvFilter`, a fmt layer
//! (text or JSON), and optionally an OpenTelemetry bridge.

pub mod tracing_setup;

pub use tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};
