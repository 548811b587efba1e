//! Shared domain types for AgentFlow.
//!
//! This crate contains the types shared across the workspace: workflow
//! definitions and step results, lifecycle events, engine configuration,
//! the transport contract, and sessions.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod event;
pub mod session;
pub mod transport;
pub mod workflow;
