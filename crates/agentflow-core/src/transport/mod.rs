//! Transport seam between the engine and remote agents.
//!
//! - `provider` -- the `Transport` and `AgentLookup` traits
//! - `box_transport` -- `BoxTransport` type-erased wrapper for dynamic dispatch

pub mod box_transport;
pub mod provider;

pub use box_transport::BoxTransport;
pub use provider::{AgentLookup, Transport};
