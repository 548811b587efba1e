//! Session state shared across workflow executions.

pub mod store;

pub use store::{ContextStore, SessionStore};
