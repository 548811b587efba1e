//! Session types for the context store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A TTL-bounded bag of state shared across workflow executions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub state: Map<String, Value>,
}

/// Errors related to session operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session '{0}' not found")]
    NotFound(String),

    #[error("session '{0}' has expired")]
    Expired(String),
}
