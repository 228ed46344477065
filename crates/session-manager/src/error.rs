//! Error types for session management.

use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("provisioning failed: {0}")]
    Provisioning(String),

    #[error("node {0} never became ready")]
    NotReady(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
