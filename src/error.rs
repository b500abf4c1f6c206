//! Crate-wide error taxonomy
//!
//! Subsystem errors (`MultiplexerError`, `StoreError`) fold into
//! [`MindmuxError`] so the API boundary can map every failure onto a single
//! HTTP status table. Task-execution failures never reach HTTP; they are
//! converted into task state transitions inside the scheduler.

use crate::store::StoreError;
use crate::tmux::MultiplexerError;

/// Unified error type for the orchestration engine
#[derive(Debug, thiserror::Error)]
pub enum MindmuxError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Authentication required: {0}")]
    Authentication(String),

    #[error("Permission denied: {0}")]
    Authorization(String),

    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),

    #[error("Rate limit exceeded, retry in {retry_after_ms}ms")]
    RateLimit { retry_after_ms: u64 },

    #[error(transparent)]
    Multiplexer(#[from] MultiplexerError),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MindmuxError {
    /// HTTP status code for surfacing this error at the API boundary
    pub fn status_code(&self) -> u16 {
        match self {
            MindmuxError::Validation(_) => 400,
            MindmuxError::Authentication(_) => 401,
            MindmuxError::Authorization(_) => 403,
            MindmuxError::NotFound(..) => 404,
            MindmuxError::RateLimit { .. } => 429,
            MindmuxError::Timeout(_) => 504,
            MindmuxError::Multiplexer(_)
            | MindmuxError::Store(_)
            | MindmuxError::Internal(_) => 500,
        }
    }

    /// Message safe to return to API clients
    ///
    /// Internal, store and multiplexer failures are logged with full detail
    /// but never leak argv/stderr/SQL to callers.
    pub fn public_message(&self) -> String {
        match self {
            MindmuxError::Multiplexer(_)
            | MindmuxError::Store(_)
            | MindmuxError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        MindmuxError::Validation(msg.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        MindmuxError::NotFound(kind, id.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        MindmuxError::Internal(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, MindmuxError>;
