// src/error.rs

//! Error types for the Bodhi core
//!
//! Every fallible library operation returns [`Result`]. Validation failures
//! are typed so callers can tell a locked update from a policy rejection or
//! an unavailable external service.

use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad caller input; nothing was mutated
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The update is claimed by a compose and cannot change until it finishes
    #[error("{0}")]
    LockedUpdate(String),

    /// A transition or policy rejection
    #[error("{0}")]
    Bodhi(String),

    #[error("A compose is already running for {release} {request}")]
    ComposeInProgress { release: String, request: String },

    /// Another worker process holds the compose lock file
    #[error("Another compose worker is running (lock held at {0})")]
    WorkerBusy(String),

    #[error("Invalid state transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    /// Gating has not reached a verdict yet; retry later
    #[error("Test gating not yet determined: {0}")]
    GatingPending(String),

    /// Timeout or server-side failure of an external service
    #[error("{service} is unavailable: {message}")]
    ServiceUnavailable { service: String, message: String },

    /// The external service refused the request
    #[error("{service} rejected the request: {message}")]
    ServiceRejected { service: String, message: String },
}

impl Error {
    /// Whether the caller may retry the same operation later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::GatingPending(_) | Error::ServiceUnavailable { .. }
        )
    }

    /// Whether the failure is a unique/primary-key constraint violation
    pub(crate) fn is_constraint_violation(&self) -> bool {
        match self {
            Error::Database(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::ConstraintViolation
            }
            _ => false,
        }
    }
}
