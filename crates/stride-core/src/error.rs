//! Error types for stride-core

use thiserror::Error;

/// Result type alias using stride-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in stride-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Same idempotency key resubmitted with a different payload
    #[error("Idempotency key was reused with a different payload")]
    IdempotencyMismatch,

    /// Malformed sync cursor token
    #[error("Invalid sync cursor: {0}")]
    InvalidCursor(String),
}
