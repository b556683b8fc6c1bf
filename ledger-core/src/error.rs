//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (PostgreSQL)
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Submission failed validation
    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    /// Inbox record not found
    #[error("Inbox record not found: {0}")]
    RecordNotFound(uuid::Uuid),

    /// Unknown enum value read back from storage
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
