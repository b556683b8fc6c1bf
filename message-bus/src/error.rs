//! Error types for message bus

use thiserror::Error;

/// Message bus error
#[derive(Debug, Error)]
pub enum Error {
    /// Connection error (broker or socket unreachable)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Publish error
    #[error("Publish error: {0}")]
    Publish(String),

    /// Subscribe error
    #[error("Subscribe error: {0}")]
    Subscribe(String),

    /// Acknowledgement error
    #[error("Acknowledgement error: {0}")]
    Acknowledge(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Outbox storage error
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Socket IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Envelope carried a different message type than the caller asked for
    #[error("Unexpected message type: expected {expected}, got {actual}")]
    UnexpectedMessageType {
        /// Requested type
        expected: String,
        /// Type found in the envelope
        actual: String,
    },

    /// Outbox state may only move forward
    #[error("Invalid outbox transition for {id}: {from} -> {to}")]
    InvalidTransition {
        /// Outbox record ID
        id: uuid::Uuid,
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// Outbox record not found
    #[error("Outbox record not found: {0}")]
    RecordNotFound(uuid::Uuid),

    /// Unknown enum value read back from storage
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether the error came from a cancelled operation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
