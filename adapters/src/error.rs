//! Error types for adapters

use ledger_core::Processor;
use thiserror::Error;

/// Result type for adapter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Adapter errors
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level HTTP failure (connect, body decode)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Processor answered with a non-success status
    #[error("Processor {processor} rejected request with status {status}")]
    Rejected {
        /// Processor
        processor: Processor,
        /// HTTP status code
        status: u16,
    },

    /// Timeout
    #[error("Timeout after {millis}ms: {operation}")]
    Timeout {
        /// Timeout duration
        millis: u64,
        /// Operation
        operation: String,
    },

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
