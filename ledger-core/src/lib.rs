//! Payrail Ledger Core
//!
//! Settlement bookkeeping shared by every worker deployment.
//!
//! # Architecture
//!
//! - **Inbox**: idempotency ledger keyed by delivery identity, bounding retries per message
//! - **Settlement Log**: append-only record of settled payments with range summaries
//! - **Aggregation Store**: in-memory dedup map plus time-ordered index for peers
//!   that converge through broadcast instead of a shared database
//!
//! # Invariants
//!
//! - One inbox record per source message id
//! - Retries never exceed the configured maximum
//! - `Succeeded` and `Failed` inbox records are terminal
//! - The Aggregation Store holds at most one result per correlation id

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod aggregation;
pub mod config;
pub mod error;
pub mod inbox;
pub mod metrics;
pub mod postgres;
pub mod storage;
pub mod types;

// Re-exports
pub use aggregation::AggregationStore;
pub use config::{DatabaseConfig, InboxConfig};
pub use error::{Error, Result};
pub use inbox::{Admission, InboxLedger, Readmission, SkipReason};
pub use postgres::PgLedgerStore;
pub use storage::{InboxStore, MemoryInboxStore, SettlementLog};
pub use types::{
    InboxRecord, InboxState, Processor, ProcessorSummary, SettlementResult, Submission, Summary,
};
