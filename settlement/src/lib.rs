//! Settlement Worker
//!
//! Consumes payment submissions and settles each one with an external payment
//! processor, recording the outcome for range summaries.
//!
//! # Architecture
//!
//! One dispatch loop per process pulls deliveries from a transport and hands
//! each to an independent unit of work gated by a bounded concurrency limiter.
//! Two deployments share the loop:
//!
//! 1. **Durable**: JetStream queue with outbox, Inbox ledger gate before and
//!    after the processor call, settlement log rows in PostgreSQL
//! 2. **Lightweight**: UDP datagrams, no ledger; settlement results are
//!    broadcast to every peer, and each peer's Aggregation Store converges
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use settlement::{SettlementHandler, SettlementWorker};
//! use message_bus::{MessageType, Transport};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn serve(
//!     transport: &dyn Transport,
//!     handler: Arc<dyn SettlementHandler>,
//! ) -> settlement::Result<()> {
//!     let cancel = CancellationToken::new();
//!     let deliveries = transport
//!         .receive(MessageType::PaymentSubmitted, cancel.clone())
//!         .await?;
//!     SettlementWorker::new(handler, 64).run(deliveries, cancel).await;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod handler;
pub mod ingress;
pub mod metrics;
pub mod peer;
pub mod worker;

// Re-exports
pub use config::{Config, DeploymentMode, PeerConfig, WorkerConfig};
pub use error::{Error, Result};
pub use handler::{BroadcastSettlement, DurableSettlement};
pub use ingress::submit;
pub use peer::PeerSync;
pub use worker::{SettlementHandler, SettlementWorker};
