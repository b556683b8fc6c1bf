//! # Payrail Adapters
//!
//! Payment processor connectivity layer with:
//! - HTTP connector per processor (payment submission + health probe)
//! - Health Monitor publishing a single preferred processor each tick
//! - Router settling a submission with alternation between processors on failure
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐      ┌──────────────────────────┐
//! │      Health Monitor      │─────▶│    PreferenceHandle      │
//! │ (probe both every tick)  │      │ (one atomic value)       │
//! └────────────┬─────────────┘      └────────────┬─────────────┘
//!              │                                 │ read
//!     ┌────────┴────────┐               ┌────────▼─────────┐
//!     │                 │               │ Processor Router │
//! ┌───▼─────┐     ┌─────▼─────┐         │ (alternation)    │
//! │ Primary │     │ Secondary │◀────────┴──────────────────┘
//! └─────────┘     └───────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod config;
pub mod connector;
pub mod error;
pub mod health;
pub mod http;
pub mod metrics;
pub mod router;
pub mod types;

pub use config::{HealthConfig, ProcessorEndpoint, ProcessorsConfig};
pub use connector::ProcessorConnector;
pub use error::{Error, Result};
pub use health::{select_processor, HealthMonitor, PreferenceHandle};
pub use http::HttpProcessor;
pub use router::ProcessorRouter;
pub use types::*;

/// Default processor attempts per submission
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default health poll interval (seconds)
pub const DEFAULT_HEALTH_INTERVAL_SECONDS: u64 = 5;

/// Default per-probe timeout (milliseconds)
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2_000;

/// Default processor request timeout (milliseconds)
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
