//! Prometheus metrics for the ledger
//!
//! - `ledger_inbox_admissions_total` - admission decisions by outcome
//! - `ledger_inbox_outcomes_total` - inbox states reached after an attempt
//! - `ledger_aggregation_inserts_total` - Aggregation Store inserts (inserted/duplicate)

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, CounterVec};

lazy_static! {
    /// Inbox admission decisions
    pub static ref INBOX_ADMISSIONS_TOTAL: CounterVec = register_counter_vec!(
        "ledger_inbox_admissions_total",
        "Inbox admission decisions",
        &["decision"]
    )
    .unwrap();

    /// Inbox states reached after an attempt
    pub static ref INBOX_OUTCOMES_TOTAL: CounterVec = register_counter_vec!(
        "ledger_inbox_outcomes_total",
        "Inbox states reached after an attempt",
        &["state"]
    )
    .unwrap();

    /// Aggregation Store inserts
    pub static ref AGGREGATION_INSERTS_TOTAL: CounterVec = register_counter_vec!(
        "ledger_aggregation_inserts_total",
        "Aggregation Store inserts",
        &["outcome"]
    )
    .unwrap();
}
