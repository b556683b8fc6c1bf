//! Prometheus metrics for the settlement worker

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_int_gauge, CounterVec, IntGauge};

lazy_static! {
    /// Settlement units by deployment and outcome
    pub static ref SETTLEMENT_OUTCOMES_TOTAL: CounterVec = register_counter_vec!(
        "settlement_outcomes_total",
        "Settlement units by deployment and outcome",
        &["deployment", "outcome"]
    )
    .unwrap();

    /// Units currently holding a concurrency permit
    pub static ref UNITS_IN_FLIGHT: IntGauge = register_int_gauge!(
        "settlement_units_in_flight",
        "Settlement units currently holding a concurrency permit"
    )
    .unwrap();

    /// Peer settlement results ingested into the aggregation store
    pub static ref PEER_INGEST_TOTAL: CounterVec = register_counter_vec!(
        "settlement_peer_ingest_total",
        "Broadcast settlement results received from peers",
        &["outcome"]
    )
    .unwrap();
}
