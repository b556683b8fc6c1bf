//! Adapter metrics

use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge, CounterVec, HistogramVec,
    IntGauge,
};

lazy_static::lazy_static! {
    pub static ref PROCESSOR_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "processor_requests_total",
        "Total processor requests",
        &["processor", "operation", "status"]
    )
    .unwrap();

    pub static ref PROCESSOR_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "processor_request_duration_seconds",
        "Processor request duration",
        &["processor", "operation"]
    )
    .unwrap();

    pub static ref PREFERRED_PROCESSOR: IntGauge = register_int_gauge!(
        "processor_preferred",
        "Preferred processor (0=primary, 1=secondary)"
    )
    .unwrap();

    pub static ref SETTLEMENT_ATTEMPTS_TOTAL: CounterVec = register_counter_vec!(
        "processor_settlement_attempts_total",
        "Settlement attempts by attempt number and outcome",
        &["attempt", "processor", "status"]
    )
    .unwrap();
}
