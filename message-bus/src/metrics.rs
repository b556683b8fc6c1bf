//! Prometheus metrics for message bus

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

lazy_static! {
    /// Total messages published
    pub static ref MESSAGE_PUBLISH_TOTAL: CounterVec = register_counter_vec!(
        "message_bus_publish_total",
        "Total messages published",
        &["transport", "message_type", "status"]
    )
    .unwrap();

    /// Message publish duration
    pub static ref MESSAGE_PUBLISH_DURATION: HistogramVec = register_histogram_vec!(
        "message_bus_publish_duration_seconds",
        "Message publish duration in seconds",
        &["transport", "message_type"]
    )
    .unwrap();

    /// Total messages received
    pub static ref MESSAGE_RECEIVE_TOTAL: CounterVec = register_counter_vec!(
        "message_bus_receive_total",
        "Total messages received",
        &["transport", "message_type", "status"]
    )
    .unwrap();

    /// Broadcast deliveries per peer outcome
    pub static ref BROADCAST_TOTAL: CounterVec = register_counter_vec!(
        "message_bus_broadcast_total",
        "Broadcast datagrams sent to peers",
        &["status"]
    )
    .unwrap();

    /// Outbox state transitions
    pub static ref OUTBOX_TRANSITIONS_TOTAL: CounterVec = register_counter_vec!(
        "message_bus_outbox_transitions_total",
        "Outbox record state transitions",
        &["state"]
    )
    .unwrap();

    /// Receive loop reconnects
    pub static ref RECEIVE_RECONNECT_TOTAL: CounterVec = register_counter_vec!(
        "message_bus_receive_reconnect_total",
        "Receive loop reconnects after transport errors",
        &["message_type"]
    )
    .unwrap();
}
