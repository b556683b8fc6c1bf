//! Message Bus for payment submissions and settlement fan-out
//!
//! Provides a single send/receive contract with two interchangeable transports:
//! - Durable: NATS JetStream work queue with a local outbox staged before every publish
//! - Lightweight: best-effort UDP unicast plus sequential broadcast to static peers
//!
//! Consumers see both through [`Transport::receive`] as a lazy, restartable stream of
//! [`Delivery`] values. Each delivery carries its identity and an acknowledgement handle
//! settled by the consumer once processing is committed.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod client;
pub mod durable;
pub mod error;
pub mod message;
pub mod metrics;
pub mod outbox;
pub mod postgres;
pub mod relay;
pub mod transport;
pub mod types;
pub mod udp;

pub use client::{JetStreamClient, NatsConfig};
pub use durable::{AckMode, DurableTransport, QueueConsumer, QueuePublisher, ReceiveConfig};
pub use error::{Error, Result};
pub use message::Message;
pub use outbox::{MemoryOutboxStore, OutboxRecord, OutboxState, OutboxStore};
pub use postgres::PgOutboxStore;
pub use relay::{OutboxRelay, RelayConfig, RelayStats};
pub use transport::{
    Acknowledge, BroadcastReport, Broadcaster, Delivery, DeliveryStream, Disposition, Transport,
};
pub use types::{MessageType, Payload};
pub use udp::{UdpConfig, UdpTransport};
