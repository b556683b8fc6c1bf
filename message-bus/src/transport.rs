//! Transport contract shared by the durable and lightweight variants

use crate::message::Message;
use crate::types::{MessageType, Payload};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Final outcome a consumer reports for one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processing is committed; the queue may forget the delivery
    Ack,
    /// Processing should be attempted again later (redeliver)
    Retry,
    /// Delivery can never be processed (drop, do not redeliver)
    Reject,
    /// Leave the delivery unsettled; a durable queue redelivers it once its
    /// ack deadline passes
    Defer,
}

impl Disposition {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Ack => "ack",
            Disposition::Retry => "retry",
            Disposition::Reject => "reject",
            Disposition::Defer => "defer",
        }
    }
}

/// Acknowledgement handle attached to a delivery by its transport
#[async_trait]
pub trait Acknowledge: Send + Sync {
    /// Report the disposition back to the source of the delivery
    async fn settle(&self, disposition: Disposition) -> Result<()>;
}

/// One received message: identity, raw payload, and an optional ack handle.
///
/// `payload` is the JSON of the message payload itself (never the envelope), so
/// both transports decode it the same way.
pub struct Delivery {
    /// Delivery identity (envelope id for durable, fresh per datagram for UDP)
    pub id: Uuid,
    /// Message type the delivery was received as
    pub message_type: MessageType,
    /// Raw payload JSON
    pub payload: Bytes,
    acker: Option<Box<dyn Acknowledge>>,
}

impl Delivery {
    /// Create a delivery without an acknowledgement handle
    pub fn new(id: Uuid, message_type: MessageType, payload: Bytes) -> Self {
        Self {
            id,
            message_type,
            payload,
            acker: None,
        }
    }

    /// Attach an acknowledgement handle
    pub fn with_acker(mut self, acker: Box<dyn Acknowledge>) -> Self {
        self.acker = Some(acker);
        self
    }

    /// Whether an unsettled acknowledgement handle is still attached
    pub fn is_acknowledgeable(&self) -> bool {
        self.acker.is_some()
    }

    /// Decode the payload as `T`
    pub fn decode<T: Payload>(&self) -> Result<T> {
        if self.message_type != T::MESSAGE_TYPE {
            return Err(Error::UnexpectedMessageType {
                expected: T::MESSAGE_TYPE.to_string(),
                actual: self.message_type.to_string(),
            });
        }
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Settle the delivery. A delivery already acknowledged on receipt (or one
    /// from a transport without acknowledgements) settles as a no-op, and
    /// [`Disposition::Defer`] never reaches the acknowledger.
    pub async fn settle(mut self, disposition: Disposition) -> Result<()> {
        match self.acker.take() {
            Some(_) if disposition == Disposition::Defer => Ok(()),
            Some(acker) => acker.settle(disposition).await,
            None => Ok(()),
        }
    }

    pub(crate) fn take_acker(&mut self) -> Option<Box<dyn Acknowledge>> {
        self.acker.take()
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("id", &self.id)
            .field("message_type", &self.message_type)
            .field("payload_len", &self.payload.len())
            .field("acknowledgeable", &self.acker.is_some())
            .finish()
    }
}

/// Lazy, unbounded stream of deliveries produced by [`Transport::receive`]
pub type DeliveryStream = ReceiverStream<Delivery>;

/// Send/receive contract implemented by every transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message. `message.id` is the identity hint carried to the consumer
    /// where the transport preserves it.
    async fn send(&self, message: Message, cancel: &CancellationToken) -> Result<()>;

    /// Start receiving messages of one type. The returned stream ends only when
    /// `cancel` fires; transport failures are retried inside the transport.
    async fn receive(
        &self,
        message_type: MessageType,
        cancel: CancellationToken,
    ) -> Result<DeliveryStream>;
}

/// Outcome of a best-effort fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers the payload was handed to
    pub delivered: usize,
    /// Peers that could not be reached
    pub failed: usize,
}

/// Best-effort fan-out to a static peer list
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Send the message to every peer; one unreachable peer never stops the rest
    async fn broadcast(&self, message: &Message, cancel: &CancellationToken) -> BroadcastReport;
}
