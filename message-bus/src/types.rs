//! Type definitions for message bus

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Client payment submission awaiting settlement
    PaymentSubmitted,
    /// Settlement result fanned out to aggregating peers
    PaymentSettled,
}

impl MessageType {
    /// Stable type name, stored in the outbox `type` column
    pub fn name(&self) -> &'static str {
        match self {
            MessageType::PaymentSubmitted => "PaymentSubmitted",
            MessageType::PaymentSettled => "PaymentSettled",
        }
    }

    /// Get NATS subject for this message type
    pub fn subject(&self) -> &'static str {
        match self {
            MessageType::PaymentSubmitted => "payments.submitted",
            MessageType::PaymentSettled => "payments.settled",
        }
    }

    /// Get JetStream stream name for this message type
    pub fn stream_name(&self) -> &'static str {
        match self {
            MessageType::PaymentSubmitted => "PAYMENT_SUBMISSIONS",
            MessageType::PaymentSettled => "PAYMENT_SETTLEMENTS",
        }
    }

    /// Durable consumer name shared by every worker instance (non-exclusive)
    pub fn consumer_name(&self) -> &'static str {
        match self {
            MessageType::PaymentSubmitted => "payment-submitted-workers",
            MessageType::PaymentSettled => "payment-settled-peers",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MessageType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PaymentSubmitted" => Ok(MessageType::PaymentSubmitted),
            "PaymentSettled" => Ok(MessageType::PaymentSettled),
            other => Err(crate::Error::InvalidValue(format!("message type '{}'", other))),
        }
    }
}

/// Static serialization descriptor for a message carried by the bus.
///
/// Every payload type names its [`MessageType`] at compile time, which fixes the
/// queue, subject and outbox type name it travels under.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync {
    /// Message type this payload travels as
    const MESSAGE_TYPE: MessageType;
}
