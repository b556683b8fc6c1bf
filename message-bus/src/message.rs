//! Message envelope for the durable transport

use crate::types::{MessageType, Payload};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message ID (UUIDv7 for ordering), stable across redeliveries and relays
    pub id: Uuid,

    /// Message type
    pub message_type: MessageType,

    /// Payload (JSON-serialized)
    pub payload: serde_json::Value,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Wrap a typed payload in a fresh envelope
    pub fn new<T: Payload>(payload: &T) -> Result<Self> {
        Ok(Self {
            id: Uuid::now_v7(),
            message_type: T::MESSAGE_TYPE,
            payload: serde_json::to_value(payload)?,
            timestamp: Utc::now(),
        })
    }

    /// Key the envelope on a caller-supplied identity, such as a client
    /// correlation id, so resubmissions collapse onto one delivery identity
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Decode the payload as `T`, checking the envelope type first
    pub fn decode<T: Payload>(&self) -> Result<T> {
        if self.message_type != T::MESSAGE_TYPE {
            return Err(Error::UnexpectedMessageType {
                expected: T::MESSAGE_TYPE.to_string(),
                actual: self.message_type.to_string(),
            });
        }
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Get NATS subject for this message
    pub fn subject(&self) -> &'static str {
        self.message_type.subject()
    }
}
