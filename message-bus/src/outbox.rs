//! Outbox records staged locally before every durable publish

use crate::message::Message;
use crate::metrics::OUTBOX_TRANSITIONS_TOTAL;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Outbox record state. Transitions only move forward:
/// `Queued -> ReadyToRetry -> Relayed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutboxState {
    /// Written and handed to the broker
    Queued,
    /// First publish failed; waiting for the relay sweep
    ReadyToRetry,
    /// Republished by the relay sweep
    Relayed,
}

impl OutboxState {
    fn rank(&self) -> u8 {
        match self {
            OutboxState::Queued => 0,
            OutboxState::ReadyToRetry => 1,
            OutboxState::Relayed => 2,
        }
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: OutboxState) -> bool {
        next.rank() > self.rank()
    }

    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxState::Queued => "Queued",
            OutboxState::ReadyToRetry => "ReadyToRetry",
            OutboxState::Relayed => "Relayed",
        }
    }
}

impl fmt::Display for OutboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Queued" => Ok(OutboxState::Queued),
            "ReadyToRetry" => Ok(OutboxState::ReadyToRetry),
            "Relayed" => Ok(OutboxState::Relayed),
            other => Err(Error::InvalidValue(format!("outbox state '{}'", other))),
        }
    }
}

/// Locally staged copy of a published message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Record ID, equal to the envelope ID
    pub id: Uuid,
    /// Message type name
    pub message_type: String,
    /// Serialized envelope
    pub payload: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last state change
    pub updated_at: DateTime<Utc>,
    /// Relay attempts so far
    pub retries: i32,
    /// Current state
    pub state: OutboxState,
}

impl OutboxRecord {
    /// Stage a message in `Queued` state
    pub fn queued(message: &Message) -> Result<Self> {
        let now = Utc::now();
        Ok(Self {
            id: message.id,
            message_type: message.message_type.name().to_string(),
            payload: serde_json::to_string(message)?,
            created_at: now,
            updated_at: now,
            retries: 0,
            state: OutboxState::Queued,
        })
    }

    /// Rebuild the staged envelope
    pub fn to_message(&self) -> Result<Message> {
        Ok(serde_json::from_str(&self.payload)?)
    }

    /// Apply a forward state change
    pub fn transition(&mut self, next: OutboxState, now: DateTime<Utc>) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                id: self.id,
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        self.updated_at = now;
        Ok(())
    }
}

/// Outbox persistence
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Stage a record. Returns false, leaving the stored record untouched,
    /// when a record with the same id already exists.
    async fn insert(&self, record: &OutboxRecord) -> Result<bool>;

    /// Move a record forward to `state`
    async fn transition(&self, id: Uuid, state: OutboxState) -> Result<()>;

    /// Count one failed relay attempt
    async fn record_failed_retry(&self, id: Uuid) -> Result<()>;

    /// Oldest `ReadyToRetry` records with `retries < max_retries`
    async fn ready_to_retry(&self, max_retries: i32, limit: usize) -> Result<Vec<OutboxRecord>>;

    /// Fetch a record
    async fn get(&self, id: Uuid) -> Result<Option<OutboxRecord>>;
}

/// In-memory outbox
#[derive(Debug, Default)]
pub struct MemoryOutboxStore {
    records: DashMap<Uuid, OutboxRecord>,
}

impl MemoryOutboxStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of staged records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing has been staged
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl OutboxStore for MemoryOutboxStore {
    async fn insert(&self, record: &OutboxRecord) -> Result<bool> {
        match self.records.entry(record.id) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                OUTBOX_TRANSITIONS_TOTAL
                    .with_label_values(&[record.state.as_str()])
                    .inc();
                Ok(true)
            }
        }
    }

    async fn transition(&self, id: Uuid, state: OutboxState) -> Result<()> {
        let mut record = self.records.get_mut(&id).ok_or(Error::RecordNotFound(id))?;
        record.transition(state, Utc::now())?;
        OUTBOX_TRANSITIONS_TOTAL
            .with_label_values(&[state.as_str()])
            .inc();
        Ok(())
    }

    async fn record_failed_retry(&self, id: Uuid) -> Result<()> {
        let mut record = self.records.get_mut(&id).ok_or(Error::RecordNotFound(id))?;
        record.retries += 1;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn ready_to_retry(&self, max_retries: i32, limit: usize) -> Result<Vec<OutboxRecord>> {
        let mut ready: Vec<OutboxRecord> = self
            .records
            .iter()
            .filter(|r| r.state == OutboxState::ReadyToRetry && r.retries < max_retries)
            .map(|r| r.value().clone())
            .collect();
        ready.sort_by_key(|r| r.created_at);
        ready.truncate(limit);
        Ok(ready)
    }

    async fn get(&self, id: Uuid) -> Result<Option<OutboxRecord>> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }
}
