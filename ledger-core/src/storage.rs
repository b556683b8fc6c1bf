//! Storage traits and in-memory backends

use crate::inbox::Admission;
use crate::types::{InboxRecord, InboxState, SettlementResult, Summary};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

/// Inbox persistence. Both operations must be atomic per `source_message_id`.
#[async_trait]
pub trait InboxStore: Send + Sync {
    /// Create the record on first sighting, or readmit an existing one
    async fn admit(&self, source_message_id: Uuid, max_retries: i32) -> Result<Admission>;

    /// Record the outcome of a running attempt and return the new state
    async fn conclude(
        &self,
        source_message_id: Uuid,
        succeeded: bool,
        max_retries: i32,
    ) -> Result<InboxState>;

    /// Return a running attempt to `ReadyToRetry` without counting it
    async fn release(&self, source_message_id: Uuid) -> Result<InboxState>;

    /// Fetch a record
    async fn get(&self, source_message_id: Uuid) -> Result<Option<InboxRecord>>;
}

/// Append-only log of settled payments
#[async_trait]
pub trait SettlementLog: Send + Sync {
    /// Record a settlement. Returns `false` when the correlation id was already logged.
    async fn append(&self, result: &SettlementResult) -> Result<bool>;

    /// Totals per processor over the inclusive range `[from, to]`; open ends are unbounded
    async fn summary(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Summary>;
}

/// In-memory inbox
#[derive(Debug, Default)]
pub struct MemoryInboxStore {
    records: DashMap<Uuid, InboxRecord>,
}

impl MemoryInboxStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InboxStore for MemoryInboxStore {
    async fn admit(&self, source_message_id: Uuid, max_retries: i32) -> Result<Admission> {
        let now = Utc::now();
        // The entry guard holds the shard lock for the whole decision
        match self.records.entry(source_message_id) {
            Entry::Vacant(vacant) => {
                let record = InboxRecord::first_sighting(source_message_id, now);
                vacant.insert(record.clone());
                Ok(Admission::Process(record))
            }
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                let readmission = record.readmit(max_retries, now);
                Ok(readmission.into_admission(record))
            }
        }
    }

    async fn conclude(
        &self,
        source_message_id: Uuid,
        succeeded: bool,
        max_retries: i32,
    ) -> Result<InboxState> {
        let mut record = self
            .records
            .get_mut(&source_message_id)
            .ok_or(Error::RecordNotFound(source_message_id))?;
        Ok(record.conclude(succeeded, max_retries, Utc::now()))
    }

    async fn release(&self, source_message_id: Uuid) -> Result<InboxState> {
        let mut record = self
            .records
            .get_mut(&source_message_id)
            .ok_or(Error::RecordNotFound(source_message_id))?;
        record.release(Utc::now());
        Ok(record.state)
    }

    async fn get(&self, source_message_id: Uuid) -> Result<Option<InboxRecord>> {
        Ok(self
            .records
            .get(&source_message_id)
            .map(|r| r.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_concurrent_admission_admits_once() {
        let store = Arc::new(MemoryInboxStore::new());
        let id = Uuid::new_v4();

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.admit(id, 3).await.unwrap() })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), Admission::Process(_)) {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn test_conclude_unknown_record() {
        let store = MemoryInboxStore::new();
        assert!(matches!(
            store.conclude(Uuid::new_v4(), true, 3).await,
            Err(Error::RecordNotFound(_))
        ));
    }
}
