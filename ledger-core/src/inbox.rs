//! Inbox idempotency ledger
//!
//! Every delivery passes through [`InboxLedger::admit`] before any external call
//! and through [`InboxLedger::conclude`] after it. Admission is atomic per
//! source message id, so at most one processing attempt is active for an
//! identity and total attempts are bounded by `max_retries + 1`.
//!
//! | current state               | admission                          |
//! |-----------------------------|------------------------------------|
//! | no record                   | create `Running`, retries = 0      |
//! | `ReadyToRetry`, retries < max | retries += 1, `Running`          |
//! | `ReadyToRetry`, retries ≥ max | `Failed`, skip                   |
//! | `Running`/`Succeeded`/`Failed` | skip                            |

use crate::metrics::{INBOX_ADMISSIONS_TOTAL, INBOX_OUTCOMES_TOTAL};
use crate::storage::InboxStore;
use crate::types::{InboxRecord, InboxState};
use crate::Result;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Why a delivery was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another attempt for the same identity is running
    InFlight,
    /// Already settled
    AlreadySucceeded,
    /// Already failed permanently
    AlreadyFailed,
    /// This admission exhausted the retry budget and marked the record `Failed`
    RetriesExhausted,
}

impl SkipReason {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::InFlight => "in_flight",
            SkipReason::AlreadySucceeded => "already_succeeded",
            SkipReason::AlreadyFailed => "already_failed",
            SkipReason::RetriesExhausted => "retries_exhausted",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission decision for one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Process the delivery; the record is now `Running`
    Process(InboxRecord),
    /// Do not process
    Skip(SkipReason),
}

/// Outcome of re-evaluating an existing record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readmission {
    /// Record moved back to `Running` with one more retry counted
    Retry,
    /// Record moved to `Failed`
    Exhausted,
    /// Record unchanged
    Skip(SkipReason),
}

impl Readmission {
    /// Whether the record was modified and must be persisted
    pub fn is_change(&self) -> bool {
        !matches!(self, Readmission::Skip(_))
    }

    /// Convert into the admission seen by the caller
    pub fn into_admission(self, record: &InboxRecord) -> Admission {
        match self {
            Readmission::Retry => Admission::Process(record.clone()),
            Readmission::Exhausted => Admission::Skip(SkipReason::RetriesExhausted),
            Readmission::Skip(reason) => Admission::Skip(reason),
        }
    }
}

impl InboxRecord {
    /// New `Running` record for a never-seen identity
    pub fn first_sighting(source_message_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            source_message_id,
            created_at: now,
            updated_at: now,
            retries: 0,
            state: InboxState::Running,
        }
    }

    /// Re-evaluate an existing record for another attempt
    pub fn readmit(&mut self, max_retries: i32, now: DateTime<Utc>) -> Readmission {
        match self.state {
            InboxState::ReadyToRetry if self.retries < max_retries => {
                self.retries += 1;
                self.state = InboxState::Running;
                self.updated_at = now;
                Readmission::Retry
            }
            InboxState::ReadyToRetry => {
                self.state = InboxState::Failed;
                self.updated_at = now;
                Readmission::Exhausted
            }
            InboxState::Running => Readmission::Skip(SkipReason::InFlight),
            InboxState::Succeeded => Readmission::Skip(SkipReason::AlreadySucceeded),
            InboxState::Failed => Readmission::Skip(SkipReason::AlreadyFailed),
        }
    }

    /// Record the outcome of a `Running` attempt. Records in any other state are
    /// left untouched.
    pub fn conclude(
        &mut self,
        succeeded: bool,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> InboxState {
        if self.state != InboxState::Running {
            return self.state;
        }
        self.state = if succeeded {
            InboxState::Succeeded
        } else if self.retries < max_retries {
            InboxState::ReadyToRetry
        } else {
            InboxState::Failed
        };
        self.updated_at = now;
        self.state
    }

    /// Hand back the admission of a `Running` attempt that was interrupted
    /// before it reached an outcome. The record returns to `ReadyToRetry` with
    /// its retry count lowered by one, so the next admission runs with the
    /// same count as the interrupted attempt. Returns false for any other state.
    pub fn release(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != InboxState::Running {
            return false;
        }
        self.retries -= 1;
        self.state = InboxState::ReadyToRetry;
        self.updated_at = now;
        true
    }
}

/// Idempotency ledger over an [`InboxStore`]
#[derive(Clone)]
pub struct InboxLedger {
    store: Arc<dyn InboxStore>,
    max_retries: i32,
}

impl fmt::Debug for InboxLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboxLedger")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl InboxLedger {
    /// Create new ledger
    pub fn new(store: Arc<dyn InboxStore>, max_retries: i32) -> Self {
        Self { store, max_retries }
    }

    /// Configured retry bound
    pub fn max_retries(&self) -> i32 {
        self.max_retries
    }

    /// Gate a delivery before processing
    pub async fn admit(&self, source_message_id: Uuid) -> Result<Admission> {
        let admission = self.store.admit(source_message_id, self.max_retries).await?;

        let label = match &admission {
            Admission::Process(record) if record.retries == 0 => "first_attempt",
            Admission::Process(_) => "retry",
            Admission::Skip(reason) => reason.as_str(),
        };
        INBOX_ADMISSIONS_TOTAL.with_label_values(&[label]).inc();

        match &admission {
            Admission::Process(record) => {
                debug!(%source_message_id, retries = record.retries, "Inbox admitted delivery");
            }
            Admission::Skip(SkipReason::RetriesExhausted) => {
                warn!(%source_message_id, "Inbox retries exhausted, marked Failed");
            }
            Admission::Skip(reason) => {
                debug!(%source_message_id, %reason, "Inbox skipped delivery");
            }
        }
        Ok(admission)
    }

    /// Record the outcome of an admitted attempt
    pub async fn conclude(&self, source_message_id: Uuid, succeeded: bool) -> Result<InboxState> {
        let state = self
            .store
            .conclude(source_message_id, succeeded, self.max_retries)
            .await?;
        INBOX_OUTCOMES_TOTAL.with_label_values(&[state.as_str()]).inc();
        debug!(%source_message_id, %state, "Inbox attempt concluded");
        Ok(state)
    }

    /// Return an interrupted attempt to the retry queue without spending a retry
    pub async fn release(&self, source_message_id: Uuid) -> Result<InboxState> {
        let state = self.store.release(source_message_id).await?;
        INBOX_OUTCOMES_TOTAL.with_label_values(&["released"]).inc();
        debug!(%source_message_id, %state, "Inbox attempt released");
        Ok(state)
    }

    /// Current record for an identity
    pub async fn get(&self, source_message_id: Uuid) -> Result<Option<InboxRecord>> {
        self.store.get(source_message_id).await
    }
}
