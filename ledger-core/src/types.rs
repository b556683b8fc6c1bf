//! Core types for settlement bookkeeping
//!
//! Money is carried as [`Decimal`] and serialized as a JSON number so the wire
//! format matches what clients and processors exchange.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use message_bus::{MessageType, Payload};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// External payment processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Processor {
    /// Preferred processor
    Primary,
    /// Failover processor
    Secondary,
}

impl Processor {
    /// The other processor
    pub fn other(self) -> Self {
        match self {
            Processor::Primary => Processor::Secondary,
            Processor::Secondary => Processor::Primary,
        }
    }

    /// Storage and label representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Processor::Primary => "primary",
            Processor::Secondary => "secondary",
        }
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Processor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "primary" => Ok(Processor::Primary),
            "secondary" => Ok(Processor::Secondary),
            other => Err(Error::InvalidValue(format!("processor '{}'", other))),
        }
    }
}

/// Client payment submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    /// Client-supplied unique id
    pub correlation_id: Uuid,
    /// Amount to settle (> 0)
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

impl Submission {
    /// Create a validated submission
    pub fn new(correlation_id: Uuid, amount: Decimal) -> Result<Self> {
        let submission = Self {
            correlation_id,
            amount,
        };
        submission.validate()?;
        Ok(submission)
    }

    /// Check the amount is strictly positive
    pub fn validate(&self) -> Result<()> {
        if self.amount <= Decimal::ZERO {
            return Err(Error::InvalidSubmission(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }
        Ok(())
    }
}

impl Payload for Submission {
    const MESSAGE_TYPE: MessageType = MessageType::PaymentSubmitted;
}

/// Successfully settled submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResult {
    /// Submission correlation id
    pub correlation_id: Uuid,
    /// Processor that accepted the payment
    pub processor: Processor,
    /// Settled amount
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    /// Timestamp captured before the first processor attempt
    pub settled_at: DateTime<Utc>,
}

impl Payload for SettlementResult {
    const MESSAGE_TYPE: MessageType = MessageType::PaymentSettled;
}

/// Totals for one processor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorSummary {
    /// Number of settled payments
    pub total_requests: u64,
    /// Sum of settled amounts
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
}

/// Settlement totals per processor over a time range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Primary processor totals
    pub primary: ProcessorSummary,
    /// Secondary processor totals
    pub secondary: ProcessorSummary,
}

impl Summary {
    /// Add one settled payment
    pub fn record(&mut self, processor: Processor, amount: Decimal) {
        let bucket = self.bucket_mut(processor);
        bucket.total_requests += 1;
        bucket.total_amount += amount;
    }

    fn bucket_mut(&mut self, processor: Processor) -> &mut ProcessorSummary {
        match processor {
            Processor::Primary => &mut self.primary,
            Processor::Secondary => &mut self.secondary,
        }
    }
}

impl<'a> FromIterator<&'a SettlementResult> for Summary {
    fn from_iter<I: IntoIterator<Item = &'a SettlementResult>>(iter: I) -> Self {
        let mut summary = Summary::default();
        for result in iter {
            summary.record(result.processor, result.amount);
        }
        summary
    }
}

/// Inbox record state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InboxState {
    /// A processing attempt is active
    Running,
    /// Settled (terminal)
    Succeeded,
    /// Retries exhausted (terminal)
    Failed,
    /// Last attempt failed; eligible for another
    ReadyToRetry,
}

impl InboxState {
    /// Whether the state is permanent
    pub fn is_terminal(&self) -> bool {
        matches!(self, InboxState::Succeeded | InboxState::Failed)
    }

    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            InboxState::Running => "Running",
            InboxState::Succeeded => "Succeeded",
            InboxState::Failed => "Failed",
            InboxState::ReadyToRetry => "ReadyToRetry",
        }
    }
}

impl fmt::Display for InboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InboxState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Running" => Ok(InboxState::Running),
            "Succeeded" => Ok(InboxState::Succeeded),
            "Failed" => Ok(InboxState::Failed),
            "ReadyToRetry" => Ok(InboxState::ReadyToRetry),
            other => Err(Error::InvalidValue(format!("inbox state '{}'", other))),
        }
    }
}

/// Idempotency record for one received message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxRecord {
    /// Record ID
    pub id: Uuid,
    /// Delivery identity this record guards (unique)
    pub source_message_id: Uuid,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last state change
    pub updated_at: DateTime<Utc>,
    /// Re-admissions so far
    pub retries: i32,
    /// Current state
    pub state: InboxState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_processor_other() {
        assert_eq!(Processor::Primary.other(), Processor::Secondary);
        assert_eq!(Processor::Secondary.other(), Processor::Primary);
    }

    #[test]
    fn test_submission_rejects_non_positive_amount() {
        assert!(Submission::new(Uuid::new_v4(), dec!(0)).is_err());
        assert!(Submission::new(Uuid::new_v4(), dec!(-1.50)).is_err());
        assert!(Submission::new(Uuid::new_v4(), dec!(0.01)).is_ok());
    }

    #[test]
    fn test_submission_wire_format() {
        let id = Uuid::new_v4();
        let json = format!(r#"{{"correlationId":"{}","amount":19.90}}"#, id);
        let submission: Submission = serde_json::from_str(&json).unwrap();
        assert_eq!(submission.correlation_id, id);
        assert_eq!(submission.amount, dec!(19.9));
    }

    #[test]
    fn test_summary_wire_format() {
        let mut summary = Summary::default();
        summary.record(Processor::Primary, dec!(19.90));

        let value = serde_json::to_value(summary).unwrap();
        assert_eq!(value["primary"]["totalRequests"], 1);
        assert_eq!(value["primary"]["totalAmount"], 19.9);
        assert_eq!(value["secondary"]["totalRequests"], 0);
        assert_eq!(value["secondary"]["totalAmount"], 0.0);
    }

    #[test]
    fn test_inbox_state_terminal() {
        assert!(InboxState::Succeeded.is_terminal());
        assert!(InboxState::Failed.is_terminal());
        assert!(!InboxState::Running.is_terminal());
        assert!(!InboxState::ReadyToRetry.is_terminal());
        assert_eq!("ReadyToRetry".parse::<InboxState>().unwrap(), InboxState::ReadyToRetry);
    }
}
