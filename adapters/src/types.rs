//! Processor wire types

use chrono::{DateTime, Utc};
use ledger_core::{Processor, Submission};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of a processor payment request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    /// Submission correlation id
    pub correlation_id: Uuid,
    /// Amount
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    /// Settlement timestamp, identical across attempts
    pub requested_at: DateTime<Utc>,
}

impl PaymentRequest {
    /// Build the request for a submission
    pub fn for_submission(submission: &Submission, requested_at: DateTime<Utc>) -> Self {
        Self {
            correlation_id: submission.correlation_id,
            amount: submission.amount,
            requested_at,
        }
    }
}

/// Body of a processor health response.
///
/// The processors publish the eligibility flag under the name `failing`, but a
/// `true` value marks the processor as eligible for traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Processor may receive traffic
    #[serde(rename = "failing")]
    pub eligible: bool,
    /// Reported minimum response time
    #[serde(rename = "minResponseTime")]
    pub min_response_time_ms: u64,
}

/// Health of one processor for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthSample {
    /// Processor
    pub processor: Processor,
    /// Eligible this tick
    pub eligible: bool,
    /// Reported minimum response time (0 when the probe failed)
    pub min_response_time_ms: u64,
}

impl HealthSample {
    /// Fail-closed sample used when a probe fails or has not run yet
    pub fn ineligible(processor: Processor) -> Self {
        Self {
            processor,
            eligible: false,
            min_response_time_ms: 0,
        }
    }

    /// Sample from a successful probe
    pub fn from_report(processor: Processor, report: HealthReport) -> Self {
        Self {
            processor,
            eligible: report.eligible,
            min_response_time_ms: report.min_response_time_ms,
        }
    }
}
