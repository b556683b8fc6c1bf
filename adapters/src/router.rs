//! Processor router: settle a submission with alternation on failure

use crate::connector::ProcessorConnector;
use crate::health::PreferenceHandle;
use crate::metrics::SETTLEMENT_ATTEMPTS_TOTAL;
use crate::types::PaymentRequest;
use crate::{Error, DEFAULT_MAX_ATTEMPTS};
use chrono::Utc;
use ledger_core::{Processor, SettlementResult, Submission};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Routes settlement attempts between the two processors.
///
/// Attempt 1 goes to the current preference; every later attempt switches to
/// the other processor without re-reading health and without delay. The
/// settlement timestamp is captured once and reused for every attempt.
pub struct ProcessorRouter {
    primary: Arc<dyn ProcessorConnector>,
    secondary: Arc<dyn ProcessorConnector>,
    preference: PreferenceHandle,
    max_attempts: u32,
}

impl fmt::Debug for ProcessorRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRouter")
            .field("preference", &self.preference.get())
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl ProcessorRouter {
    /// Create new router with the default attempt budget
    pub fn new(
        primary: Arc<dyn ProcessorConnector>,
        secondary: Arc<dyn ProcessorConnector>,
        preference: PreferenceHandle,
    ) -> Self {
        Self {
            primary,
            secondary,
            preference,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Override the attempt budget
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    fn connector(&self, processor: Processor) -> &dyn ProcessorConnector {
        match processor {
            Processor::Primary => self.primary.as_ref(),
            Processor::Secondary => self.secondary.as_ref(),
        }
    }

    /// Try to settle `submission`. Returns `None` when every attempt failed or
    /// the operation was cancelled; processor errors never escape.
    pub async fn settle(
        &self,
        submission: &Submission,
        cancel: &CancellationToken,
    ) -> Option<SettlementResult> {
        let settled_at = Utc::now();
        let request = PaymentRequest::for_submission(submission, settled_at);
        let mut processor = self.preference.get();

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                processor = processor.other();
            }
            if cancel.is_cancelled() {
                debug!(correlation_id = %submission.correlation_id, "Settlement cancelled");
                return None;
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                result = self.connector(processor).submit_payment(&request) => result,
            };

            let attempt_label = attempt.to_string();
            match outcome {
                Ok(()) => {
                    SETTLEMENT_ATTEMPTS_TOTAL
                        .with_label_values(&[attempt_label.as_str(), processor.as_str(), "success"])
                        .inc();
                    debug!(
                        correlation_id = %submission.correlation_id,
                        %processor,
                        attempt,
                        "Payment settled"
                    );
                    return Some(SettlementResult {
                        correlation_id: submission.correlation_id,
                        processor,
                        amount: submission.amount,
                        settled_at,
                    });
                }
                Err(Error::Cancelled) => return None,
                Err(e) => {
                    SETTLEMENT_ATTEMPTS_TOTAL
                        .with_label_values(&[attempt_label.as_str(), processor.as_str(), "error"])
                        .inc();
                    warn!(
                        correlation_id = %submission.correlation_id,
                        %processor,
                        attempt,
                        error = %e,
                        "Processor attempt failed"
                    );
                }
            }
        }

        None
    }
}
