//! Settlement units for the two deployments

use crate::metrics::SETTLEMENT_OUTCOMES_TOTAL;
use crate::worker::SettlementHandler;
use adapters::ProcessorRouter;
use async_trait::async_trait;
use ledger_core::{Admission, InboxLedger, InboxState, SettlementLog, SkipReason, Submission};
use message_bus::{Broadcaster, Delivery, Disposition, Message};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

fn decode_submission(delivery: &Delivery) -> Option<Submission> {
    let submission = match delivery.decode::<Submission>() {
        Ok(submission) => submission,
        Err(e) => {
            error!(delivery_id = %delivery.id, error = %e, "Malformed submission");
            return None;
        }
    };
    if let Err(e) = submission.validate() {
        error!(delivery_id = %delivery.id, error = %e, "Invalid submission");
        return None;
    }
    Some(submission)
}

/// Durable unit: Inbox admission, processor call, settlement log append,
/// Inbox conclusion, then ack/nak/term of the delivery.
pub struct DurableSettlement {
    ledger: InboxLedger,
    router: Arc<ProcessorRouter>,
    log: Arc<dyn SettlementLog>,
}

impl fmt::Debug for DurableSettlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableSettlement")
            .field("router", &self.router)
            .field("max_retries", &self.ledger.max_retries())
            .finish_non_exhaustive()
    }
}

impl DurableSettlement {
    /// Create new durable unit
    pub fn new(
        ledger: InboxLedger,
        router: Arc<ProcessorRouter>,
        log: Arc<dyn SettlementLog>,
    ) -> Self {
        Self {
            ledger,
            router,
            log,
        }
    }

    /// Run the unit and pick the delivery disposition
    pub async fn process(&self, delivery: &Delivery, cancel: &CancellationToken) -> Disposition {
        let Some(submission) = decode_submission(delivery) else {
            return Disposition::Reject;
        };

        match self.ledger.admit(delivery.id).await {
            Ok(Admission::Process(record)) => {
                debug!(
                    delivery_id = %delivery.id,
                    correlation_id = %submission.correlation_id,
                    retries = record.retries,
                    "Submission admitted"
                );
            }
            Ok(Admission::Skip(SkipReason::InFlight)) => {
                // Acking would remove the message the running attempt may still nak
                debug!(delivery_id = %delivery.id, "Attempt in flight, delivery deferred");
                return Disposition::Defer;
            }
            Ok(Admission::Skip(reason)) => {
                debug!(delivery_id = %delivery.id, reason = reason.as_str(), "Submission skipped");
                return Disposition::Ack;
            }
            Err(e) => {
                error!(delivery_id = %delivery.id, error = %e, "Inbox admission failed");
                return Disposition::Retry;
            }
        }

        let settled = self.router.settle(&submission, cancel).await;
        if settled.is_none() && cancel.is_cancelled() {
            match self.ledger.release(delivery.id).await {
                Ok(_) => info!(delivery_id = %delivery.id, "Attempt interrupted, released"),
                Err(e) => error!(delivery_id = %delivery.id, error = %e, "Inbox release failed"),
            }
            return Disposition::Retry;
        }

        let succeeded = match settled {
            Some(result) => match self.log.append(&result).await {
                Ok(inserted) => {
                    if !inserted {
                        warn!(
                            correlation_id = %result.correlation_id,
                            "Settlement already logged for correlation id"
                        );
                    }
                    true
                }
                Err(e) => {
                    error!(
                        correlation_id = %result.correlation_id,
                        error = %e,
                        "Settlement log append failed"
                    );
                    false
                }
            },
            None => false,
        };

        match self.ledger.conclude(delivery.id, succeeded).await {
            Ok(InboxState::Succeeded) => Disposition::Ack,
            Ok(InboxState::ReadyToRetry) | Ok(InboxState::Running) => Disposition::Retry,
            Ok(InboxState::Failed) => {
                warn!(
                    delivery_id = %delivery.id,
                    correlation_id = %submission.correlation_id,
                    "Submission failed permanently"
                );
                Disposition::Reject
            }
            Err(e) => {
                error!(delivery_id = %delivery.id, error = %e, "Inbox conclusion failed");
                Disposition::Retry
            }
        }
    }
}

#[async_trait]
impl SettlementHandler for DurableSettlement {
    async fn handle(&self, delivery: Delivery, cancel: CancellationToken) {
        let delivery_id: Uuid = delivery.id;
        let disposition = self.process(&delivery, &cancel).await;
        SETTLEMENT_OUTCOMES_TOTAL
            .with_label_values(&["durable", disposition.as_str()])
            .inc();

        if let Err(e) = delivery.settle(disposition).await {
            warn!(%delivery_id, error = %e, "Failed to acknowledge delivery");
        }
    }
}

/// Lightweight unit: processor call, then broadcast of the result to every
/// peer. Exhausted submissions are dropped.
pub struct BroadcastSettlement {
    router: Arc<ProcessorRouter>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl fmt::Debug for BroadcastSettlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastSettlement")
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

impl BroadcastSettlement {
    /// Create new lightweight unit
    pub fn new(router: Arc<ProcessorRouter>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            router,
            broadcaster,
        }
    }

    async fn process(&self, delivery: &Delivery, cancel: &CancellationToken) -> &'static str {
        let Some(submission) = decode_submission(delivery) else {
            return "malformed";
        };

        let Some(result) = self.router.settle(&submission, cancel).await else {
            warn!(
                correlation_id = %submission.correlation_id,
                "Submission dropped after exhausting attempts"
            );
            return "dropped";
        };

        let message = match Message::new(&result) {
            Ok(message) => message,
            Err(e) => {
                error!(
                    correlation_id = %result.correlation_id,
                    error = %e,
                    "Failed to encode settlement"
                );
                return "encode_error";
            }
        };

        let report = self.broadcaster.broadcast(&message, cancel).await;
        info!(
            correlation_id = %result.correlation_id,
            processor = %result.processor,
            delivered = report.delivered,
            failed = report.failed,
            "Settlement broadcast"
        );
        "settled"
    }
}

#[async_trait]
impl SettlementHandler for BroadcastSettlement {
    async fn handle(&self, delivery: Delivery, cancel: CancellationToken) {
        let outcome = self.process(&delivery, &cancel).await;
        SETTLEMENT_OUTCOMES_TOTAL
            .with_label_values(&["lightweight", outcome])
            .inc();

        // Datagram deliveries carry no acknowledger; this is a no-op
        if let Err(e) = delivery.settle(Disposition::Ack).await {
            debug!(error = %e, "Acknowledge on lightweight delivery failed");
        }
    }
}
