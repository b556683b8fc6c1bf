//! Outbox relay: periodically republishes records whose first publish failed

use crate::durable::QueuePublisher;
use crate::outbox::{OutboxRecord, OutboxState, OutboxStore};
use crate::Result;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Relay configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Sweep interval
    pub interval_secs: u64,

    /// Records loaded per sweep
    pub batch_size: usize,

    /// Relay attempts per record before it is left inert
    pub max_retries: i32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            batch_size: 100,
            max_retries: 3,
        }
    }
}

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Records republished and marked `Relayed`
    pub relayed: usize,
    /// Records whose republish failed again
    pub failed: usize,
}

/// Outbox relay
pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn QueuePublisher>,
    config: RelayConfig,
}

impl OutboxRelay {
    /// Create new relay
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn QueuePublisher>,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    /// Run one sweep over `ReadyToRetry` records. A record whose bookkeeping
    /// fails is counted as failed and the sweep moves on.
    pub async fn sweep(&self) -> Result<RelayStats> {
        let pending = self
            .store
            .ready_to_retry(self.config.max_retries, self.config.batch_size)
            .await?;

        let mut stats = RelayStats::default();
        for record in pending {
            match self.relay_one(&record).await {
                Ok(true) => stats.relayed += 1,
                Ok(false) => stats.failed += 1,
                Err(e) => {
                    error!(outbox_id = %record.id, error = %e, "Outbox bookkeeping failed");
                    stats.failed += 1;
                }
            }
        }

        if stats.relayed + stats.failed > 0 {
            info!(relayed = stats.relayed, failed = stats.failed, "Outbox sweep complete");
        }
        Ok(stats)
    }

    async fn relay_one(&self, record: &OutboxRecord) -> Result<bool> {
        let published = match record.to_message() {
            Ok(message) => self.publisher.publish(&message).await,
            Err(e) => Err(e),
        };

        match published {
            Ok(()) => {
                self.store.transition(record.id, OutboxState::Relayed).await?;
                debug!(outbox_id = %record.id, "Outbox record relayed");
                Ok(true)
            }
            Err(e) => {
                warn!(
                    outbox_id = %record.id,
                    retries = record.retries + 1,
                    error = %e,
                    "Relay attempt failed"
                );
                self.store.record_failed_retry(record.id).await?;
                Ok(false)
            }
        }
    }

    /// Sweep on a fixed interval until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(interval_secs = self.config.interval_secs, "Outbox relay started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "Outbox sweep failed");
                    }
                }
            }
        }
        info!("Outbox relay stopped");
    }
}
