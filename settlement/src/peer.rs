//! Peer aggregation: ingest broadcast settlement results

use crate::metrics::PEER_INGEST_TOTAL;
use futures::{Stream, StreamExt};
use ledger_core::{AggregationStore, SettlementResult};
use message_bus::Delivery;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Feeds settlement results received from peers into the local store.
///
/// Every peer, the sender included, receives the same broadcast, so each
/// store converges on the same set of results. Duplicates are absorbed by
/// first-writer-wins insertion.
#[derive(Debug, Clone)]
pub struct PeerSync {
    store: Arc<AggregationStore>,
}

impl PeerSync {
    /// Create new peer sync over `store`
    pub fn new(store: Arc<AggregationStore>) -> Self {
        Self { store }
    }

    /// Store this sync writes to
    pub fn store(&self) -> Arc<AggregationStore> {
        self.store.clone()
    }

    /// Ingest one delivery; malformed payloads are logged and dropped.
    /// Returns true when a new result was stored.
    pub fn ingest(&self, delivery: &Delivery) -> bool {
        let result = match delivery.decode::<SettlementResult>() {
            Ok(result) => result,
            Err(e) => {
                PEER_INGEST_TOTAL.with_label_values(&["malformed"]).inc();
                warn!(
                    delivery_id = %delivery.id,
                    error = %e,
                    "Dropping malformed settlement broadcast"
                );
                return false;
            }
        };

        let correlation_id = result.correlation_id;
        let inserted = self.store.insert(result);
        let outcome = if inserted { "stored" } else { "duplicate" };
        PEER_INGEST_TOTAL.with_label_values(&[outcome]).inc();
        debug!(%correlation_id, outcome, "Peer settlement ingested");
        inserted
    }

    /// Drain `deliveries` until cancelled or the stream ends
    pub async fn run<S>(&self, mut deliveries: S, cancel: CancellationToken)
    where
        S: Stream<Item = Delivery> + Unpin + Send,
    {
        info!("Peer sync started");
        loop {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => break,
                next = deliveries.next() => match next {
                    Some(delivery) => delivery,
                    None => break,
                },
            };
            self.ingest(&delivery);
        }
        info!(stored = self.store.len(), "Peer sync stopped");
    }
}
