//! Dispatch loop with bounded concurrency

use crate::metrics::UNITS_IN_FLIGHT;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use message_bus::Delivery;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Processes one delivery to completion, including its acknowledgement
#[async_trait]
pub trait SettlementHandler: Send + Sync + 'static {
    /// Handle a single delivery; the cancellation token is shared with the
    /// dispatch loop
    async fn handle(&self, delivery: Delivery, cancel: CancellationToken);
}

/// Pulls deliveries and runs each one as an independent unit of work.
///
/// The loop never waits on a unit. Each unit acquires a permit from the
/// limiter before it touches the handler, and the permit is released when the
/// unit ends however it ends.
pub struct SettlementWorker {
    handler: Arc<dyn SettlementHandler>,
    limiter: Arc<Semaphore>,
    tracker: TaskTracker,
    max_concurrency: usize,
}

impl fmt::Debug for SettlementWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettlementWorker")
            .field("max_concurrency", &self.max_concurrency)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl SettlementWorker {
    /// Create new worker allowing `max_concurrency` units at once
    pub fn new(handler: Arc<dyn SettlementHandler>, max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            handler,
            limiter: Arc::new(Semaphore::new(max_concurrency)),
            tracker: TaskTracker::new(),
            max_concurrency,
        }
    }

    /// Units currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.max_concurrency - self.limiter.available_permits()
    }

    /// Run until cancelled or the stream ends, then wait for every spawned
    /// unit to finish
    pub async fn run<S>(&self, mut deliveries: S, cancel: CancellationToken)
    where
        S: Stream<Item = Delivery> + Unpin + Send,
    {
        info!(max_concurrency = self.max_concurrency, "Settlement worker started");
        let mut dispatched: u64 = 0;

        loop {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => break,
                next = deliveries.next() => match next {
                    Some(delivery) => delivery,
                    None => {
                        debug!("Delivery stream ended");
                        break;
                    }
                },
            };

            dispatched += 1;
            let handler = self.handler.clone();
            let limiter = self.limiter.clone();
            let cancel = cancel.clone();
            self.tracker.spawn(async move {
                let Ok(_permit) = limiter.acquire_owned().await else {
                    return;
                };
                UNITS_IN_FLIGHT.inc();
                let _guard = InFlightGuard;
                handler.handle(delivery, cancel).await;
            });
        }

        self.tracker.close();
        info!(dispatched, pending = self.tracker.len(), "Draining settlement units");
        self.tracker.wait().await;
        info!("Settlement worker stopped");
    }
}

struct InFlightGuard;

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        UNITS_IN_FLIGHT.dec();
    }
}
