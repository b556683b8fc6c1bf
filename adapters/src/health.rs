//! Health Monitor: fixed-interval dual-processor poll publishing one preference

use crate::config::HealthConfig;
use crate::connector::ProcessorConnector;
use crate::metrics::PREFERRED_PROCESSOR;
use crate::types::HealthSample;
use ledger_core::Processor;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PRIMARY: u8 = 0;
const SECONDARY: u8 = 1;

/// Shared, lock-free preferred processor. Written by the Health Monitor, read
/// by any number of settlement attempts; staleness is bounded by one tick.
#[derive(Debug, Clone)]
pub struct PreferenceHandle(Arc<AtomicU8>);

impl PreferenceHandle {
    /// Handle starting at `initial`
    pub fn new(initial: Processor) -> Self {
        let handle = Self(Arc::new(AtomicU8::new(PRIMARY)));
        handle.set(initial);
        handle
    }

    /// Current preference
    pub fn get(&self) -> Processor {
        match self.0.load(Ordering::Relaxed) {
            SECONDARY => Processor::Secondary,
            _ => Processor::Primary,
        }
    }

    /// Publish a new preference
    pub fn set(&self, processor: Processor) {
        let value = match processor {
            Processor::Primary => PRIMARY,
            Processor::Secondary => SECONDARY,
        };
        self.0.store(value, Ordering::Relaxed);
    }
}

impl Default for PreferenceHandle {
    fn default() -> Self {
        Self::new(Processor::Primary)
    }
}

/// Selection rule, in precedence order: primary if eligible, else secondary if
/// eligible, else primary. Reported latency never overrides an eligible primary.
pub fn select_processor(primary: &HealthSample, secondary: &HealthSample) -> Processor {
    if primary.eligible {
        Processor::Primary
    } else if secondary.eligible {
        Processor::Secondary
    } else {
        Processor::Primary
    }
}

/// Health Monitor
pub struct HealthMonitor {
    primary: Arc<dyn ProcessorConnector>,
    secondary: Arc<dyn ProcessorConnector>,
    preference: PreferenceHandle,
    latest: RwLock<(HealthSample, HealthSample)>,
    config: HealthConfig,
}

impl fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("preference", &self.preference.get())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    /// Create new monitor; the preference starts at Primary
    pub fn new(
        primary: Arc<dyn ProcessorConnector>,
        secondary: Arc<dyn ProcessorConnector>,
        config: HealthConfig,
    ) -> Self {
        Self {
            primary,
            secondary,
            preference: PreferenceHandle::default(),
            latest: RwLock::new((
                HealthSample::ineligible(Processor::Primary),
                HealthSample::ineligible(Processor::Secondary),
            )),
            config,
        }
    }

    /// Read accessor for the published preference
    pub fn preference(&self) -> PreferenceHandle {
        self.preference.clone()
    }

    /// Samples from the most recent tick (primary, secondary)
    pub fn latest(&self) -> (HealthSample, HealthSample) {
        *self.latest.read()
    }

    /// Probe both processors once and publish the resulting preference
    pub async fn tick(&self) -> Processor {
        let timeout = self.config.probe_timeout();
        // Independent probes: a stall in one never delays the other
        let (primary, secondary) = tokio::join!(
            probe(self.primary.as_ref(), timeout),
            probe(self.secondary.as_ref(), timeout),
        );

        let selected = select_processor(&primary, &secondary);
        let previous = self.preference.get();
        self.preference.set(selected);
        *self.latest.write() = (primary, secondary);
        PREFERRED_PROCESSOR.set(match selected {
            Processor::Primary => 0,
            Processor::Secondary => 1,
        });

        if selected != previous {
            info!(from = %previous, to = %selected, "Preferred processor changed");
        }
        debug!(
            primary_eligible = primary.eligible,
            secondary_eligible = secondary.eligible,
            preferred = %selected,
            "Health tick"
        );
        selected
    }

    /// Poll on a fixed interval until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = self.config.interval_secs, "Health monitor started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.tick() => {}
                    }
                }
            }
        }
        info!("Health monitor stopped");
    }
}

/// Probe one processor; any failure yields an ineligible sample
async fn probe(connector: &dyn ProcessorConnector, timeout: Duration) -> HealthSample {
    let processor = connector.processor();
    match tokio::time::timeout(timeout, connector.health()).await {
        Ok(Ok(report)) => HealthSample::from_report(processor, report),
        Ok(Err(e)) => {
            warn!(%processor, error = %e, "Health probe failed");
            HealthSample::ineligible(processor)
        }
        Err(_) => {
            warn!(%processor, timeout_ms = timeout.as_millis() as u64, "Health probe timed out");
            HealthSample::ineligible(processor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HealthReport, PaymentRequest};
    use crate::{Error, Result};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    struct FakeProcessor {
        processor: Processor,
        eligible: AtomicBool,
        reachable: bool,
        stall: Option<Duration>,
    }

    impl FakeProcessor {
        fn new(processor: Processor, eligible: bool) -> Arc<Self> {
            Arc::new(Self {
                processor,
                eligible: AtomicBool::new(eligible),
                reachable: true,
                stall: None,
            })
        }
    }

    #[async_trait]
    impl ProcessorConnector for FakeProcessor {
        fn processor(&self) -> Processor {
            self.processor
        }

        async fn submit_payment(&self, _request: &PaymentRequest) -> Result<()> {
            Ok(())
        }

        async fn health(&self) -> Result<HealthReport> {
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            if !self.reachable {
                return Err(Error::Rejected {
                    processor: self.processor,
                    status: 503,
                });
            }
            Ok(HealthReport {
                eligible: self.eligible.load(Ordering::SeqCst),
                min_response_time_ms: 10,
            })
        }
    }

    fn sample(processor: Processor, eligible: bool, latency: u64) -> HealthSample {
        HealthSample {
            processor,
            eligible,
            min_response_time_ms: latency,
        }
    }

    #[test]
    fn test_selection_rule() {
        use Processor::*;
        let cases = [
            (true, true, Primary),
            (true, false, Primary),
            (false, true, Secondary),
            (false, false, Primary),
        ];
        for (p, s, expected) in cases {
            assert_eq!(
                select_processor(&sample(Primary, p, 10), &sample(Secondary, s, 10)),
                expected
            );
        }
    }

    #[test]
    fn test_latency_never_overrides_eligible_primary() {
        let primary = sample(Processor::Primary, true, 5_000);
        let secondary = sample(Processor::Secondary, true, 1);
        assert_eq!(select_processor(&primary, &secondary), Processor::Primary);
    }

    #[tokio::test]
    async fn test_tick_fails_over_to_secondary() {
        let primary = FakeProcessor::new(Processor::Primary, false);
        let secondary = FakeProcessor::new(Processor::Secondary, true);
        let monitor = HealthMonitor::new(primary, secondary, HealthConfig::default());

        assert_eq!(monitor.tick().await, Processor::Secondary);
        assert_eq!(monitor.preference().get(), Processor::Secondary);
    }

    #[tokio::test]
    async fn test_tick_recovers_to_primary() {
        let primary = FakeProcessor::new(Processor::Primary, false);
        let secondary = FakeProcessor::new(Processor::Secondary, true);
        let monitor = HealthMonitor::new(primary.clone(), secondary, HealthConfig::default());

        monitor.tick().await;
        primary.eligible.store(true, Ordering::SeqCst);
        monitor.tick().await;

        assert_eq!(monitor.preference().get(), Processor::Primary);
        assert!(monitor.latest().0.eligible);
    }

    #[tokio::test]
    async fn test_unreachable_processor_is_ineligible() {
        let primary = Arc::new(FakeProcessor {
            processor: Processor::Primary,
            eligible: AtomicBool::new(true),
            reachable: false,
            stall: None,
        });
        let secondary = FakeProcessor::new(Processor::Secondary, true);
        let monitor = HealthMonitor::new(primary, secondary, HealthConfig::default());

        assert_eq!(monitor.tick().await, Processor::Secondary);
        let (p, _) = monitor.latest();
        assert!(!p.eligible);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_probe_does_not_block_the_other() {
        let primary = Arc::new(FakeProcessor {
            processor: Processor::Primary,
            eligible: AtomicBool::new(true),
            reachable: true,
            stall: Some(Duration::from_secs(60)),
        });
        let secondary = FakeProcessor::new(Processor::Secondary, true);
        let config = HealthConfig {
            interval_secs: 5,
            probe_timeout_ms: 100,
        };
        let monitor = HealthMonitor::new(primary, secondary, config);

        let started = tokio::time::Instant::now();
        assert_eq!(monitor.tick().await, Processor::Secondary);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let monitor = Arc::new(HealthMonitor::new(
            FakeProcessor::new(Processor::Primary, false),
            FakeProcessor::new(Processor::Secondary, true),
            HealthConfig::default(),
        ));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let monitor = monitor.clone();
            let cancel = cancel.clone();
            async move { monitor.run(cancel).await }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(monitor.preference().get(), Processor::Secondary);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_preference_handle_shared() {
        let handle = PreferenceHandle::default();
        let reader = handle.clone();
        handle.set(Processor::Secondary);
        assert_eq!(reader.get(), Processor::Secondary);
    }
}
