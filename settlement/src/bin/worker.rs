use adapters::{HealthMonitor, HttpProcessor, ProcessorConnector, ProcessorRouter};
use ledger_core::{AggregationStore, InboxLedger, PgLedgerStore, Processor, SettlementLog};
use message_bus::{
    DeliveryStream, DurableTransport, JetStreamClient, MessageType, OutboxRelay, PgOutboxStore,
    Transport, UdpConfig, UdpTransport,
};
use settlement::{
    BroadcastSettlement, Config, DeploymentMode, DurableSettlement, PeerSync, SettlementHandler,
    SettlementWorker,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Settlement worker starting...");

    // Load configuration: optional TOML file, then environment overrides
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let mut config = Config::from_file(&path)?;
            config.apply_env()?;
            config
        }
        None => Config::from_env()?,
    };
    config.validate()?;

    info!(
        mode = %config.mode,
        max_concurrency = config.worker.max_concurrency,
        "Configuration loaded"
    );

    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();

    // Processors and health
    let primary: Arc<dyn ProcessorConnector> = Arc::new(HttpProcessor::new(
        Processor::Primary,
        config.processors.primary.clone(),
    )?);
    let secondary: Arc<dyn ProcessorConnector> = Arc::new(HttpProcessor::new(
        Processor::Secondary,
        config.processors.secondary.clone(),
    )?);
    let monitor = Arc::new(HealthMonitor::new(
        primary.clone(),
        secondary.clone(),
        config.health.clone(),
    ));
    let router = Arc::new(
        ProcessorRouter::new(primary, secondary, monitor.preference())
            .with_max_attempts(config.processors.max_attempts),
    );
    tracker.spawn({
        let monitor = monitor.clone();
        let cancel = cancel.clone();
        async move { monitor.run(cancel).await }
    });

    type Wiring = (Arc<dyn SettlementHandler>, DeliveryStream, Arc<dyn SettlementLog>);
    let (handler, deliveries, log): Wiring =
        match config.mode {
            DeploymentMode::Durable => {
                let pool = config.database.connect().await?;
                let ledger_store = Arc::new(PgLedgerStore::new(pool.clone()));
                ledger_store.ensure_schema().await?;
                let outbox = Arc::new(PgOutboxStore::new(pool));
                outbox.ensure_schema().await?;

                let nats = Arc::new(JetStreamClient::connect(config.nats.clone()).await?);
                let transport = DurableTransport::new(
                    nats.clone(),
                    nats.clone(),
                    outbox.clone(),
                    config.receive.clone(),
                );

                let relay = OutboxRelay::new(outbox, nats, config.relay.clone());
                tracker.spawn({
                    let cancel = cancel.clone();
                    async move { relay.run(cancel).await }
                });

                let deliveries = transport
                    .receive(MessageType::PaymentSubmitted, cancel.clone())
                    .await?;
                let ledger = InboxLedger::new(ledger_store.clone(), config.inbox.max_retries);
                let handler: Arc<dyn SettlementHandler> =
                    Arc::new(DurableSettlement::new(ledger, router, ledger_store.clone()));
                let log: Arc<dyn SettlementLog> = ledger_store;
                (handler, deliveries, log)
            }
            DeploymentMode::Lightweight => {
                let store = Arc::new(AggregationStore::new());
                let peer_transport = UdpTransport::new(UdpConfig {
                    listen_addr: config.peer.listen_addr.clone(),
                    ..config.udp.clone()
                });
                let peer_deliveries = peer_transport
                    .receive(MessageType::PaymentSettled, cancel.clone())
                    .await?;
                let peer = PeerSync::new(store.clone());
                tracker.spawn({
                    let cancel = cancel.clone();
                    async move { peer.run(peer_deliveries, cancel).await }
                });

                let udp = Arc::new(UdpTransport::new(config.udp.clone()));
                let deliveries = udp
                    .receive(MessageType::PaymentSubmitted, cancel.clone())
                    .await?;
                let handler: Arc<dyn SettlementHandler> =
                    Arc::new(BroadcastSettlement::new(router, udp));
                let log: Arc<dyn SettlementLog> = store;
                (handler, deliveries, log)
            }
        };

    let worker = SettlementWorker::new(handler, config.worker.max_concurrency);
    tracker.spawn({
        let cancel = cancel.clone();
        async move { worker.run(deliveries, cancel).await }
    });
    tracker.close();

    info!("Settlement worker initialized successfully");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    cancel.cancel();
    tracker.wait().await;

    let summary = log.summary(None, None).await?;
    info!(
        primary_requests = summary.primary.total_requests,
        primary_amount = %summary.primary.total_amount,
        secondary_requests = summary.secondary.total_requests,
        secondary_amount = %summary.secondary.total_amount,
        "Settlement worker stopped"
    );

    Ok(())
}
