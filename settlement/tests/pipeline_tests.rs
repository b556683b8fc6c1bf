//! End-to-end settlement pipeline tests over in-memory fakes

use adapters::{
    Error as AdapterError, HealthReport, PaymentRequest, PreferenceHandle, ProcessorConnector,
    ProcessorRouter, Result as AdapterResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use ledger_core::{
    Admission, AggregationStore, InboxLedger, InboxState, MemoryInboxStore, Processor, Submission,
};
use message_bus::{
    Acknowledge, Delivery, Disposition, DurableTransport, MemoryOutboxStore, Message, MessageType,
    QueueConsumer, QueuePublisher, ReceiveConfig, Result as BusResult, Transport, UdpConfig,
    UdpTransport,
};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use settlement::{submit, BroadcastSettlement, DurableSettlement, PeerSync, SettlementWorker};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type Outcomes = Arc<Mutex<Vec<(Uuid, Disposition)>>>;

/// Work queue with redelivery on nak
struct MemoryQueue {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    outcomes: Outcomes,
}

impl MemoryQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            outcomes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn outcomes(&self) -> Vec<(Uuid, Disposition)> {
        self.outcomes.lock().clone()
    }
}

struct QueueAcker {
    id: Uuid,
    envelope: Vec<u8>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    outcomes: Outcomes,
}

#[async_trait]
impl Acknowledge for QueueAcker {
    async fn settle(&self, disposition: Disposition) -> BusResult<()> {
        self.outcomes.lock().push((self.id, disposition));
        if disposition == Disposition::Retry {
            let _ = self.tx.send(self.envelope.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl QueuePublisher for MemoryQueue {
    async fn publish(&self, message: &Message) -> BusResult<()> {
        self.tx
            .send(message.to_bytes()?)
            .map_err(|e| message_bus::Error::Publish(e.to_string()))
    }
}

#[async_trait]
impl QueueConsumer for MemoryQueue {
    async fn open(
        &self,
        _message_type: MessageType,
    ) -> BusResult<BoxStream<'static, BusResult<Delivery>>> {
        let rx = self
            .rx
            .lock()
            .take()
            .ok_or_else(|| message_bus::Error::Connection("already open".into()))?;
        let tx = self.tx.clone();
        let outcomes = self.outcomes.clone();

        Ok(UnboundedReceiverStream::new(rx)
            .map(move |envelope| {
                let message = Message::from_bytes(&envelope)?;
                let payload = serde_json::to_vec(&message.payload)?;
                let acker = QueueAcker {
                    id: message.id,
                    envelope,
                    tx: tx.clone(),
                    outcomes: outcomes.clone(),
                };
                Ok(
                    Delivery::new(message.id, message.message_type, Bytes::from(payload))
                        .with_acker(Box::new(acker)),
                )
            })
            .boxed())
    }
}

struct FakeProcessor {
    processor: Processor,
    succeed: AtomicBool,
    calls: AtomicUsize,
    delay: Duration,
}

impl FakeProcessor {
    fn new(processor: Processor, succeed: bool) -> Arc<Self> {
        Self::with_delay(processor, succeed, Duration::ZERO)
    }

    fn with_delay(processor: Processor, succeed: bool, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            processor,
            succeed: AtomicBool::new(succeed),
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessorConnector for FakeProcessor {
    fn processor(&self) -> Processor {
        self.processor
    }

    async fn submit_payment(&self, _request: &PaymentRequest) -> AdapterResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.succeed.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AdapterError::Rejected {
                processor: self.processor,
                status: 500,
            })
        }
    }

    async fn health(&self) -> AdapterResult<HealthReport> {
        Ok(HealthReport {
            eligible: true,
            min_response_time_ms: 0,
        })
    }
}

struct DurableHarness {
    queue: Arc<MemoryQueue>,
    transport: DurableTransport,
    inbox: InboxLedger,
    log: Arc<AggregationStore>,
    cancel: CancellationToken,
    worker: tokio::task::JoinHandle<()>,
}

impl DurableHarness {
    async fn start(
        primary: Arc<FakeProcessor>,
        secondary: Arc<FakeProcessor>,
        max_concurrency: usize,
    ) -> Self {
        let queue = Arc::new(MemoryQueue::new());
        let transport = DurableTransport::new(
            queue.clone(),
            queue.clone(),
            Arc::new(MemoryOutboxStore::new()),
            ReceiveConfig {
                reconnect_delay_ms: 10,
                ..ReceiveConfig::default()
            },
        );
        let inbox = InboxLedger::new(Arc::new(MemoryInboxStore::new()), 3);
        let log = Arc::new(AggregationStore::new());
        let router = Arc::new(ProcessorRouter::new(
            primary,
            secondary,
            PreferenceHandle::new(Processor::Primary),
        ));
        let handler = Arc::new(DurableSettlement::new(inbox.clone(), router, log.clone()));

        let cancel = CancellationToken::new();
        let deliveries = transport
            .receive(MessageType::PaymentSubmitted, cancel.clone())
            .await
            .unwrap();
        let worker_cancel = cancel.clone();
        let worker = tokio::spawn(async move {
            SettlementWorker::new(handler, max_concurrency)
                .run(deliveries, worker_cancel)
                .await;
        });

        Self {
            queue,
            transport,
            inbox,
            log,
            cancel,
            worker,
        }
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.worker.await.unwrap();
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_submission_settles_with_preferred_processor() {
    let primary = FakeProcessor::new(Processor::Primary, true);
    let secondary = FakeProcessor::new(Processor::Secondary, true);
    let harness = DurableHarness::start(primary.clone(), secondary.clone(), 8).await;

    let submission = Submission::new(Uuid::new_v4(), dec!(19.90)).unwrap();
    let id = submit(&harness.transport, &submission, &CancellationToken::new())
        .await
        .unwrap();

    wait_for(|| !harness.queue.outcomes().is_empty()).await;
    assert_eq!(harness.queue.outcomes(), vec![(id, Disposition::Ack)]);

    let summary = harness.log.summary(None, None);
    assert_eq!(summary.primary.total_requests, 1);
    assert_eq!(summary.primary.total_amount, dec!(19.90));
    assert_eq!(summary.secondary.total_requests, 0);
    assert_eq!(summary.secondary.total_amount, dec!(0));

    let record = harness.inbox.get(id).await.unwrap().unwrap();
    assert_eq!(record.state, InboxState::Succeeded);
    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 0);

    harness.stop().await;
}

#[tokio::test]
async fn test_failover_records_secondary() {
    let primary = FakeProcessor::new(Processor::Primary, false);
    let secondary = FakeProcessor::new(Processor::Secondary, true);
    let harness = DurableHarness::start(primary.clone(), secondary.clone(), 8).await;

    let submission = Submission::new(Uuid::new_v4(), dec!(42.00)).unwrap();
    submit(&harness.transport, &submission, &CancellationToken::new())
        .await
        .unwrap();

    wait_for(|| harness.log.contains(&submission.correlation_id)).await;
    let summary = harness.log.summary(None, None);
    assert_eq!(summary.secondary.total_requests, 1);
    assert_eq!(summary.secondary.total_amount, dec!(42.00));
    assert_eq!(summary.primary.total_requests, 0);
    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_exhausted_submission_fails_after_retries() {
    let primary = FakeProcessor::new(Processor::Primary, false);
    let secondary = FakeProcessor::new(Processor::Secondary, false);
    let harness = DurableHarness::start(primary.clone(), secondary.clone(), 8).await;

    let submission = Submission::new(Uuid::new_v4(), dec!(5.00)).unwrap();
    let id = submit(&harness.transport, &submission, &CancellationToken::new())
        .await
        .unwrap();

    wait_for(|| {
        harness
            .queue
            .outcomes()
            .iter()
            .any(|(_, d)| *d == Disposition::Reject)
    })
    .await;

    let dispositions: Vec<Disposition> =
        harness.queue.outcomes().into_iter().map(|(_, d)| d).collect();
    assert_eq!(
        dispositions,
        vec![
            Disposition::Retry,
            Disposition::Retry,
            Disposition::Retry,
            Disposition::Reject
        ]
    );

    // Four ledger attempts of three processor calls each
    assert_eq!(primary.calls() + secondary.calls(), 12);

    let record = harness.inbox.get(id).await.unwrap().unwrap();
    assert_eq!(record.state, InboxState::Failed);
    assert_eq!(record.retries, 3);
    assert!(harness.log.is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn test_replay_while_running_processes_once() {
    let primary = FakeProcessor::with_delay(Processor::Primary, true, Duration::from_millis(200));
    let secondary = FakeProcessor::new(Processor::Secondary, true);
    let harness = DurableHarness::start(primary.clone(), secondary.clone(), 8).await;

    let submission = Submission::new(Uuid::new_v4(), dec!(10.00)).unwrap();
    let message = Message::new(&submission).unwrap();
    harness.queue.publish(&message).await.unwrap();
    harness.queue.publish(&message).await.unwrap();

    wait_for(|| !harness.queue.outcomes().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The replay found the attempt running and was left for redelivery
    assert_eq!(harness.queue.outcomes(), vec![(message.id, Disposition::Ack)]);
    assert_eq!(primary.calls(), 1);
    assert_eq!(harness.log.len(), 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_replay_of_failing_attempt_is_not_acked() {
    let primary = FakeProcessor::with_delay(Processor::Primary, false, Duration::from_millis(50));
    let secondary =
        FakeProcessor::with_delay(Processor::Secondary, false, Duration::from_millis(50));
    let harness = DurableHarness::start(primary.clone(), secondary.clone(), 8).await;

    let submission = Submission::new(Uuid::new_v4(), dec!(7.00)).unwrap();
    let message = Message::new(&submission).unwrap();
    harness.queue.publish(&message).await.unwrap();
    harness.queue.publish(&message).await.unwrap();

    wait_for(|| {
        harness
            .queue
            .outcomes()
            .iter()
            .any(|(_, d)| *d == Disposition::Reject)
    })
    .await;

    let dispositions: Vec<Disposition> =
        harness.queue.outcomes().into_iter().map(|(_, d)| d).collect();
    assert_eq!(
        dispositions,
        vec![
            Disposition::Retry,
            Disposition::Retry,
            Disposition::Retry,
            Disposition::Reject
        ]
    );
    assert_eq!(primary.calls() + secondary.calls(), 12);

    let record = harness.inbox.get(message.id).await.unwrap().unwrap();
    assert_eq!(record.state, InboxState::Failed);

    harness.stop().await;
}

#[tokio::test]
async fn test_resubmitted_correlation_id_settles_once() {
    let primary = FakeProcessor::new(Processor::Primary, true);
    let secondary = FakeProcessor::new(Processor::Secondary, true);
    let harness = DurableHarness::start(primary.clone(), secondary.clone(), 8).await;

    let cancel = CancellationToken::new();
    let submission = Submission::new(Uuid::new_v4(), dec!(12.34)).unwrap();
    let first = submit(&harness.transport, &submission, &cancel).await.unwrap();
    let second = submit(&harness.transport, &submission, &cancel).await.unwrap();

    assert_eq!(first, submission.correlation_id);
    assert_eq!(second, first);

    wait_for(|| !harness.queue.outcomes().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(harness.queue.outcomes(), vec![(first, Disposition::Ack)]);
    assert_eq!(primary.calls(), 1);
    assert_eq!(harness.log.len(), 1);
    assert_eq!(harness.log.summary(None, None).primary.total_amount, dec!(12.34));

    harness.stop().await;
}

#[tokio::test]
async fn test_shutdown_mid_attempt_keeps_retry_budget() {
    let primary = FakeProcessor::with_delay(Processor::Primary, true, Duration::from_secs(30));
    let secondary = FakeProcessor::new(Processor::Secondary, true);
    let harness = DurableHarness::start(primary.clone(), secondary.clone(), 8).await;
    let queue = harness.queue.clone();
    let inbox = harness.inbox.clone();

    let submission = Submission::new(Uuid::new_v4(), dec!(3.00)).unwrap();
    let id = submit(&harness.transport, &submission, &CancellationToken::new())
        .await
        .unwrap();

    wait_for(|| primary.calls() == 1).await;
    harness.stop().await;

    assert_eq!(queue.outcomes(), vec![(id, Disposition::Retry)]);
    let record = inbox.get(id).await.unwrap().unwrap();
    assert_eq!(record.state, InboxState::ReadyToRetry);

    // The interrupted attempt is not counted against the budget
    match inbox.admit(id).await.unwrap() {
        Admission::Process(record) => assert_eq!(record.retries, 0),
        other => panic!("expected admission, got {:?}", other),
    }
    assert_eq!(secondary.calls(), 0);
}

#[tokio::test]
async fn test_invalid_submission_rejected_without_ledger_record() {
    let primary = FakeProcessor::new(Processor::Primary, true);
    let secondary = FakeProcessor::new(Processor::Secondary, true);
    let harness = DurableHarness::start(primary.clone(), secondary.clone(), 8).await;

    let bogus = Submission {
        correlation_id: Uuid::new_v4(),
        amount: dec!(-3.00),
    };
    let message = Message::new(&bogus).unwrap();
    harness.queue.publish(&message).await.unwrap();

    wait_for(|| !harness.queue.outcomes().is_empty()).await;
    assert_eq!(harness.queue.outcomes(), vec![(message.id, Disposition::Reject)]);
    assert!(harness.inbox.get(message.id).await.unwrap().is_none());
    assert_eq!(primary.calls(), 0);

    harness.stop().await;
}

#[tokio::test]
async fn test_many_submissions_all_settle() {
    let primary = FakeProcessor::with_delay(Processor::Primary, true, Duration::from_millis(5));
    let secondary = FakeProcessor::new(Processor::Secondary, true);
    let harness = DurableHarness::start(primary.clone(), secondary.clone(), 4).await;

    let cancel = CancellationToken::new();
    for i in 1..=20 {
        let submission = Submission::new(Uuid::new_v4(), rust_decimal::Decimal::from(i)).unwrap();
        submit(&harness.transport, &submission, &cancel).await.unwrap();
    }

    wait_for(|| harness.log.len() == 20).await;
    let summary = harness.log.summary(None, None);
    assert_eq!(summary.primary.total_requests, 20);
    assert_eq!(summary.primary.total_amount, dec!(210));

    harness.stop().await;
}

#[tokio::test]
async fn test_lightweight_broadcast_reaches_peer_store() {
    let cancel = CancellationToken::new();

    let worker_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let worker_addr = worker_socket.local_addr().unwrap().to_string();
    let peer_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let peer_addr = peer_socket.local_addr().unwrap().to_string();

    let udp = Arc::new(UdpTransport::new(UdpConfig {
        send_addr: worker_addr,
        broadcast_peers: vec![peer_addr],
        ..UdpConfig::default()
    }));

    let store = Arc::new(AggregationStore::new());
    let peer = PeerSync::new(store.clone());
    let peer_deliveries = UdpTransport::listen_on(
        peer_socket,
        MessageType::PaymentSettled,
        65_507,
        cancel.clone(),
    );
    let peer_cancel = cancel.clone();
    let peer_task = tokio::spawn(async move { peer.run(peer_deliveries, peer_cancel).await });

    let primary = FakeProcessor::new(Processor::Primary, false);
    let secondary = FakeProcessor::new(Processor::Secondary, true);
    let router = Arc::new(ProcessorRouter::new(
        primary,
        secondary,
        PreferenceHandle::new(Processor::Primary),
    ));
    let handler = Arc::new(BroadcastSettlement::new(router, udp.clone()));
    let deliveries = UdpTransport::listen_on(
        worker_socket,
        MessageType::PaymentSubmitted,
        65_507,
        cancel.clone(),
    );
    let worker_cancel = cancel.clone();
    let worker_task = tokio::spawn(async move {
        SettlementWorker::new(handler, 4)
            .run(deliveries, worker_cancel)
            .await
    });

    let submission = Submission::new(Uuid::new_v4(), dec!(19.90)).unwrap();
    submit(udp.as_ref(), &submission, &cancel).await.unwrap();

    wait_for(|| store.contains(&submission.correlation_id)).await;
    let summary = store.summary(None, None);
    assert_eq!(summary.secondary.total_requests, 1);
    assert_eq!(summary.secondary.total_amount, dec!(19.90));
    assert_eq!(summary.primary.total_requests, 0);

    cancel.cancel();
    worker_task.await.unwrap();
    peer_task.await.unwrap();
}
