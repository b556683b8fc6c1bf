//! Durable transport: outbox staging in front of a queue publisher, and a
//! reconnecting receive loop in front of a queue consumer.

use crate::message::Message;
use crate::metrics::{MESSAGE_PUBLISH_TOTAL, MESSAGE_RECEIVE_TOTAL, RECEIVE_RECONNECT_TOTAL};
use crate::outbox::{OutboxRecord, OutboxState, OutboxStore};
use crate::transport::{Delivery, DeliveryStream, Disposition, Transport};
use crate::types::MessageType;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Publishes envelopes to the durable queue
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    /// Publish one envelope and wait for the broker ack
    async fn publish(&self, message: &Message) -> Result<()>;
}

/// Opens a subscription on the durable queue
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Attach to the shared consumer for `message_type`. An `Err` item means the
    /// subscription is broken and must be reopened.
    async fn open(&self, message_type: MessageType)
        -> Result<BoxStream<'static, Result<Delivery>>>;
}

/// When a durable delivery is acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Acknowledge as soon as the delivery is received, before processing
    OnReceipt,
    /// Leave acknowledgement to the consumer via [`Delivery::settle`]
    AfterCommit,
}

impl Default for AckMode {
    fn default() -> Self {
        AckMode::AfterCommit
    }
}

/// Receive loop configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReceiveConfig {
    /// Fixed delay before reopening a broken subscription
    pub reconnect_delay_ms: u64,

    /// Acknowledgement policy
    pub ack_mode: AckMode,
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 2000,
            ack_mode: AckMode::default(),
        }
    }
}

/// Queue-backed transport with a local outbox
pub struct DurableTransport {
    publisher: Arc<dyn QueuePublisher>,
    consumer: Arc<dyn QueueConsumer>,
    outbox: Arc<dyn OutboxStore>,
    config: ReceiveConfig,
}

impl DurableTransport {
    /// Create new durable transport
    pub fn new(
        publisher: Arc<dyn QueuePublisher>,
        consumer: Arc<dyn QueueConsumer>,
        outbox: Arc<dyn OutboxStore>,
        config: ReceiveConfig,
    ) -> Self {
        Self {
            publisher,
            consumer,
            outbox,
            config,
        }
    }
}

#[async_trait]
impl Transport for DurableTransport {
    /// Stage the message, then publish it. A failed publish is recorded on the
    /// outbox record and the call still succeeds; only cancellation is raised.
    /// A message whose id is already staged is not published again.
    async fn send(&self, message: Message, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let record = OutboxRecord::queued(&message)?;
        if !self.outbox.insert(&record).await? {
            MESSAGE_PUBLISH_TOTAL
                .with_label_values(&["durable", message.message_type.name(), "duplicate"])
                .inc();
            debug!(message_id = %message.id, "Message already staged, not republished");
            return Ok(());
        }

        let published = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.publisher.publish(&message) => result,
        };

        let message_type = message.message_type.name();
        match published {
            Ok(()) => {
                MESSAGE_PUBLISH_TOTAL
                    .with_label_values(&["durable", message_type, "success"])
                    .inc();
                debug!(message_id = %message.id, "Message published");
                Ok(())
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                MESSAGE_PUBLISH_TOTAL
                    .with_label_values(&["durable", message_type, "error"])
                    .inc();
                warn!(
                    message_id = %message.id,
                    error = %e,
                    "Publish failed, outbox record marked ReadyToRetry"
                );
                self.outbox
                    .transition(record.id, OutboxState::ReadyToRetry)
                    .await?;
                Ok(())
            }
        }
    }

    async fn receive(
        &self,
        message_type: MessageType,
        cancel: CancellationToken,
    ) -> Result<DeliveryStream> {
        // Single slot: the loop pulls the next delivery only after the previous
        // one has been taken by the consumer.
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(receive_loop(
            self.consumer.clone(),
            message_type,
            self.config.clone(),
            tx,
            cancel,
        ));
        Ok(ReceiverStream::new(rx))
    }
}

async fn receive_loop(
    consumer: Arc<dyn QueueConsumer>,
    message_type: MessageType,
    config: ReceiveConfig,
    tx: mpsc::Sender<Delivery>,
    cancel: CancellationToken,
) {
    let reconnect_delay = Duration::from_millis(config.reconnect_delay_ms);
    let label = message_type.name();

    'connect: loop {
        let opened = tokio::select! {
            _ = cancel.cancelled() => break 'connect,
            opened = consumer.open(message_type) => opened,
        };

        match opened {
            Ok(mut deliveries) => loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break 'connect,
                    next = deliveries.next() => next,
                };

                let mut delivery = match next {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(e)) => {
                        warn!(message_type = label, error = %e, "Subscription failed");
                        break;
                    }
                    None => {
                        warn!(message_type = label, "Subscription ended");
                        break;
                    }
                };

                MESSAGE_RECEIVE_TOTAL
                    .with_label_values(&["durable", label, "success"])
                    .inc();

                if config.ack_mode == AckMode::OnReceipt {
                    if let Some(acker) = delivery.take_acker() {
                        if let Err(e) = acker.settle(Disposition::Ack).await {
                            warn!(delivery_id = %delivery.id, error = %e, "Ack on receipt failed");
                        }
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => break 'connect,
                    sent = tx.send(delivery) => {
                        if sent.is_err() {
                            debug!(message_type = label, "Receiver dropped, stopping");
                            break 'connect;
                        }
                    }
                }
            },
            Err(e) => {
                warn!(message_type = label, error = %e, "Failed to open subscription");
            }
        }

        RECEIVE_RECONNECT_TOTAL.with_label_values(&[label]).inc();
        info!(
            message_type = label,
            delay_ms = config.reconnect_delay_ms,
            "Reconnecting receive loop"
        );
        tokio::select! {
            _ = cancel.cancelled() => break 'connect,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }

    debug!(message_type = label, "Receive loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::MemoryOutboxStore;
    use crate::transport::Acknowledge;
    use crate::types::Payload;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use serde::Serialize;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    #[derive(Serialize, serde::Deserialize)]
    struct Ping {
        value: u32,
    }

    impl Payload for Ping {
        const MESSAGE_TYPE: MessageType = MessageType::PaymentSubmitted;
    }

    struct FlakyPublisher {
        fail: bool,
        published: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl QueuePublisher for FlakyPublisher {
        async fn publish(&self, message: &Message) -> Result<()> {
            if self.fail {
                return Err(Error::Publish("broker unavailable".into()));
            }
            self.published.lock().push(message.id);
            Ok(())
        }
    }

    /// Each `open` pops one scripted session; an exhausted script yields errors.
    struct ScriptedConsumer {
        sessions: Mutex<VecDeque<Vec<Result<Delivery>>>>,
        opens: AtomicUsize,
    }

    #[async_trait]
    impl QueueConsumer for ScriptedConsumer {
        async fn open(
            &self,
            _message_type: MessageType,
        ) -> Result<BoxStream<'static, Result<Delivery>>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            match self.sessions.lock().pop_front() {
                Some(items) => Ok(futures::stream::iter(items).boxed()),
                None => Err(Error::Connection("refused".into())),
            }
        }
    }

    struct CountingAcker(Arc<AtomicUsize>);

    #[async_trait]
    impl Acknowledge for CountingAcker {
        async fn settle(&self, _disposition: Disposition) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn delivery(acks: &Arc<AtomicUsize>) -> Delivery {
        Delivery::new(
            Uuid::new_v4(),
            MessageType::PaymentSubmitted,
            Bytes::from_static(br#"{"value":1}"#),
        )
        .with_acker(Box::new(CountingAcker(acks.clone())))
    }

    fn transport(
        publisher: FlakyPublisher,
        sessions: Vec<Vec<Result<Delivery>>>,
        ack_mode: AckMode,
    ) -> (DurableTransport, Arc<MemoryOutboxStore>, Arc<ScriptedConsumer>) {
        let outbox = Arc::new(MemoryOutboxStore::new());
        let consumer = Arc::new(ScriptedConsumer {
            sessions: Mutex::new(sessions.into()),
            opens: AtomicUsize::new(0),
        });
        let transport = DurableTransport::new(
            Arc::new(publisher),
            consumer.clone(),
            outbox.clone(),
            ReceiveConfig {
                reconnect_delay_ms: 10,
                ack_mode,
            },
        );
        (transport, outbox, consumer)
    }

    fn publisher(fail: bool) -> FlakyPublisher {
        FlakyPublisher {
            fail,
            published: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn test_send_stages_queued_record() {
        let (transport, outbox, _) = transport(publisher(false), vec![], AckMode::AfterCommit);
        let msg = Message::new(&Ping { value: 1 }).unwrap();

        transport.send(msg.clone(), &CancellationToken::new()).await.unwrap();

        let record = outbox.get(msg.id).await.unwrap().unwrap();
        assert_eq!(record.state, OutboxState::Queued);
        assert_eq!(record.retries, 0);
    }

    #[tokio::test]
    async fn test_failed_publish_is_recorded_not_raised() {
        let (transport, outbox, _) = transport(publisher(true), vec![], AckMode::AfterCommit);
        let msg = Message::new(&Ping { value: 1 }).unwrap();

        transport.send(msg.clone(), &CancellationToken::new()).await.unwrap();

        let record = outbox.get(msg.id).await.unwrap().unwrap();
        assert_eq!(record.state, OutboxState::ReadyToRetry);
    }

    #[tokio::test]
    async fn test_resend_of_staged_id_is_not_published() {
        let sink = Arc::new(publisher(false));
        let outbox = Arc::new(MemoryOutboxStore::new());
        let transport = DurableTransport::new(
            sink.clone(),
            Arc::new(ScriptedConsumer {
                sessions: Mutex::new(VecDeque::new()),
                opens: AtomicUsize::new(0),
            }),
            outbox.clone(),
            ReceiveConfig::default(),
        );
        let msg = Message::new(&Ping { value: 1 }).unwrap();
        let cancel = CancellationToken::new();

        transport.send(msg.clone(), &cancel).await.unwrap();
        transport.send(msg.clone(), &cancel).await.unwrap();

        assert_eq!(*sink.published.lock(), vec![msg.id]);
        assert_eq!(outbox.len(), 1);
    }

    #[tokio::test]
    async fn test_send_after_cancel_fails() {
        let (transport, outbox, _) = transport(publisher(false), vec![], AckMode::AfterCommit);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let msg = Message::new(&Ping { value: 1 }).unwrap();
        let err = transport.send(msg, &cancel).await.unwrap_err();

        assert!(err.is_cancelled());
        assert!(outbox.is_empty());
    }

    #[tokio::test]
    async fn test_receive_reconnects_after_failure() {
        let acks = Arc::new(AtomicUsize::new(0));
        let first = delivery(&acks);
        let second = delivery(&acks);
        let (first_id, second_id) = (first.id, second.id);

        let sessions = vec![
            vec![Ok(first), Err(Error::Subscribe("connection reset".into()))],
            vec![Ok(second)],
        ];
        let (transport, _, consumer) = transport(publisher(false), sessions, AckMode::AfterCommit);

        let cancel = CancellationToken::new();
        let mut stream = transport
            .receive(MessageType::PaymentSubmitted, cancel.clone())
            .await
            .unwrap();

        let a = stream.next().await.unwrap();
        let b = stream.next().await.unwrap();
        assert_eq!((a.id, b.id), (first_id, second_id));
        assert!(consumer.opens.load(Ordering::SeqCst) >= 2);

        // AfterCommit leaves acknowledgement to the consumer
        assert!(a.is_acknowledgeable());
        a.settle(Disposition::Ack).await.unwrap();
        assert_eq!(acks.load(Ordering::SeqCst), 1);

        cancel.cancel();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_on_receipt_acks_before_handoff() {
        let acks = Arc::new(AtomicUsize::new(0));
        let sessions = vec![vec![Ok(delivery(&acks))]];
        let (transport, _, _) = transport(publisher(false), sessions, AckMode::OnReceipt);

        let cancel = CancellationToken::new();
        let mut stream = transport
            .receive(MessageType::PaymentSubmitted, cancel.clone())
            .await
            .unwrap();

        let received = stream.next().await.unwrap();
        assert_eq!(acks.load(Ordering::SeqCst), 1);
        assert!(!received.is_acknowledgeable());

        received.settle(Disposition::Retry).await.unwrap();
        assert_eq!(acks.load(Ordering::SeqCst), 1);
        cancel.cancel();
    }
}
