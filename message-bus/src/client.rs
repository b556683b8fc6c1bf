//! NATS JetStream client backing the durable transport

use crate::durable::{QueueConsumer, QueuePublisher};
use crate::message::Message;
use crate::metrics::{MESSAGE_PUBLISH_DURATION, MESSAGE_RECEIVE_TOTAL};
use crate::transport::{Acknowledge, Delivery, Disposition};
use crate::types::MessageType;
use crate::{Error, Result};
use async_nats::jetstream::{
    self,
    consumer::{self, PullConsumer},
    stream::{self, RetentionPolicy, StorageType},
    AckKind,
};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// Server URL
    pub url: String,

    /// How long the broker waits for an ack before redelivering
    pub ack_wait_secs: u64,

    /// Broker-side dedup window for `Nats-Msg-Id`
    pub duplicate_window_secs: u64,

    /// Broker delivery cap (-1 = unlimited; the inbox ledger bounds retries)
    pub max_deliver: i64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            ack_wait_secs: 30,
            duplicate_window_secs: 300,
            max_deliver: -1,
        }
    }
}

/// JetStream client: one durable work-queue stream per message type
pub struct JetStreamClient {
    context: jetstream::Context,
    config: NatsConfig,
    streams: DashMap<MessageType, stream::Stream>,
}

impl JetStreamClient {
    /// Connect to the NATS server
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        info!(url = %config.url, "Connecting to NATS JetStream");

        let client = async_nats::connect(config.url.as_str())
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        Ok(Self {
            context: jetstream::new(client),
            config,
            streams: DashMap::new(),
        })
    }

    /// Get or create the stream for `message_type`
    async fn ensure_stream(&self, message_type: MessageType) -> Result<stream::Stream> {
        if let Some(stream) = self.streams.get(&message_type) {
            return Ok(stream.clone());
        }

        let config = stream::Config {
            name: message_type.stream_name().to_string(),
            subjects: vec![message_type.subject().to_string()],
            retention: RetentionPolicy::WorkQueue,
            storage: StorageType::File,
            duplicate_window: Duration::from_secs(self.config.duplicate_window_secs),
            ..Default::default()
        };

        let stream = self
            .context
            .get_or_create_stream(config)
            .await
            .map_err(|e| {
                Error::Connection(format!("stream {}: {}", message_type.stream_name(), e))
            })?;

        info!(stream = message_type.stream_name(), "Stream ready");
        self.streams.insert(message_type, stream.clone());
        Ok(stream)
    }

    async fn consumer(&self, message_type: MessageType) -> Result<PullConsumer> {
        let stream = self.ensure_stream(message_type).await?;

        let consumer_config = consumer::pull::Config {
            durable_name: Some(message_type.consumer_name().to_string()),
            ack_policy: consumer::AckPolicy::Explicit,
            ack_wait: Duration::from_secs(self.config.ack_wait_secs),
            max_deliver: self.config.max_deliver,
            deliver_policy: consumer::DeliverPolicy::All,
            ..Default::default()
        };

        stream
            .get_or_create_consumer(message_type.consumer_name(), consumer_config)
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))
    }
}

#[async_trait]
impl QueuePublisher for JetStreamClient {
    async fn publish(&self, message: &Message) -> Result<()> {
        let start = Instant::now();
        self.ensure_stream(message.message_type).await?;

        let payload = message.to_bytes()?;
        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", message.id.to_string().as_str());

        self.context
            .publish_with_headers(message.subject().to_string(), headers, Bytes::from(payload))
            .await
            .map_err(|e| Error::Publish(e.to_string()))?
            .await
            .map_err(|e| Error::Publish(format!("ack failed: {}", e)))?;

        MESSAGE_PUBLISH_DURATION
            .with_label_values(&["durable", message.message_type.name()])
            .observe(start.elapsed().as_secs_f64());
        Ok(())
    }
}

#[async_trait]
impl QueueConsumer for JetStreamClient {
    async fn open(
        &self,
        message_type: MessageType,
    ) -> Result<BoxStream<'static, Result<Delivery>>> {
        let consumer = self.consumer(message_type).await?;
        let messages = consumer
            .messages()
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))?;

        info!(
            stream = message_type.stream_name(),
            consumer = message_type.consumer_name(),
            "JetStream consumer attached"
        );

        let deliveries = messages.filter_map(move |item| async move {
            let msg = match item {
                Ok(msg) => msg,
                Err(e) => return Some(Err(Error::Subscribe(e.to_string()))),
            };
            match envelope_delivery(&msg.payload, message_type) {
                Ok(delivery) => Some(Ok(delivery.with_acker(Box::new(JetStreamAcker(msg))))),
                Err(e) => {
                    error!(error = %e, "Malformed envelope, terminating delivery");
                    MESSAGE_RECEIVE_TOTAL
                        .with_label_values(&["durable", message_type.name(), "parse_error"])
                        .inc();
                    if let Err(term_err) = msg.ack_with(AckKind::Term).await {
                        warn!(error = %term_err, "Failed to terminate bad message");
                    }
                    None
                }
            }
        });

        Ok(deliveries.boxed())
    }
}

/// Unwrap an envelope into a delivery carrying the envelope identity
fn envelope_delivery(bytes: &[u8], expected: MessageType) -> Result<Delivery> {
    let envelope = Message::from_bytes(bytes)?;
    if envelope.message_type != expected {
        return Err(Error::UnexpectedMessageType {
            expected: expected.to_string(),
            actual: envelope.message_type.to_string(),
        });
    }
    let payload = serde_json::to_vec(&envelope.payload)?;
    Ok(Delivery::new(envelope.id, expected, Bytes::from(payload)))
}

struct JetStreamAcker(jetstream::Message);

#[async_trait]
impl Acknowledge for JetStreamAcker {
    async fn settle(&self, disposition: Disposition) -> Result<()> {
        let result = match disposition {
            Disposition::Ack => self.0.ack().await,
            Disposition::Retry => self.0.ack_with(AckKind::Nak(None)).await,
            Disposition::Reject => self.0.ack_with(AckKind::Term).await,
            // Redelivered by the server after ack_wait
            Disposition::Defer => return Ok(()),
        };
        result.map_err(|e| Error::Acknowledge(e.to_string()))
    }
}
