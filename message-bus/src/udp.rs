//! Lightweight UDP transport: unicast send, one listener per receive, and
//! sequential best-effort broadcast to static peers.
//!
//! Datagrams carry the bare payload JSON. Nothing is staged, retried or
//! deduplicated at this layer; every received datagram gets a fresh delivery id.

use crate::message::Message;
use crate::metrics::{BROADCAST_TOTAL, MESSAGE_PUBLISH_TOTAL, MESSAGE_RECEIVE_TOTAL};
use crate::transport::{BroadcastReport, Broadcaster, Delivery, DeliveryStream, Transport};
use crate::types::MessageType;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, OnceCell};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Largest payload a single IPv4 UDP datagram can carry
const MAX_UDP_PAYLOAD: usize = 65_507;

/// UDP transport configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    /// Address the receive side binds
    pub listen_addr: String,

    /// Unicast destination for `send`
    pub send_addr: String,

    /// Peer endpoints (`host:port`) for `broadcast`
    pub broadcast_peers: Vec<String>,

    /// Receive buffer size
    pub max_datagram_size: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9841".to_string(),
            send_addr: "127.0.0.1:9841".to_string(),
            broadcast_peers: Vec::new(),
            max_datagram_size: MAX_UDP_PAYLOAD,
        }
    }
}

/// UDP transport
pub struct UdpTransport {
    config: UdpConfig,
    sender: OnceCell<UdpSocket>,
}

impl UdpTransport {
    /// Create new UDP transport; sockets are bound lazily
    pub fn new(config: UdpConfig) -> Self {
        Self {
            config,
            sender: OnceCell::new(),
        }
    }

    async fn sender(&self) -> Result<&UdpSocket> {
        self.sender
            .get_or_try_init(|| async { UdpSocket::bind("0.0.0.0:0").await })
            .await
            .map_err(|e| Error::Connection(format!("bind sender: {}", e)))
    }

    async fn send_datagram(
        &self,
        payload: &[u8],
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let socket = self.sender().await?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            sent = socket.send_to(payload, target) => {
                sent?;
                Ok(())
            }
        }
    }

    /// Yield deliveries from an already bound socket until cancelled
    pub fn listen_on(
        socket: UdpSocket,
        message_type: MessageType,
        max_datagram_size: usize,
        cancel: CancellationToken,
    ) -> DeliveryStream {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let label = message_type.name();
            let mut buf = vec![0u8; max_datagram_size];
            loop {
                let received = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = socket.recv_from(&mut buf) => received,
                };

                match received {
                    Ok((len, from)) => {
                        MESSAGE_RECEIVE_TOTAL
                            .with_label_values(&["udp", label, "success"])
                            .inc();
                        let delivery = Delivery::new(
                            Uuid::new_v4(),
                            message_type,
                            Bytes::copy_from_slice(&buf[..len]),
                        );
                        debug!(delivery_id = %delivery.id, %from, len, "Datagram received");

                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            sent = tx.send(delivery) => {
                                if sent.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        MESSAGE_RECEIVE_TOTAL
                            .with_label_values(&["udp", label, "error"])
                            .inc();
                        warn!(error = %e, "UDP receive failed");
                    }
                }
            }
            debug!(message_type = label, "UDP listener stopped");
        });
        ReceiverStream::new(rx)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, message: Message, cancel: &CancellationToken) -> Result<()> {
        let payload = serde_json::to_vec(&message.payload)?;
        let result = self
            .send_datagram(&payload, &self.config.send_addr, cancel)
            .await;

        let status = if result.is_ok() { "success" } else { "error" };
        MESSAGE_PUBLISH_TOTAL
            .with_label_values(&["udp", message.message_type.name(), status])
            .inc();
        result
    }

    async fn receive(
        &self,
        message_type: MessageType,
        cancel: CancellationToken,
    ) -> Result<DeliveryStream> {
        let socket = UdpSocket::bind(self.config.listen_addr.as_str())
            .await
            .map_err(|e| Error::Connection(format!("bind {}: {}", self.config.listen_addr, e)))?;
        info!(
            addr = %self.config.listen_addr,
            message_type = message_type.name(),
            "UDP listener bound"
        );

        Ok(Self::listen_on(
            socket,
            message_type,
            self.config.max_datagram_size,
            cancel,
        ))
    }
}

#[async_trait]
impl Broadcaster for UdpTransport {
    async fn broadcast(&self, message: &Message, cancel: &CancellationToken) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let payload = match serde_json::to_vec(&message.payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Broadcast payload not serializable");
                report.failed = self.config.broadcast_peers.len();
                return report;
            }
        };

        for peer in &self.config.broadcast_peers {
            if cancel.is_cancelled() {
                report.failed += 1;
                continue;
            }
            match self.send_datagram(&payload, peer, cancel).await {
                Ok(()) => {
                    report.delivered += 1;
                    BROADCAST_TOTAL.with_label_values(&["success"]).inc();
                }
                Err(e) => {
                    report.failed += 1;
                    BROADCAST_TOTAL.with_label_values(&["error"]).inc();
                    warn!(%peer, error = %e, "Broadcast to peer failed");
                }
            }
        }
        report
    }
}
