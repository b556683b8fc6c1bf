//! Configuration for the settlement worker

use crate::{Error, Result};
use adapters::{HealthConfig, ProcessorsConfig};
use ledger_core::{DatabaseConfig, InboxConfig};
use message_bus::{NatsConfig, ReceiveConfig, RelayConfig, UdpConfig};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Which transport and bookkeeping the worker runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// JetStream + outbox, Inbox ledger, PostgreSQL settlement log
    Durable,
    /// UDP unicast/broadcast, in-memory Aggregation Store per peer
    Lightweight,
}

impl Default for DeploymentMode {
    fn default() -> Self {
        DeploymentMode::Durable
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentMode::Durable => f.write_str("durable"),
            DeploymentMode::Lightweight => f.write_str("lightweight"),
        }
    }
}

impl FromStr for DeploymentMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "durable" => Ok(DeploymentMode::Durable),
            "lightweight" => Ok(DeploymentMode::Lightweight),
            other => Err(Error::Config(format!("unknown worker mode '{}'", other))),
        }
    }
}

/// Worker loop configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Units of work allowed to run at once
    pub max_concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 64,
        }
    }
}

/// Peer aggregation listener (lightweight deployment)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Address receiving broadcast settlement results
    pub listen_addr: String,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9842".to_string(),
        }
    }
}

/// Settlement worker configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Deployment mode
    pub mode: DeploymentMode,

    /// Worker loop
    pub worker: WorkerConfig,

    /// Processor endpoints and attempt budget
    pub processors: ProcessorsConfig,

    /// Health monitor
    pub health: HealthConfig,

    /// Inbox ledger (durable)
    pub inbox: InboxConfig,

    /// PostgreSQL (durable)
    pub database: DatabaseConfig,

    /// NATS JetStream (durable)
    pub nats: NatsConfig,

    /// Durable receive loop
    pub receive: ReceiveConfig,

    /// Outbox relay (durable)
    pub relay: RelayConfig,

    /// UDP transport (lightweight)
    pub udp: UdpConfig,

    /// Peer aggregation listener (lightweight)
    pub peer: PeerConfig,
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Override fields from any key lookup
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(mode) = lookup("WORKER_MODE") {
            self.mode = mode.parse()?;
        }
        if let Some(value) = lookup("WORKER_MAX_CONCURRENCY") {
            self.worker.max_concurrency = parse("WORKER_MAX_CONCURRENCY", &value)?;
        }
        if let Some(url) = lookup("PRIMARY_PROCESSOR_URL") {
            self.processors.primary.url = url;
        }
        if let Some(url) = lookup("SECONDARY_PROCESSOR_URL") {
            self.processors.secondary.url = url;
        }
        if let Some(value) = lookup("HEALTH_INTERVAL_SECS") {
            self.health.interval_secs = parse("HEALTH_INTERVAL_SECS", &value)?;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(url) = lookup("NATS_URL") {
            self.nats.url = url;
        }
        if let Some(value) = lookup("UDP_LISTEN_PORT") {
            let port: u16 = parse("UDP_LISTEN_PORT", &value)?;
            self.udp.listen_addr = format!("0.0.0.0:{}", port);
        }
        if let Some(addr) = lookup("UDP_SEND_ADDR") {
            self.udp.send_addr = addr;
        }
        if let Some(peers) = lookup("UDP_BROADCAST_PEERS") {
            self.udp.broadcast_peers = peers
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(value) = lookup("LEDGER_MAX_RETRIES") {
            self.inbox.max_retries = parse("LEDGER_MAX_RETRIES", &value)?;
        }
        Ok(())
    }

    /// Reject unusable settings
    pub fn validate(&self) -> Result<()> {
        if self.worker.max_concurrency == 0 {
            return Err(Error::Config("worker.max_concurrency must be > 0".into()));
        }
        if self.processors.max_attempts == 0 {
            return Err(Error::Config("processors.max_attempts must be > 0".into()));
        }
        if self.health.interval_secs == 0 {
            return Err(Error::Config("health.interval_secs must be > 0".into()));
        }
        self.inbox.validate()?;
        Ok(())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} has invalid value '{}'", key, value)))
}
