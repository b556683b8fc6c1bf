//! Processor and health monitor configuration

use crate::{
    DEFAULT_HEALTH_INTERVAL_SECONDS, DEFAULT_MAX_ATTEMPTS, DEFAULT_PROBE_TIMEOUT_MS,
    DEFAULT_REQUEST_TIMEOUT_MS,
};
use serde::Deserialize;
use std::time::Duration;

/// One processor's HTTP endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessorEndpoint {
    /// Base URL
    pub url: String,
    /// Payment submission path
    pub payments_path: String,
    /// Health probe path
    pub health_path: String,
    /// Request timeout (milliseconds)
    pub request_timeout_ms: u64,
}

impl Default for ProcessorEndpoint {
    fn default() -> Self {
        Self {
            url: "http://localhost:8001".to_string(),
            payments_path: "/payments".to_string(),
            health_path: "/payments/service-health".to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl ProcessorEndpoint {
    /// Endpoint at `url` with default paths and timeout
    pub fn at(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Both processors plus the router attempt budget
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessorsConfig {
    /// Primary processor
    pub primary: ProcessorEndpoint,
    /// Secondary processor
    pub secondary: ProcessorEndpoint,
    /// Attempts per submission, alternating processors
    pub max_attempts: u32,
}

impl Default for ProcessorsConfig {
    fn default() -> Self {
        Self {
            primary: ProcessorEndpoint::at("http://localhost:8001"),
            secondary: ProcessorEndpoint::at("http://localhost:8002"),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Health monitor configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Poll interval (seconds)
    pub interval_secs: u64,
    /// Per-probe timeout (milliseconds)
    pub probe_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_HEALTH_INTERVAL_SECONDS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
        }
    }
}

impl HealthConfig {
    /// Poll interval
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Per-probe timeout
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}
