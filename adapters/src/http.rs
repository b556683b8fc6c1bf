//! HTTP processor connector

use crate::config::ProcessorEndpoint;
use crate::connector::ProcessorConnector;
use crate::metrics::{PROCESSOR_REQUESTS_TOTAL, PROCESSOR_REQUEST_DURATION};
use crate::types::{HealthReport, PaymentRequest};
use crate::{Error, Result};
use async_trait::async_trait;
use ledger_core::Processor;
use reqwest::Client;
use std::time::Instant;
use tracing::debug;

/// Processor reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpProcessor {
    processor: Processor,
    endpoint: ProcessorEndpoint,
    client: Client,
}

impl HttpProcessor {
    /// Create new HTTP connector
    pub fn new(processor: Processor, endpoint: ProcessorEndpoint) -> Result<Self> {
        if endpoint.url.is_empty() {
            return Err(Error::Config(format!("{} processor url is empty", processor)));
        }
        let client = Client::builder()
            .timeout(endpoint.request_timeout())
            .build()?;

        Ok(Self {
            processor,
            endpoint,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.url.trim_end_matches('/'), path)
    }

    fn map_err(&self, err: reqwest::Error, operation: &str) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                millis: self.endpoint.request_timeout_ms,
                operation: format!("{} {}", self.processor, operation),
            }
        } else {
            Error::Http(err)
        }
    }

    fn record(&self, operation: &str, start: Instant, result: &Result<impl Sized>) {
        let status = if result.is_ok() { "success" } else { "error" };
        PROCESSOR_REQUESTS_TOTAL
            .with_label_values(&[self.processor.as_str(), operation, status])
            .inc();
        PROCESSOR_REQUEST_DURATION
            .with_label_values(&[self.processor.as_str(), operation])
            .observe(start.elapsed().as_secs_f64());
    }

    async fn post_payment(&self, request: &PaymentRequest) -> Result<()> {
        let response = self
            .client
            .post(self.url(&self.endpoint.payments_path))
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_err(e, "payment"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Rejected {
                processor: self.processor,
                status: status.as_u16(),
            });
        }
        debug!(
            processor = %self.processor,
            correlation_id = %request.correlation_id,
            "Payment accepted"
        );
        Ok(())
    }

    async fn get_health(&self) -> Result<HealthReport> {
        let response = self
            .client
            .get(self.url(&self.endpoint.health_path))
            .send()
            .await
            .map_err(|e| self.map_err(e, "health"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Rejected {
                processor: self.processor,
                status: status.as_u16(),
            });
        }
        response
            .json::<HealthReport>()
            .await
            .map_err(|e| self.map_err(e, "health"))
    }
}

#[async_trait]
impl ProcessorConnector for HttpProcessor {
    fn processor(&self) -> Processor {
        self.processor
    }

    async fn submit_payment(&self, request: &PaymentRequest) -> Result<()> {
        let start = Instant::now();
        let result = self.post_payment(request).await;
        self.record("payment", start, &result);
        result
    }

    async fn health(&self) -> Result<HealthReport> {
        let start = Instant::now();
        let result = self.get_health().await;
        self.record("health", start, &result);
        result
    }
}
