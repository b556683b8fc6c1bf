//! Processor connector interface

use crate::types::{HealthReport, PaymentRequest};
use crate::Result;
use async_trait::async_trait;
use ledger_core::Processor;

/// Payment processor connector trait
#[async_trait]
pub trait ProcessorConnector: Send + Sync {
    /// Which processor this connector talks to
    fn processor(&self) -> Processor;

    /// Submit a payment; `Ok` only when the processor accepted it
    async fn submit_payment(&self, request: &PaymentRequest) -> Result<()>;

    /// Query the processor health endpoint
    async fn health(&self) -> Result<HealthReport>;
}
