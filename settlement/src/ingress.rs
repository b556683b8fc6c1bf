//! Hand a submission to the transport

use crate::Result;
use ledger_core::Submission;
use message_bus::{Message, Transport};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Validate `submission`, wrap it in an envelope keyed on its correlation id
/// and send it. Resubmitting the same correlation id reuses the same
/// delivery identity, which the durable path uses as the outbox and Inbox key.
pub async fn submit(
    transport: &dyn Transport,
    submission: &Submission,
    cancel: &CancellationToken,
) -> Result<Uuid> {
    submission.validate()?;
    let message = Message::new(submission)?.with_id(submission.correlation_id);
    let id = message.id;
    transport.send(message, cancel).await?;
    Ok(id)
}
