//! Work-queue collaborator: trait seam plus the SQS implementation.

use crate::job::Reply;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

/// Long-poll wait when receiving (seconds).
const RECEIVE_WAIT_SECONDS: i32 = 20;

/// One raw message pulled from the work queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Opaque handle used to acknowledge (delete) the message.
    pub handle: String,
    /// Raw body: JSON, optionally base64-wrapped.
    pub body: String,
}

/// The queue operations the pipeline needs.
///
/// Deleting a received message acknowledges it; a message that is never
/// deleted reappears after the provider's visibility timeout, which is the
/// worker's only retry mechanism.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Receives at most one message, long-polling while the queue is empty.
    async fn receive_one(&self) -> Result<Option<QueueMessage>>;

    /// Deletes (acknowledges) a message by its receipt handle.
    async fn delete(&self, handle: &str) -> Result<()>;

    /// Sends a completion notification to the reply queue.
    async fn send_reply(&self, reply: &Reply) -> Result<()>;
}

/// SQS-backed work queue.
pub struct SqsQueue {
    client: aws_sdk_sqs::Client,
    queue_url: String,
    reply_url: String,
}

impl SqsQueue {
    pub fn new(client: aws_sdk_sqs::Client, queue_url: String, reply_url: String) -> Self {
        Self {
            client,
            queue_url,
            reply_url,
        }
    }
}

#[async_trait]
impl WorkQueue for SqsQueue {
    async fn receive_one(&self) -> Result<Option<QueueMessage>> {
        debug!(queue = %self.queue_url, "waiting for message");

        let response = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(RECEIVE_WAIT_SECONDS)
            .send()
            .await
            .context("failed to receive from work queue")?;

        let message = match response.messages().first() {
            Some(message) => message,
            None => return Ok(None),
        };

        match (message.receipt_handle(), message.body()) {
            (Some(handle), Some(body)) => Ok(Some(QueueMessage {
                handle: handle.to_string(),
                body: body.to_string(),
            })),
            _ => {
                // A message without a handle cannot be acknowledged; leave it
                // for redelivery.
                debug!("received message without handle or body, skipping");
                Ok(None)
            }
        }
    }

    async fn delete(&self, handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(handle)
            .send()
            .await
            .context("failed to delete message from work queue")?;

        info!("deleted thumbnail job from queue");
        Ok(())
    }

    async fn send_reply(&self, reply: &Reply) -> Result<()> {
        let body = serde_json::to_string(reply).context("failed to serialize reply")?;

        self.client
            .send_message()
            .queue_url(&self.reply_url)
            .message_body(body)
            .send()
            .await
            .context("failed to send reply")?;

        info!(id = %reply.id, files = reply.files.len(), "sent reply");
        Ok(())
    }
}
