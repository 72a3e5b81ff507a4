use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{PipelineConfig, PollSettings};
use crate::error::Result;
use crate::queue::{MessageQueue, ReceivedMessage};

/// What to do with a message once its handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Delete the message from the queue.
    Acknowledge,
    /// Leave it; it is redelivered after the visibility timeout.
    Retain,
}

/// Per-message logic of a queue-driven worker.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, message: &ReceivedMessage) -> Disposition;
}

/// Long-polls one queue and feeds each message to a handler.
pub struct PollLoop<H> {
    queue: Arc<dyn MessageQueue>,
    handler: H,
    settings: PollSettings,
}

impl<H: MessageHandler> PollLoop<H> {
    pub fn new(queue: Arc<dyn MessageQueue>, handler: H, config: &PipelineConfig) -> Self {
        Self {
            queue,
            handler,
            settings: config.polling.clone(),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Receive one batch and handle it. Returns the number of messages seen.
    pub async fn poll_once(&self) -> Result<usize> {
        let batch = self
            .queue
            .receive(self.settings.max_messages, self.settings.wait_time)
            .await?;
        let count = batch.len();
        self.dispatch(batch).await;
        Ok(count)
    }

    async fn dispatch(&self, batch: Vec<ReceivedMessage>) {
        if batch.is_empty() {
            return;
        }
        tracing::info!(
            worker = self.handler.name(),
            count = batch.len(),
            "Received messages"
        );

        for message in batch {
            let disposition = self.handler.handle(&message).await;
            match disposition {
                Disposition::Acknowledge => {
                    if let Err(e) = self.queue.delete(&message.receipt).await {
                        tracing::warn!(
                            worker = self.handler.name(),
                            message_id = %message.message_id,
                            error = %e,
                            "Failed to acknowledge message, it will be redelivered"
                        );
                    } else {
                        tracing::debug!(
                            worker = self.handler.name(),
                            message_id = %message.message_id,
                            "Message acknowledged"
                        );
                    }
                }
                Disposition::Retain => {
                    tracing::info!(
                        worker = self.handler.name(),
                        message_id = %message.message_id,
                        receive_count = message.receive_count,
                        "Message left for redelivery"
                    );
                }
            }
        }
    }

    /// Poll until `shutdown` fires. Only the wait for messages is cut short
    /// by shutdown; a batch already received is handled to the end.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            worker = self.handler.name(),
            queue = self.queue.name(),
            max_messages = self.settings.max_messages,
            wait_secs = self.settings.wait_time.as_secs(),
            "Worker started"
        );

        loop {
            let received = tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    tracing::info!(worker = self.handler.name(), "Worker received shutdown signal");
                    break;
                }

                received = self.queue.receive(self.settings.max_messages, self.settings.wait_time) => received,
            };

            match received {
                Ok(batch) => self.dispatch(batch).await,
                Err(e) => {
                    tracing::error!(
                        worker = self.handler.name(),
                        error = %e,
                        "Failed to receive messages"
                    );
                    tokio::time::sleep(self.settings.error_backoff).await;
                }
            }
        }

        tracing::info!(worker = self.handler.name(), "Worker stopped");
    }
}
