//! Message queue transport.
//!
//! Queues deliver at least once: a received message stays invisible for the
//! visibility timeout and comes back unless it is deleted by receipt. Every
//! body is a transport [`Envelope`] whose `Message` field holds the
//! JSON-encoded domain payload.

pub mod envelope;
pub mod memory;
pub mod message;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

pub use envelope::Envelope;
pub use memory::InMemoryQueue;
pub use message::{ArchiveRequest, RetrievalNotification, SubmissionMessage, ThawRequest};

/// A message handed out by [`MessageQueue::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,
    /// Handle used to acknowledge (delete) this delivery.
    pub receipt: String,
    pub body: String,
    /// How many times this message has been delivered, including this one.
    pub receive_count: u32,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Enqueue a raw body, invisible to receivers for `delay`.
    async fn send(&self, body: String, delay: Duration) -> Result<String>;

    /// Long-poll for up to `max_messages`, waiting at most `wait` when the
    /// queue is empty.
    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<ReceivedMessage>>;

    /// Acknowledge a delivery so it is not redelivered.
    async fn delete(&self, receipt: &str) -> Result<()>;
}

/// Wrap `payload` in a transport envelope and enqueue it.
pub async fn publish<T>(queue: &dyn MessageQueue, payload: &T, delay: Duration) -> Result<String>
where
    T: Serialize + Sync,
{
    let body = Envelope::wrap(queue.name(), payload)?.to_body()?;
    queue.send(body, delay).await
}
