use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::Result;
use crate::queue::{MessageQueue, ReceivedMessage};

const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    body: String,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    /// Messages sent with a delay, with the instant they become visible.
    delayed: Vec<(Instant, StoredMessage)>,
    /// Receipt -> (visibility deadline, message).
    in_flight: HashMap<String, (Instant, StoredMessage)>,
}

impl QueueState {
    /// Make due delayed messages and expired deliveries visible again.
    /// Returns the next instant at which something else becomes visible.
    fn promote(&mut self, now: Instant) -> Option<Instant> {
        let mut still_delayed = Vec::with_capacity(self.delayed.len());
        for (at, msg) in self.delayed.drain(..) {
            if at <= now {
                self.ready.push_back(msg);
            } else {
                still_delayed.push((at, msg));
            }
        }
        self.delayed = still_delayed;

        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in expired {
            if let Some((_, msg)) = self.in_flight.remove(&receipt) {
                tracing::debug!(message_id = %msg.id, "Visibility timeout expired, message redelivered");
                self.ready.push_back(msg);
            }
        }

        self.delayed
            .iter()
            .map(|(at, _)| *at)
            .chain(self.in_flight.values().map(|(deadline, _)| *deadline))
            .min()
    }
}

/// At-least-once queue held in process memory.
///
/// Received messages are hidden for the visibility timeout and return to the
/// queue unless deleted by receipt before it expires.
#[derive(Debug)]
pub struct InMemoryQueue {
    name: String,
    visibility_timeout: Duration,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_visibility_timeout(name, DEFAULT_VISIBILITY_TIMEOUT)
    }

    pub fn with_visibility_timeout(name: impl Into<String>, visibility_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            visibility_timeout,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Messages not yet deleted, whether visible, delayed or in flight.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.ready.len() + state.delayed.len() + state.in_flight.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, body: String, delay: Duration) -> Result<String> {
        let msg = StoredMessage {
            id: Uuid::new_v4().to_string(),
            body,
            receive_count: 0,
        };
        let id = msg.id.clone();
        {
            let mut state = self.state.lock().await;
            if delay.is_zero() {
                state.ready.push_back(msg);
            } else {
                state.delayed.push((Instant::now() + delay, msg));
            }
        }
        self.notify.notify_waiters();
        tracing::debug!(queue = %self.name, message_id = %id, delay_ms = delay.as_millis() as u64, "Message enqueued");
        Ok(id)
    }

    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<ReceivedMessage>> {
        let deadline = Instant::now() + wait;

        loop {
            // Registered before inspecting the state so a send racing with
            // this check still wakes us.
            let notified = self.notify.notified();

            let next_visible = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let next_visible = state.promote(now);

                let mut batch = Vec::new();
                while batch.len() < max_messages {
                    let Some(mut msg) = state.ready.pop_front() else {
                        break;
                    };
                    msg.receive_count += 1;
                    let receipt = Uuid::new_v4().to_string();
                    batch.push(ReceivedMessage {
                        message_id: msg.id.clone(),
                        receipt: receipt.clone(),
                        body: msg.body.clone(),
                        receive_count: msg.receive_count,
                    });
                    state
                        .in_flight
                        .insert(receipt, (now + self.visibility_timeout, msg));
                }
                if !batch.is_empty() {
                    return Ok(batch);
                }
                next_visible
            };

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            let wake_at = next_visible.map_or(deadline, |at| at.min(deadline));

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete(&self, receipt: &str) -> Result<()> {
        let removed = self.state.lock().await.in_flight.remove(receipt);
        if removed.is_none() {
            // Already deleted, or the visibility timeout expired and the
            // message went back to the queue.
            tracing::debug!(queue = %self.name, receipt, "Delete for unknown receipt ignored");
        }
        Ok(())
    }
}
