//! In-process queue backend.
//!
//! Same-node, low-latency delivery (e.g. live push to a connection held by
//! this process). Messages are lost on restart. Also used as a stand-in for
//! the durable backend in tests and single-node development.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

use forum_core::{Result, Transport};

use crate::backend::QueueBackend;
use crate::envelope::{Delivery, Envelope};

#[derive(Debug)]
struct Entry {
    envelope: Envelope,
    num_delivered: u32,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct GroupQueue {
    entries: Vec<Entry>,
    notify: Arc<Notify>,
}

/// A message removed from delivery by [`QueueBackend::dead_letter`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub topic: String,
    pub group: String,
    pub envelope: Envelope,
    pub num_delivered: u32,
    pub reason: String,
}

#[derive(Debug, Default)]
struct State {
    /// topic -> group -> queue
    topics: HashMap<String, HashMap<String, GroupQueue>>,
    dead_letters: Vec<DeadLetter>,
}

/// In-memory [`QueueBackend`].
#[derive(Clone)]
pub struct InProcessQueue {
    transport: Transport,
    state: Arc<Mutex<State>>,
}

impl Default for InProcessQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessQueue {
    pub fn new() -> Self {
        Self::with_transport(Transport::InProcess)
    }

    /// Queue that reports itself as `transport`, for standing in for the
    /// durable backend.
    pub fn with_transport(transport: Transport) -> Self {
        Self {
            transport,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Messages not yet acked or dead-lettered for a group.
    pub async fn pending(&self, topic: &str, group: &str) -> usize {
        let state = self.state.lock().await;
        state
            .topics
            .get(topic)
            .and_then(|groups| groups.get(group))
            .map(|q| q.entries.len())
            .unwrap_or(0)
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.clone()
    }
}

#[async_trait]
impl QueueBackend for InProcessQueue {
    fn transport(&self) -> Transport {
        self.transport
    }

    async fn register_group(&self, topic: &str, group: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .entry(group.to_string())
            .or_default();
        Ok(())
    }

    async fn publish(&self, envelope: Envelope) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(groups) = state.topics.get_mut(&envelope.topic) else {
            debug!(topic = %envelope.topic, message_id = %envelope.id, "No groups registered, message dropped");
            return Ok(());
        };

        let now = Instant::now();
        for queue in groups.values_mut() {
            queue.entries.push(Entry {
                envelope: envelope.clone(),
                num_delivered: 0,
                visible_at: now,
            });
            queue.notify.notify_one();
        }
        Ok(())
    }

    async fn claim(
        &self,
        topic: &str,
        group: &str,
        max: usize,
        ack_wait: Duration,
    ) -> Result<Vec<Delivery>> {
        let mut state = self.state.lock().await;
        let Some(queue) = state
            .topics
            .get_mut(topic)
            .and_then(|groups| groups.get_mut(group))
        else {
            return Ok(Vec::new());
        };

        let now = Instant::now();
        let mut claimed = Vec::new();
        for entry in queue.entries.iter_mut() {
            if claimed.len() >= max {
                break;
            }
            if entry.visible_at > now {
                continue;
            }
            entry.num_delivered += 1;
            entry.visible_at = now + ack_wait;
            claimed.push(Delivery {
                envelope: entry.envelope.clone(),
                num_delivered: entry.num_delivered,
            });
        }
        trace!(topic, group, claimed = claimed.len(), "Claimed messages");
        Ok(claimed)
    }

    async fn ack(&self, topic: &str, group: &str, message_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(queue) = state
            .topics
            .get_mut(topic)
            .and_then(|groups| groups.get_mut(group))
        {
            queue.entries.retain(|e| e.envelope.id != message_id);
        }
        Ok(())
    }

    async fn nack(
        &self,
        topic: &str,
        group: &str,
        message_id: Uuid,
        delay: Duration,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(queue) = state
            .topics
            .get_mut(topic)
            .and_then(|groups| groups.get_mut(group))
        {
            let visible_at = Instant::now() + delay;
            for entry in queue.entries.iter_mut() {
                if entry.envelope.id == message_id {
                    entry.visible_at = visible_at;
                }
            }
            queue.notify.notify_one();
        }
        Ok(())
    }

    async fn dead_letter(
        &self,
        topic: &str,
        group: &str,
        message_id: Uuid,
        reason: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let removed = match state
            .topics
            .get_mut(topic)
            .and_then(|groups| groups.get_mut(group))
        {
            Some(queue) => {
                let position = queue
                    .entries
                    .iter()
                    .position(|e| e.envelope.id == message_id);
                position.map(|i| queue.entries.remove(i))
            }
            None => None,
        };

        if let Some(entry) = removed {
            state.dead_letters.push(DeadLetter {
                topic: topic.to_string(),
                group: group.to_string(),
                envelope: entry.envelope,
                num_delivered: entry.num_delivered,
                reason: reason.to_string(),
            });
        }
        Ok(())
    }

    async fn wait_for_messages(&self, topic: &str, group: &str, max_wait: Duration) {
        let notify = {
            let state = self.state.lock().await;
            state
                .topics
                .get(topic)
                .and_then(|groups| groups.get(group))
                .map(|q| q.notify.clone())
        };

        match notify {
            Some(notify) => {
                let _ = tokio::time::timeout(max_wait, notify.notified()).await;
            }
            None => tokio::time::sleep(max_wait).await,
        }
    }
}
