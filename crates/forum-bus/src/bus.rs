//! Publishing side of the bus.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use forum_core::{Message, Result, Transport};

use crate::backend::QueueBackend;
use crate::envelope::Envelope;
use crate::memory::InProcessQueue;

/// Handle to both queue backends.
///
/// Cheap to clone; every write-path service and workflow holds one.
#[derive(Clone)]
pub struct Bus {
    in_process: Arc<dyn QueueBackend>,
    durable: Arc<dyn QueueBackend>,
}

impl Bus {
    pub fn new(in_process: Arc<dyn QueueBackend>, durable: Arc<dyn QueueBackend>) -> Self {
        Self {
            in_process,
            durable,
        }
    }

    /// Bus where both transports live in this process.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InProcessQueue::new()),
            Arc::new(InProcessQueue::with_transport(Transport::Durable)),
        )
    }

    /// Backend carrying `transport`.
    pub fn backend(&self, transport: Transport) -> &Arc<dyn QueueBackend> {
        match transport {
            Transport::InProcess => &self.in_process,
            Transport::Durable => &self.durable,
        }
    }

    /// Publish a message on its topic. Returns the message id.
    ///
    /// Call after the transaction that produced the change has committed.
    pub async fn publish<M: Message>(&self, message: &M) -> Result<Uuid> {
        let envelope = Envelope::wrap(message)?;
        let id = envelope.id;
        self.backend(M::TRANSPORT).publish(envelope).await?;
        debug!(topic = M::TOPIC, message_id = %id, transport = %M::TRANSPORT, "Published message");
        Ok(id)
    }

    /// Publish, logging instead of failing.
    ///
    /// For write paths that have already committed and must not report an
    /// error to their caller because of the bus.
    pub async fn emit<M: Message>(&self, message: &M) -> Option<Uuid> {
        match self.publish(message).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(topic = M::TOPIC, error = %e, "Failed to publish message");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use forum_core::{DiscussionChange, LivePush, NotifyKind};

    #[tokio::test]
    async fn test_publish_routes_by_transport() {
        let bus = Bus::in_memory();
        bus.backend(Transport::Durable)
            .register_group(DiscussionChange::TOPIC, "g")
            .await
            .unwrap();
        bus.backend(Transport::InProcess)
            .register_group(LivePush::TOPIC, "g")
            .await
            .unwrap();

        let change_id = bus
            .publish(&DiscussionChange::insert(1, Uuid::nil()))
            .await
            .unwrap();
        bus.emit(&LivePush {
            user_id: 1,
            notify_id: 2,
            kind: NotifyKind::Comment,
            content: "c".to_string(),
        })
        .await
        .unwrap();

        let wait = Duration::from_secs(5);
        let durable = bus
            .backend(Transport::Durable)
            .claim(DiscussionChange::TOPIC, "g", 10, wait)
            .await
            .unwrap();
        assert_eq!(durable.len(), 1);
        assert_eq!(durable[0].envelope.id, change_id);

        assert!(bus
            .backend(Transport::InProcess)
            .claim(DiscussionChange::TOPIC, "g", 10, wait)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            bus.backend(Transport::InProcess)
                .claim(LivePush::TOPIC, "g", 10, wait)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_backend_reports_transport() {
        let bus = Bus::in_memory();
        assert_eq!(bus.backend(Transport::Durable).transport(), Transport::Durable);
        assert_eq!(
            bus.backend(Transport::InProcess).transport(),
            Transport::InProcess
        );
    }
}
