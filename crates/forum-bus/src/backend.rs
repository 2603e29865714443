//! Queue backend contract.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use forum_core::{Result, Transport};

use crate::envelope::{Delivery, Envelope};

/// Storage and delivery bookkeeping for topics and consumer groups.
///
/// Semantics every implementation provides:
///
/// - A published message is copied to every group registered on its topic
///   at publish time. Topics without groups drop the message.
/// - Within a group, a claimed message is hidden from other claimers until it
///   is acked, nacked, or its ack-wait deadline passes.
/// - `num_delivered` increments on every claim.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    fn transport(&self) -> Transport;

    /// Make `group` receive every message published on `topic` from now on.
    async fn register_group(&self, topic: &str, group: &str) -> Result<()>;

    async fn publish(&self, envelope: Envelope) -> Result<()>;

    /// Claim up to `max` visible messages for a group, hiding them for
    /// `ack_wait`.
    async fn claim(
        &self,
        topic: &str,
        group: &str,
        max: usize,
        ack_wait: Duration,
    ) -> Result<Vec<Delivery>>;

    /// Mark a message done for a group.
    async fn ack(&self, topic: &str, group: &str, message_id: Uuid) -> Result<()>;

    /// Return a message to the group, visible again after `delay`.
    async fn nack(&self, topic: &str, group: &str, message_id: Uuid, delay: Duration)
        -> Result<()>;

    /// Stop delivering a message to a group for good.
    async fn dead_letter(
        &self,
        topic: &str,
        group: &str,
        message_id: Uuid,
        reason: &str,
    ) -> Result<()>;

    /// Wait until a message may be available, or `max_wait` elapses.
    ///
    /// Backends that cannot signal arrivals just sleep.
    async fn wait_for_messages(&self, _topic: &str, _group: &str, max_wait: Duration) {
        tokio::time::sleep(max_wait).await;
    }
}
