//! Durable queue backend on PostgreSQL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use forum_bus::{Delivery, Envelope, QueueBackend};
use forum_core::{Error, Result, Transport};

/// PostgreSQL implementation of [`QueueBackend`].
///
/// Every node shares the tables, so a group registered by any node receives
/// messages published by any node. Claiming uses `FOR UPDATE SKIP LOCKED`,
/// so instances of one group never claim the same row.
#[derive(Clone)]
pub struct PgQueue {
    pool: Pool<Postgres>,
    /// Wakes local claim loops on local publishes; other nodes' publishes
    /// are picked up on the next poll.
    notify: Arc<Notify>,
}

impl PgQueue {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Messages dead-lettered for a group, oldest first.
    pub async fn dead_letters(&self, topic: &str, group: &str) -> Result<Vec<(Uuid, String)>> {
        let rows = sqlx::query(
            "SELECT d.message_id, COALESCE(d.dead_reason, '') AS dead_reason
             FROM bus_delivery d
             JOIN bus_message m ON m.id = d.message_id
             WHERE d.topic = $1 AND d.group_name = $2 AND d.state = 'dead'
             ORDER BY m.published_at",
        )
        .bind(topic)
        .bind(group)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("message_id"), row.get("dead_reason")))
            .collect())
    }

    /// Messages waiting for a group (claimed or not).
    pub async fn pending_count(&self, topic: &str, group: &str) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM bus_delivery
             WHERE topic = $1 AND group_name = $2 AND state = 'pending'",
        )
        .bind(topic)
        .bind(group)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count.0)
    }

    /// Stored messages for a topic, including dead-lettered ones.
    pub async fn stored_count(&self, topic: &str) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bus_message WHERE topic = $1")
            .bind(topic)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(count.0)
    }
}

fn secs(d: Duration) -> f64 {
    d.as_secs_f64()
}

#[async_trait]
impl QueueBackend for PgQueue {
    fn transport(&self) -> Transport {
        Transport::Durable
    }

    async fn register_group(&self, topic: &str, group: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO bus_group (topic, group_name) VALUES ($1, $2)
             ON CONFLICT (topic, group_name) DO NOTHING",
        )
        .bind(topic)
        .bind(group)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn publish(&self, envelope: Envelope) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query(
            "INSERT INTO bus_message (id, topic, payload, published_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(envelope.id)
        .bind(&envelope.topic)
        .bind(&envelope.payload)
        .bind(envelope.published_at)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let fanned = sqlx::query(
            "INSERT INTO bus_delivery (message_id, topic, group_name, visible_at)
             SELECT $1, topic, group_name, now() FROM bus_group WHERE topic = $2
             ON CONFLICT (message_id, group_name) DO NOTHING",
        )
        .bind(envelope.id)
        .bind(&envelope.topic)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        if fanned == 0 {
            // Nobody would ever ack it.
            tx.rollback().await.map_err(Error::Database)?;
            debug!(topic = %envelope.topic, message_id = %envelope.id, "No groups registered, message dropped");
            return Ok(());
        }

        tx.commit().await.map_err(Error::Database)?;
        self.notify.notify_waiters();
        Ok(())
    }

    async fn claim(
        &self,
        topic: &str,
        group: &str,
        max: usize,
        ack_wait: Duration,
    ) -> Result<Vec<Delivery>> {
        let rows = sqlx::query(
            "UPDATE bus_delivery d
             SET num_delivered = d.num_delivered + 1,
                 visible_at = now() + make_interval(secs => $4)
             FROM bus_message m
             WHERE m.id = d.message_id
               AND d.group_name = $2
               AND d.message_id IN (
                   SELECT message_id FROM bus_delivery
                   WHERE topic = $1 AND group_name = $2
                     AND state = 'pending' AND visible_at <= now()
                   ORDER BY visible_at, message_id
                   LIMIT $3
                   FOR UPDATE SKIP LOCKED
               )
             RETURNING m.id, m.topic, m.payload, m.published_at, d.num_delivered",
        )
        .bind(topic)
        .bind(group)
        .bind(max as i64)
        .bind(secs(ack_wait))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let num_delivered: i32 = row.get("num_delivered");
                let published_at: DateTime<Utc> = row.get("published_at");
                let payload: JsonValue = row.get("payload");
                Delivery {
                    envelope: Envelope {
                        id: row.get("id"),
                        topic: row.get("topic"),
                        published_at,
                        payload,
                    },
                    num_delivered: num_delivered.max(0) as u32,
                }
            })
            .collect())
    }

    /// Delete the group's delivery, and the message itself once no group
    /// still holds a delivery for it. Dead-lettered deliveries keep their
    /// message.
    async fn ack(&self, topic: &str, group: &str, message_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Serializes acks of the same message across groups.
        sqlx::query("SELECT id FROM bus_message WHERE id = $1 FOR UPDATE")
            .bind(message_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?;

        sqlx::query(
            "DELETE FROM bus_delivery
             WHERE message_id = $1 AND topic = $2 AND group_name = $3 AND state = 'pending'",
        )
        .bind(message_id)
        .bind(topic)
        .bind(group)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let purged = sqlx::query(
            "DELETE FROM bus_message m
             WHERE m.id = $1
               AND NOT EXISTS (SELECT 1 FROM bus_delivery d WHERE d.message_id = m.id)",
        )
        .bind(message_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        tx.commit().await.map_err(Error::Database)?;

        if purged > 0 {
            debug!(topic, %message_id, "Message acked by every group, removed");
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
        sqlx::query(
            "UPDATE bus_delivery
             SET visible_at = now() + make_interval(secs => $4)
             WHERE message_id = $1 AND topic = $2 AND group_name = $3 AND state = 'pending'",
        )
        .bind(message_id)
        .bind(topic)
        .bind(group)
        .bind(secs(delay))
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dead_letter(
        &self,
        topic: &str,
        group: &str,
        message_id: Uuid,
        reason: &str,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE bus_delivery
             SET state = 'dead', dead_reason = $4
             WHERE message_id = $1 AND topic = $2 AND group_name = $3 AND state = 'pending'",
        )
        .bind(message_id)
        .bind(topic)
        .bind(group)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        if updated == 0 {
            warn!(topic, group, %message_id, "Dead-letter target not found");
        }
        Ok(())
    }

    async fn wait_for_messages(&self, _topic: &str, _group: &str, max_wait: Duration) {
        let _ = tokio::time::timeout(max_wait, self.notify.notified()).await;
    }
}
