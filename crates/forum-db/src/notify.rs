//! Notification inbox, stat and trend repositories.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};

use forum_core::{
    DiscussionType, Error, MessageNotify, NewMessageNotify, NotifyRepository, Result, StatRepository,
    StatType, TrendRepository,
};

const NOTIFY_COLUMNS: &str = "id, user_id, user_name, from_user_id, from_user_name, kind,
    discussion_id, comment_id, content, read, created_at";

fn parse_notify(row: PgRow) -> Result<MessageNotify> {
    let kind: String = row.get("kind");
    Ok(MessageNotify {
        id: row.get("id"),
        user_id: row.get("user_id"),
        user_name: row.get("user_name"),
        from_user_id: row.get("from_user_id"),
        from_user_name: row.get("from_user_name"),
        kind: kind.parse()?,
        discussion_id: row.get("discussion_id"),
        comment_id: row.get("comment_id"),
        content: row.get("content"),
        read: row.get("read"),
        created_at: row.get("created_at"),
    })
}

/// PostgreSQL implementation of NotifyRepository.
#[derive(Clone)]
pub struct PgNotifyRepository {
    pool: Pool<Postgres>,
}

impl PgNotifyRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotifyRepository for PgNotifyRepository {
    async fn create_if_absent(&self, notify: NewMessageNotify) -> Result<Option<MessageNotify>> {
        let row = sqlx::query(&format!(
            "INSERT INTO message_notify
                 (user_id, user_name, from_user_id, from_user_name, kind,
                  discussion_id, comment_id, content)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT ON CONSTRAINT message_notify_dedup DO NOTHING
             RETURNING {NOTIFY_COLUMNS}"
        ))
        .bind(notify.user_id)
        .bind(&notify.user_name)
        .bind(notify.from_user_id)
        .bind(&notify.from_user_name)
        .bind(notify.kind.as_str())
        .bind(notify.discussion_id)
        .bind(notify.comment_id)
        .bind(&notify.content)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(parse_notify).transpose()
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<MessageNotify>> {
        let rows = sqlx::query(&format!(
            "SELECT {NOTIFY_COLUMNS} FROM message_notify WHERE user_id = $1 ORDER BY id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.into_iter().map(parse_notify).collect()
    }

    async fn mark_read(&self, user_id: i64, ids: &[i64]) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE message_notify SET read = true
             WHERE user_id = $1 AND id = ANY($2) AND NOT read",
        )
        .bind(user_id)
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }
}

/// PostgreSQL implementation of StatRepository and TrendRepository.
#[derive(Clone)]
pub struct PgStatRepository {
    pool: Pool<Postgres>,
}

impl PgStatRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatRepository for PgStatRepository {
    async fn record(&self, stat_type: StatType, key: &str, day: NaiveDate) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO stat (stat_type, key, day) VALUES ($1, $2, $3)
             ON CONFLICT (stat_type, key, day) DO NOTHING",
        )
        .bind(stat_type.as_str())
        .bind(key)
        .bind(day)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TrendRepository for PgStatRepository {
    async fn record_created(
        &self,
        discussion_id: i64,
        kind: DiscussionType,
        day: NaiveDate,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO discussion_trend (discussion_id, kind, day) VALUES ($1, $2, $3)
             ON CONFLICT (discussion_id) DO NOTHING",
        )
        .bind(discussion_id)
        .bind(kind.as_str())
        .bind(day)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected() > 0)
    }
}
