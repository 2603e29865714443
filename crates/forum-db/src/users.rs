//! User and knowledge-base document repositories.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};

use forum_core::{Error, KbDocument, KbDocumentRepository, Result, User, UserRepository};

/// PostgreSQL implementation of UserRepository.
#[derive(Clone)]
pub struct PgUserRepository {
    pool: Pool<Postgres>,
}

impl PgUserRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn get(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, name, role, point FROM app_user WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(|row| {
            let role: String = row.get("role");
            Ok(User {
                id: row.get("id"),
                name: row.get("name"),
                role: role.parse()?,
                point: row.get("point"),
            })
        })
        .transpose()
    }

    async fn list_admin_ids(&self) -> Result<Vec<i64>> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM app_user WHERE role = 'admin' ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(ids)
    }
}

/// PostgreSQL implementation of KbDocumentRepository.
#[derive(Clone)]
pub struct PgKbDocumentRepository {
    pool: Pool<Postgres>,
}

impl PgKbDocumentRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KbDocumentRepository for PgKbDocumentRepository {
    async fn get(&self, id: i64) -> Result<Option<KbDocument>> {
        let row =
            sqlx::query("SELECT id, uuid, title, content, rag_id FROM kb_document WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Database)?;

        Ok(row.map(|row| KbDocument {
            id: row.get("id"),
            uuid: row.get("uuid"),
            title: row.get("title"),
            content: row.get("content"),
            rag_id: row.get("rag_id"),
        }))
    }

    async fn set_rag_id(&self, id: i64, rag_id: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE kb_document SET rag_id = $2 WHERE id = $1")
            .bind(id)
            .bind(rag_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}
