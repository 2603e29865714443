//! Discussion, comment and like repositories.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use forum_core::{
    Comment, CommentLike, CommentLikeRepository, CommentRepository, Discussion,
    DiscussionRepository, Error, NewComment, Result,
};

const DISCUSSION_COLUMNS: &str = "id, uuid, user_id, kind, title, content, summary, rag_id,
    accepted_comment_id, created_at, updated_at, deleted_at";

const COMMENT_COLUMNS: &str = "id, uuid, discussion_id, parent_id, user_id, content, created_at";

fn parse_discussion(row: PgRow) -> Result<Discussion> {
    let kind: String = row.get("kind");
    Ok(Discussion {
        id: row.get("id"),
        uuid: row.get("uuid"),
        user_id: row.get("user_id"),
        kind: kind.parse()?,
        title: row.get("title"),
        content: row.get("content"),
        summary: row.get("summary"),
        rag_id: row.get("rag_id"),
        accepted_comment_id: row.get("accepted_comment_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        deleted_at: row.get("deleted_at"),
    })
}

fn parse_comment(row: PgRow) -> Comment {
    Comment {
        id: row.get("id"),
        uuid: row.get("uuid"),
        discussion_id: row.get("discussion_id"),
        parent_id: row.get("parent_id"),
        user_id: row.get("user_id"),
        content: row.get("content"),
        created_at: row.get("created_at"),
    }
}

fn parse_like(row: PgRow) -> CommentLike {
    CommentLike {
        id: row.get("id"),
        comment_id: row.get("comment_id"),
        user_id: row.get("user_id"),
        like: row.get("like"),
        created_at: row.get("created_at"),
    }
}

/// PostgreSQL implementation of DiscussionRepository.
#[derive(Clone)]
pub struct PgDiscussionRepository {
    pool: Pool<Postgres>,
}

impl PgDiscussionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DiscussionRepository for PgDiscussionRepository {
    async fn get(&self, id: i64) -> Result<Option<Discussion>> {
        let row = sqlx::query(&format!(
            "SELECT {DISCUSSION_COLUMNS} FROM discussion WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(parse_discussion).transpose()
    }

    async fn set_summary(&self, id: i64, summary: &str) -> Result<()> {
        sqlx::query("UPDATE discussion SET summary = $2 WHERE id = $1")
            .bind(id)
            .bind(summary)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn set_rag_id(&self, id: i64, rag_id: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE discussion SET rag_id = $2 WHERE id = $1")
            .bind(id)
            .bind(rag_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}

/// PostgreSQL implementation of CommentRepository.
#[derive(Clone)]
pub struct PgCommentRepository {
    pool: Pool<Postgres>,
}

impl PgCommentRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CommentRepository for PgCommentRepository {
    async fn get(&self, id: i64) -> Result<Option<Comment>> {
        let row = sqlx::query(&format!("SELECT {COMMENT_COLUMNS} FROM comment WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.map(parse_comment))
    }

    async fn list_for_discussion(&self, discussion_id: i64) -> Result<Vec<Comment>> {
        // No join on discussion.deleted_at: the delete cascade reads
        // children of soft-deleted discussions.
        let rows = sqlx::query(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comment WHERE discussion_id = $1 ORDER BY id"
        ))
        .bind(discussion_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.into_iter().map(parse_comment).collect())
    }

    async fn find_by_author(&self, discussion_id: i64, user_id: i64) -> Result<Option<Comment>> {
        let row = sqlx::query(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comment
             WHERE discussion_id = $1 AND user_id = $2
             ORDER BY id LIMIT 1"
        ))
        .bind(discussion_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.map(parse_comment))
    }

    async fn create(&self, comment: NewComment) -> Result<Comment> {
        let row = sqlx::query(&format!(
            "INSERT INTO comment (uuid, discussion_id, parent_id, user_id, content)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {COMMENT_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(comment.discussion_id)
        .bind(comment.parent_id)
        .bind(comment.user_id)
        .bind(&comment.content)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(parse_comment(row))
    }
}

/// PostgreSQL implementation of CommentLikeRepository.
#[derive(Clone)]
pub struct PgCommentLikeRepository {
    pool: Pool<Postgres>,
}

impl PgCommentLikeRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CommentLikeRepository for PgCommentLikeRepository {
    async fn get(&self, id: i64) -> Result<Option<CommentLike>> {
        let row = sqlx::query(
            r#"SELECT id, comment_id, user_id, "like", created_at FROM comment_like WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.map(parse_like))
    }

    async fn list_for_comment(&self, comment_id: i64) -> Result<Vec<CommentLike>> {
        let rows = sqlx::query(
            r#"SELECT id, comment_id, user_id, "like", created_at FROM comment_like
               WHERE comment_id = $1 ORDER BY id"#,
        )
        .bind(comment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.into_iter().map(parse_like).collect())
    }
}
