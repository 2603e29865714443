//! # forum-db
//!
//! Storage for the forum event core: PostgreSQL repositories, the durable
//! queue backend, and an in-memory store implementing the same traits.
//!
//! ## Example
//!
//! ```rust,ignore
//! use forum_db::Database;
//!
//! let db = Database::connect("postgres://localhost/forum").await?;
//! db.migrate().await?;
//! let user = forum_core::UserRepository::get(&db.users, 1).await?;
//! ```

pub mod forum;
pub mod memory;
pub mod notify;
pub mod points;
pub mod pool;
pub mod queue;
pub mod users;

pub use forum_core::*;

pub use forum::{PgCommentLikeRepository, PgCommentRepository, PgDiscussionRepository};
pub use memory::MemoryStore;
pub use notify::{PgNotifyRepository, PgStatRepository};
pub use points::PgPointRepository;
pub use pool::{create_pool_with_config, PoolConfig};
pub use queue::PgQueue;
pub use users::{PgKbDocumentRepository, PgUserRepository};

/// Every PostgreSQL repository over one pool.
#[derive(Clone)]
pub struct Database {
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub discussions: PgDiscussionRepository,
    pub comments: PgCommentRepository,
    pub comment_likes: PgCommentLikeRepository,
    pub kb_documents: PgKbDocumentRepository,
    pub users: PgUserRepository,
    pub points: PgPointRepository,
    pub notifies: PgNotifyRepository,
    /// Stats and the creation trend share one repository.
    pub stats: PgStatRepository,
    /// Durable queue backend for the bus.
    pub queue: PgQueue,
}

impl Database {
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            discussions: PgDiscussionRepository::new(pool.clone()),
            comments: PgCommentRepository::new(pool.clone()),
            comment_likes: PgCommentLikeRepository::new(pool.clone()),
            kb_documents: PgKbDocumentRepository::new(pool.clone()),
            users: PgUserRepository::new(pool.clone()),
            points: PgPointRepository::new(pool.clone()),
            notifies: PgNotifyRepository::new(pool.clone()),
            stats: PgStatRepository::new(pool.clone()),
            queue: PgQueue::new(pool.clone()),
            pool,
        }
    }

    /// Connect with [`PoolConfig::from_env`].
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(url, PoolConfig::from_env()).await
    }

    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run embedded migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
