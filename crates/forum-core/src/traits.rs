//! Interfaces the event core consumes.
//!
//! Repositories are implemented in `forum-db` (PostgreSQL and in-memory);
//! the remaining collaborators (chat model, RAG, webhook, object storage,
//! live push) are adapters supplied by the application.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::events::LivePush;
use crate::ledger::{AwardOutcome, AwardRequest, RevokeOutcome, RevokeRequest};
use crate::models::*;

// =============================================================================
// FORUM CONTENT REPOSITORIES
// =============================================================================

/// Discussions, including soft-deleted ones.
#[async_trait]
pub trait DiscussionRepository: Send + Sync {
    /// Fetch a discussion by id. Soft-deleted rows are returned with
    /// `deleted_at` set; `None` means the row was purged or never existed.
    async fn get(&self, id: i64) -> Result<Option<Discussion>>;

    /// Back-fill the generated summary.
    async fn set_summary(&self, id: i64, summary: &str) -> Result<()>;

    /// Record (or clear) the forum RAG record id.
    async fn set_rag_id(&self, id: i64, rag_id: Option<&str>) -> Result<()>;
}

#[async_trait]
pub trait CommentRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<Comment>>;

    /// All comments of a discussion, oldest first.
    ///
    /// Must keep returning children of a soft-deleted discussion: the
    /// delete cascade derives what to revoke from them.
    async fn list_for_discussion(&self, discussion_id: i64) -> Result<Vec<Comment>>;

    /// First comment by `user_id` on a discussion, if any.
    async fn find_by_author(&self, discussion_id: i64, user_id: i64) -> Result<Option<Comment>>;

    async fn create(&self, comment: NewComment) -> Result<Comment>;
}

#[async_trait]
pub trait CommentLikeRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<CommentLike>>;

    async fn list_for_comment(&self, comment_id: i64) -> Result<Vec<CommentLike>>;
}

#[async_trait]
pub trait KbDocumentRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<KbDocument>>;

    async fn set_rag_id(&self, id: i64, rag_id: Option<&str>) -> Result<()>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<User>>;

    /// Ids of every current admin, ascending.
    async fn list_admin_ids(&self) -> Result<Vec<i64>>;
}

// =============================================================================
// LEDGER / INBOX / STATS
// =============================================================================

/// Point ledger storage.
///
/// Implementations serialize `award` and `revoke` per beneficiary for the
/// whole read-modify-write (cap check, record insert, total update) and
/// apply [`crate::ledger::plan_award`] / [`crate::ledger::plan_revoke`].
#[async_trait]
pub trait PointRepository: Send + Sync {
    async fn award(&self, req: AwardRequest) -> Result<AwardOutcome>;

    async fn revoke(&self, req: RevokeRequest) -> Result<RevokeOutcome>;

    /// Every record of a user, oldest first.
    async fn list_for_user(&self, user_id: i64) -> Result<Vec<UserPointRecord>>;
}

#[async_trait]
pub trait NotifyRepository: Send + Sync {
    /// Insert unless a row for the same (recipient, kind, sender,
    /// discussion, comment) exists. Returns the new row, or `None` when it
    /// already existed.
    async fn create_if_absent(&self, notify: NewMessageNotify) -> Result<Option<MessageNotify>>;

    /// Inbox of a user, newest first.
    async fn list_for_user(&self, user_id: i64) -> Result<Vec<MessageNotify>>;

    /// Mark rows read; returns how many changed.
    async fn mark_read(&self, user_id: i64, ids: &[i64]) -> Result<u64>;
}

#[async_trait]
pub trait StatRepository: Send + Sync {
    /// Record a stat bucket. Returns false when it already existed.
    async fn record(&self, stat_type: StatType, key: &str, day: NaiveDate) -> Result<bool>;
}

#[async_trait]
pub trait TrendRepository: Send + Sync {
    /// Record a discussion creation. Returns false when already recorded.
    async fn record_created(
        &self,
        discussion_id: i64,
        kind: DiscussionType,
        day: NaiveDate,
    ) -> Result<bool>;
}

// =============================================================================
// EXTERNAL COLLABORATORS
// =============================================================================

/// Chat model. Retries are left to message redelivery.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// RAG / vector store client.
#[async_trait]
pub trait RagClient: Send + Sync {
    /// Insert or replace a document; returns its RAG record id.
    async fn upsert_record(
        &self,
        dataset: &str,
        doc_id: &str,
        content: &str,
        metadata: JsonValue,
    ) -> Result<String>;

    async fn delete_records(&self, dataset: &str, rag_ids: &[String]) -> Result<()>;
}

/// Message sent to the external webhook channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookMessage {
    /// Dot-namespaced event name, e.g. `"notify.bot_unknown"`.
    pub event: String,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discussion_id: Option<i64>,
}

#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, message: &WebhookMessage) -> Result<()>;
}

/// Object storage holding uploaded assets.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Delete every object under a prefix; returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;
}

/// Delivery to a client connection held by this process.
#[async_trait]
pub trait LivePushTransport: Send + Sync {
    /// Returns whether at least one connection received the payload.
    async fn push(&self, payload: &LivePush) -> bool;
}

/// Prompt rendering for model calls.
pub trait PromptRenderer: Send + Sync {
    fn answer_prompt(&self, discussion: &Discussion) -> String;

    fn summary_prompt(&self, discussion: &Discussion) -> String;

    /// Yes/no classification of whether `reply` asks for a human.
    fn escalation_prompt(&self, bot_comment: &Comment, reply: &Comment) -> String;
}
