//! Message model: topics, transports and the typed payload carried on each.
//!
//! Every payload type names exactly one topic. Write-path services publish a
//! change event after their transaction commits; background workflows
//! subscribe to the topic in their own consumer group.
//!
//! ## Catalogue
//!
//! | Payload | Topic | Transport |
//! |---------|-------|-----------|
//! | [`DiscussionChange`] | `forum.discussion.change` | durable |
//! | [`CommentChange`] | `forum.comment.change` | durable |
//! | [`CommentLikeChange`] | `forum.comment_like.change` | durable |
//! | [`AnswerAcceptChange`] | `forum.answer_accept.change` | durable |
//! | [`KbDocumentChange`] | `kb.document.change` | durable |
//! | [`NotifyEvent`] | `forum.notify` | durable |
//! | [`LivePush`] | `live.user_notify` | in-process |

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::NotifyKind;

// ============================================================================
// Message / Topic
// ============================================================================

/// Which backend carries a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Same-process, low latency, lost on restart.
    InProcess,
    /// Survives restarts; shared by every worker node.
    Durable,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::InProcess => "in_process",
            Transport::Durable => "durable",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload type bound to one topic.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Topic name the payload is published on.
    const TOPIC: &'static str;
    /// Backend that carries the topic.
    const TRANSPORT: Transport;
}

// ============================================================================
// Change events
// ============================================================================

/// Kind of entity a change event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Discussion,
    Comment,
    CommentLike,
    AnswerAccept,
    KbDocument,
}

/// Marker binding a [`ChangeEvent`] to its entity kind and topic.
pub trait Entity: Send + Sync + 'static {
    const KIND: EntityKind;
    const TOPIC: &'static str;
}

macro_rules! entity_marker {
    ($(#[$meta:meta])* $name:ident, $kind:ident, $topic:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name;

        impl Entity for $name {
            const KIND: EntityKind = EntityKind::$kind;
            const TOPIC: &'static str = $topic;
        }
    };
}

entity_marker!(DiscussionEntity, Discussion, "forum.discussion.change");
entity_marker!(CommentEntity, Comment, "forum.comment.change");
entity_marker!(CommentLikeEntity, CommentLike, "forum.comment_like.change");
entity_marker!(
    /// `id` is the accepted comment, `uuid` the discussion.
    AnswerAcceptEntity,
    AnswerAccept,
    "forum.answer_accept.change"
);
entity_marker!(KbDocumentEntity, KbDocument, "kb.document.change");

/// Fields a delete handler needs after the row itself is gone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteInfo {
    /// RAG record of the deleted entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rag_id: Option<String>,
    /// Comment a deleted like belonged to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<i64>,
    /// Author of the deleted entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

/// What happened to the entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Update,
    Delete(DeleteInfo),
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete(_) => "delete",
        }
    }
}

/// Immutable record that an entity changed.
///
/// Carries identifiers only. Handlers re-read current state by id because it
/// may have changed again by the time they run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ChangeEvent<E: Entity> {
    pub op: Operation,
    pub entity: EntityKind,
    pub id: i64,
    pub uuid: Uuid,
    #[serde(skip)]
    marker: PhantomData<fn() -> E>,
}

impl<E: Entity> ChangeEvent<E> {
    pub fn new(op: Operation, id: i64, uuid: Uuid) -> Self {
        Self {
            op,
            entity: E::KIND,
            id,
            uuid,
            marker: PhantomData,
        }
    }

    pub fn insert(id: i64, uuid: Uuid) -> Self {
        Self::new(Operation::Insert, id, uuid)
    }

    pub fn update(id: i64, uuid: Uuid) -> Self {
        Self::new(Operation::Update, id, uuid)
    }

    pub fn delete(id: i64, uuid: Uuid, info: DeleteInfo) -> Self {
        Self::new(Operation::Delete(info), id, uuid)
    }
}

impl<E: Entity> Message for ChangeEvent<E> {
    const TOPIC: &'static str = E::TOPIC;
    const TRANSPORT: Transport = Transport::Durable;
}

pub type DiscussionChange = ChangeEvent<DiscussionEntity>;
pub type CommentChange = ChangeEvent<CommentEntity>;
pub type CommentLikeChange = ChangeEvent<CommentLikeEntity>;
pub type AnswerAcceptChange = ChangeEvent<AnswerAcceptEntity>;
pub type KbDocumentChange = ChangeEvent<KbDocumentEntity>;

// ============================================================================
// Notifications
// ============================================================================

/// Request to notify a user. Addressing the bot broadcasts to every admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyEvent {
    pub kind: NotifyKind,
    pub from_user_id: i64,
    pub to_user_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discussion_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<i64>,
    /// Short human-readable text (title or excerpt).
    pub content: String,
}

impl Message for NotifyEvent {
    const TOPIC: &'static str = "forum.notify";
    const TRANSPORT: Transport = Transport::Durable;
}

/// Lightweight payload pushed to a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivePush {
    pub user_id: i64,
    pub notify_id: i64,
    pub kind: NotifyKind,
    pub content: String,
}

impl Message for LivePush {
    const TOPIC: &'static str = "live.user_notify";
    const TRANSPORT: Transport = Transport::InProcess;
}
