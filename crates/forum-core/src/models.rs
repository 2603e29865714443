//! Domain entities read and written by the event core.
//!
//! Persistence of the forum itself is owned by the write path; these structs
//! mirror the columns the workflows need.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Declares `as_str` / `Display` / `FromStr` for a snake_case string enum.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Stable string form used in the database and on the wire.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::InvalidInput(format!(
                        concat!("unknown ", stringify!($name), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

// =============================================================================
// FORUM CONTENT
// =============================================================================

/// Kind of top-level post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionType {
    /// Question expecting an accepted answer; answered by the bot.
    Qa,
    /// Long-form article; gets a generated summary.
    Blog,
    Feedback,
    Issue,
}

string_enum!(DiscussionType {
    Qa => "qa",
    Blog => "blog",
    Feedback => "feedback",
    Issue => "issue",
});

/// A top-level post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discussion {
    pub id: i64,
    pub uuid: Uuid,
    pub user_id: i64,
    pub kind: DiscussionType,
    pub title: String,
    pub content: String,
    /// Generated summary, back-filled for blogs.
    pub summary: Option<String>,
    /// Record id in the forum RAG dataset, once indexed.
    pub rag_id: Option<String>,
    pub accepted_comment_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set by the write path before it publishes a delete event.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Discussion {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A threaded reply to a discussion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub uuid: Uuid,
    pub discussion_id: i64,
    /// Parent comment for nested replies; `None` for top-level answers.
    pub parent_id: Option<i64>,
    pub user_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a comment from a workflow (bot answers).
#[derive(Debug, Clone)]
pub struct NewComment {
    pub discussion_id: i64,
    pub parent_id: Option<i64>,
    pub user_id: i64,
    pub content: String,
}

/// A like (`like = true`) or dislike on a comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentLike {
    pub id: i64,
    pub comment_id: i64,
    pub user_id: i64,
    pub like: bool,
    pub created_at: DateTime<Utc>,
}

/// Knowledge-base document indexed into the KB dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KbDocument {
    pub id: i64,
    pub uuid: Uuid,
    pub title: String,
    pub content: String,
    pub rag_id: Option<String>,
}

// =============================================================================
// USERS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Normal,
    Admin,
}

string_enum!(UserRole {
    Normal => "normal",
    Admin => "admin",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub role: UserRole,
    /// Running reputation total, never below [`crate::defaults::POINT_FLOOR`].
    pub point: i64,
}

// =============================================================================
// POINT LEDGER
// =============================================================================

/// Reason a point record was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointType {
    /// The user's comment was accepted as the answer.
    AnswerAccepted,
    /// The user accepted an answer on their question.
    AcceptAnswer,
    /// The user's comment was liked.
    AnswerLiked,
    /// The user's comment was disliked.
    AnswerDisliked,
}

string_enum!(PointType {
    AnswerAccepted => "answer_accepted",
    AcceptAnswer => "accept_answer",
    AnswerLiked => "answer_liked",
    AnswerDisliked => "answer_disliked",
});

/// One ledger row. Revocations are new rows pointing back via `revoke_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPointRecord {
    pub id: i64,
    pub user_id: i64,
    pub point_type: PointType,
    /// Entity that scopes uniqueness (comment id, like id).
    pub foreign_id: i64,
    /// Acting user that caused the record.
    pub from_user_id: i64,
    pub point: i64,
    /// Record reversed by this one.
    pub revoke_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl UserPointRecord {
    /// Whether this row reverses another row.
    pub fn is_revocation(&self) -> bool {
        self.revoke_id.is_some()
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyKind {
    /// New top-level comment on the recipient's discussion.
    Comment,
    /// Reply to the recipient's comment.
    Reply,
    /// The recipient's comment was liked.
    CommentLiked,
    /// The bot could not answer a question.
    BotUnknown,
    /// A user asked for a human after a bot answer.
    HumanHelp,
}

string_enum!(NotifyKind {
    Comment => "comment",
    Reply => "reply",
    CommentLiked => "comment_liked",
    BotUnknown => "bot_unknown",
    HumanHelp => "human_help",
});

impl NotifyKind {
    /// Kinds that are mirrored to the external webhook channel.
    pub fn triggers_webhook(&self) -> bool {
        matches!(self, NotifyKind::BotUnknown | NotifyKind::HumanHelp)
    }
}

/// Inbox row, one per (recipient, event).
///
/// Names are snapshots taken when the row is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageNotify {
    pub id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub from_user_id: i64,
    pub from_user_name: String,
    pub kind: NotifyKind,
    pub discussion_id: Option<i64>,
    pub comment_id: Option<i64>,
    pub content: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for [`crate::NotifyRepository::create_if_absent`].
#[derive(Debug, Clone)]
pub struct NewMessageNotify {
    pub user_id: i64,
    pub user_name: String,
    pub from_user_id: i64,
    pub from_user_name: String,
    pub kind: NotifyKind,
    pub discussion_id: Option<i64>,
    pub comment_id: Option<i64>,
    pub content: String,
}

// =============================================================================
// STATS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatType {
    /// Bot answered a question.
    BotAnswered,
    /// Bot could not answer a question.
    BotUnknown,
    /// A user escalated a bot answer to a human.
    HumanHelp,
}

string_enum!(StatType {
    BotAnswered => "bot_answered",
    BotUnknown => "bot_unknown",
    HumanHelp => "human_help",
});

/// One stat bucket, unique on (stat_type, key, day).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatEntry {
    pub stat_type: StatType,
    pub key: String,
    pub day: NaiveDate,
}

/// One creation trend row, unique per discussion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendEntry {
    pub discussion_id: i64,
    pub kind: DiscussionType,
    pub day: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_type_round_trip_strings() {
        for t in [
            PointType::AnswerAccepted,
            PointType::AcceptAnswer,
            PointType::AnswerLiked,
            PointType::AnswerDisliked,
        ] {
            assert_eq!(t.as_str().parse::<PointType>().unwrap(), t);
        }
    }

    #[test]
    fn test_unknown_enum_string_is_invalid_input() {
        let err = "bogus".parse::<NotifyKind>().unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(err.to_string().contains("NotifyKind"));
    }

    #[test]
    fn test_discussion_type_serde_snake_case() {
        let json = serde_json::to_string(&DiscussionType::Qa).unwrap();
        assert_eq!(json, r#""qa""#);
        let parsed: DiscussionType = serde_json::from_str(r#""blog""#).unwrap();
        assert_eq!(parsed, DiscussionType::Blog);
    }

    #[test]
    fn test_webhook_kinds() {
        assert!(NotifyKind::BotUnknown.triggers_webhook());
        assert!(NotifyKind::HumanHelp.triggers_webhook());
        assert!(!NotifyKind::Comment.triggers_webhook());
        assert!(!NotifyKind::CommentLiked.triggers_webhook());
    }

    #[test]
    fn test_revocation_flag() {
        let record = UserPointRecord {
            id: 2,
            user_id: 1,
            point_type: PointType::AnswerLiked,
            foreign_id: 9,
            from_user_id: 3,
            point: -10,
            revoke_id: Some(1),
            created_at: Utc::now(),
        };
        assert!(record.is_revocation());
    }
}
