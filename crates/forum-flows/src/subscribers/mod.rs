//! Background workflows and their registration.
//!
//! | Group | Topic | Workflow |
//! |-------|-------|----------|
//! | `disc_ai_answer` | discussion change | [`DiscussionAiAnswer`] |
//! | `disc_rag` | discussion change | [`DiscussionRagIndex`] |
//! | `disc_summary` | discussion change | [`DiscussionSummary`] |
//! | `disc_trend` | discussion change | [`DiscussionTrend`] |
//! | `disc_webhook` | discussion change | [`DiscussionWebhook`] |
//! | `disc_cascade` | discussion change | [`DiscussionCascade`] |
//! | `comment_notify` | comment change | [`CommentNotify`] |
//! | `comment_escalate` | comment change | [`CommentEscalate`] |
//! | `like_points` | comment like change | [`CommentLikePoints`] |
//! | `accept_points` | answer accept change | [`AnswerAcceptPoints`] |
//! | `kb_rag` | kb document change | [`KbDocumentRagIndex`] |
//! | `notify_fanout` | notify | [`NotifyFanout`] |
//! | `live_push` | live push | [`LivePushDelivery`] |

mod comment;
mod discussion;
mod kb;
mod notify;
mod points;

pub use comment::{CommentEscalate, CommentNotify};
pub use discussion::{
    asset_prefix, cascade_revokes, DiscussionAiAnswer, DiscussionCascade, DiscussionRagIndex,
    DiscussionSummary, DiscussionTrend, DiscussionWebhook,
};
pub use kb::KbDocumentRagIndex;
pub use notify::{LivePushDelivery, NotifyFanout};
pub use points::{AnswerAcceptPoints, CommentLikePoints};

use tracing::{debug, info, warn};

use forum_bus::SubscriberRegistry;
use forum_core::{Discussion, Result};

use crate::context::FlowContext;

/// Consumer group names.
pub mod groups {
    pub const DISC_AI_ANSWER: &str = "disc_ai_answer";
    pub const DISC_RAG: &str = "disc_rag";
    pub const DISC_SUMMARY: &str = "disc_summary";
    pub const DISC_TREND: &str = "disc_trend";
    pub const DISC_WEBHOOK: &str = "disc_webhook";
    pub const DISC_CASCADE: &str = "disc_cascade";
    pub const COMMENT_NOTIFY: &str = "comment_notify";
    pub const COMMENT_ESCALATE: &str = "comment_escalate";
    pub const LIKE_POINTS: &str = "like_points";
    pub const ACCEPT_POINTS: &str = "accept_points";
    pub const KB_RAG: &str = "kb_rag";
    pub const NOTIFY_FANOUT: &str = "notify_fanout";
    pub const LIVE_PUSH: &str = "live_push";
}

/// Build the registry of every workflow `ctx` can run.
///
/// Workflows whose collaborator is not configured are left out. The bot's
/// answering workflow is left out when the bot is disabled, and both bot
/// workflows when no bot account is configured.
pub fn register_all(ctx: &FlowContext) -> Result<SubscriberRegistry> {
    let mut registry = SubscriberRegistry::new();

    match &ctx.model {
        Some(model) => {
            let bot = &ctx.config.bot;
            match (bot.enabled, bot.user_id) {
                (false, _) => info!("Bot disabled, questions will not be answered"),
                (true, None) => {
                    warn!("BOT_USER_ID not set, answering and escalation workflows disabled")
                }
                (true, Some(_)) => {
                    registry.register(DiscussionAiAnswer::new(ctx.clone(), model.clone()))?;
                }
            }
            registry.register(DiscussionSummary::new(ctx.clone(), model.clone()))?;
            if bot.user_id.is_some() {
                registry.register(CommentEscalate::new(ctx.clone(), model.clone()))?;
            }
        }
        None => warn!("No chat model configured, answer/summary/escalation workflows disabled"),
    }

    match &ctx.rag {
        Some(rag) => {
            registry.register(DiscussionRagIndex::new(ctx.clone(), rag.clone()))?;
            registry.register(KbDocumentRagIndex::new(ctx.clone(), rag.clone()))?;
        }
        None => warn!("No RAG client configured, indexing disabled"),
    }

    if let Some(webhook) = &ctx.webhook {
        registry.register(DiscussionWebhook::new(ctx.clone(), webhook.clone()))?;
    }

    registry.register(DiscussionTrend::new(ctx.clone()))?;
    registry.register(DiscussionCascade::new(ctx.clone()))?;
    registry.register(CommentNotify::new(ctx.clone()))?;
    registry.register(CommentLikePoints::new(ctx.clone()))?;
    registry.register(AnswerAcceptPoints::new(ctx.clone()))?;
    registry.register(NotifyFanout::new(ctx))?;
    registry.register(LivePushDelivery::new(ctx.live.clone()))?;

    info!(subscribers = registry.len(), "Workflows registered");
    Ok(registry)
}

/// The discussion, unless it is gone or soft-deleted.
pub(crate) async fn load_live_discussion(
    ctx: &FlowContext,
    discussion_id: i64,
    group: &str,
) -> Result<Option<Discussion>> {
    match ctx.stores.discussions.get(discussion_id).await? {
        Some(d) if !d.is_deleted() => Ok(Some(d)),
        Some(_) => {
            debug!(discussion_id, group, "Discussion deleted, skipping");
            Ok(None)
        }
        None => {
            warn!(discussion_id, group, "Discussion not found, skipping");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use forum_bus::Bus;
    use forum_db::MemoryStore;

    use crate::config::{BotConfig, FlowConfig};
    use crate::mock::{MockChatModel, RecordingRag, RecordingWebhook};
    use crate::stores::Stores;

    fn context() -> FlowContext {
        let store = MemoryStore::new();
        FlowContext::new(Stores::memory(&store), Bus::in_memory(), FlowConfig::default())
    }

    #[test]
    fn test_register_all_without_collaborators() {
        let registry = register_all(&context()).unwrap();
        let groups: Vec<String> = registry.descriptors().into_iter().map(|d| d.group).collect();
        assert_eq!(registry.len(), 7);
        assert!(groups.contains(&groups::DISC_CASCADE.to_string()));
        assert!(!groups.contains(&groups::DISC_AI_ANSWER.to_string()));
        assert!(!groups.contains(&groups::DISC_RAG.to_string()));
    }

    #[test]
    fn test_register_all_with_collaborators() {
        let config = FlowConfig::default().with_bot(BotConfig::default().with_user_id(42));
        let ctx = FlowContext::new(Stores::memory(&MemoryStore::new()), Bus::in_memory(), config)
            .with_model(Arc::new(MockChatModel::new("ok")))
            .with_rag(Arc::new(RecordingRag::new()))
            .with_webhook(Arc::new(RecordingWebhook::new()));
        let registry = register_all(&ctx).unwrap();
        assert_eq!(registry.len(), 13);
        assert_eq!(registry.topics().len(), 7);
    }

    #[test]
    fn test_register_all_without_bot_account() {
        let ctx = context().with_model(Arc::new(MockChatModel::new("ok")));
        let registry = register_all(&ctx).unwrap();
        let groups: Vec<String> = registry.descriptors().into_iter().map(|d| d.group).collect();

        assert!(groups.contains(&groups::DISC_SUMMARY.to_string()));
        assert!(!groups.contains(&groups::DISC_AI_ANSWER.to_string()));
        assert!(!groups.contains(&groups::COMMENT_ESCALATE.to_string()));
        assert_eq!(registry.len(), 8);
    }
}
