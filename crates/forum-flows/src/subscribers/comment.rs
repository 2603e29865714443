//! Workflows triggered by new comments.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use forum_bus::{DeliveryContext, Subscriber, SubscriberDescriptor};
use forum_core::defaults::*;
use forum_core::{
    CommentChange, GenerationBackend, NotifyEvent, NotifyKind, Operation, Result, StatType,
};

use super::{groups, load_live_discussion};
use crate::context::{excerpt, today, FlowContext};

const EXCERPT_CHARS: usize = 100;

/// Tells the discussion author about a new top-level comment, or the parent
/// comment's author about a reply.
pub struct CommentNotify {
    ctx: FlowContext,
}

impl CommentNotify {
    pub fn new(ctx: FlowContext) -> Self {
        Self { ctx }
    }

    async fn on_insert(&self, comment_id: i64) -> Result<()> {
        let stores = &self.ctx.stores;
        let Some(comment) = stores.comments.get(comment_id).await? else {
            debug!(comment_id, "Comment gone, skipping");
            return Ok(());
        };
        let Some(discussion) =
            load_live_discussion(&self.ctx, comment.discussion_id, groups::COMMENT_NOTIFY).await?
        else {
            return Ok(());
        };

        let parent = match comment.parent_id {
            Some(parent_id) => stores.comments.get(parent_id).await?,
            None => None,
        };
        let (kind, recipient) = match parent {
            Some(parent) => (NotifyKind::Reply, parent.user_id),
            None => (NotifyKind::Comment, discussion.user_id),
        };

        if recipient == comment.user_id || Some(recipient) == self.ctx.bot_user_id() {
            return Ok(());
        }

        self.ctx
            .bus
            .emit(&NotifyEvent {
                kind,
                from_user_id: comment.user_id,
                to_user_id: recipient,
                discussion_id: Some(discussion.id),
                comment_id: Some(comment.id),
                content: excerpt(&comment.content, EXCERPT_CHARS),
            })
            .await;
        Ok(())
    }
}

#[async_trait]
impl Subscriber for CommentNotify {
    type Message = CommentChange;

    fn descriptor(&self) -> SubscriberDescriptor {
        SubscriberDescriptor::of::<CommentChange>(groups::COMMENT_NOTIFY)
            .with_concurrent(NOTIFY_CONCURRENT)
            .with_ack_wait(Duration::from_secs(NOTIFY_ACK_WAIT_SECS))
    }

    async fn handle(&self, _ctx: &DeliveryContext, event: CommentChange) -> Result<()> {
        match event.op {
            Operation::Insert => self.on_insert(event.id).await,
            Operation::Update | Operation::Delete(_) => Ok(()),
        }
    }
}

/// Asks the model whether a reply to the bot wants a human, and if so
/// raises a help request to the admins.
pub struct CommentEscalate {
    ctx: FlowContext,
    model: Arc<dyn GenerationBackend>,
}

impl CommentEscalate {
    pub fn new(ctx: FlowContext, model: Arc<dyn GenerationBackend>) -> Self {
        Self { ctx, model }
    }

    async fn on_insert(&self, comment_id: i64) -> Result<()> {
        let stores = &self.ctx.stores;
        let Some(bot) = self.ctx.bot_user_id() else {
            warn!(comment_id, "Bot user id not set, escalation skipped");
            return Ok(());
        };
        let Some(reply) = stores.comments.get(comment_id).await? else {
            return Ok(());
        };
        if reply.user_id == bot {
            return Ok(());
        }
        let Some(parent_id) = reply.parent_id else {
            return Ok(());
        };
        let Some(bot_comment) = stores
            .comments
            .get(parent_id)
            .await?
            .filter(|parent| parent.user_id == bot)
        else {
            return Ok(());
        };
        let Some(discussion) =
            load_live_discussion(&self.ctx, reply.discussion_id, groups::COMMENT_ESCALATE).await?
        else {
            return Ok(());
        };

        let prompt = self.ctx.prompts.escalation_prompt(&bot_comment, &reply);
        let verdict = self.model.generate(&prompt).await?;
        if !wants_human(&verdict) {
            debug!(comment_id, "Reply does not ask for a human");
            return Ok(());
        }

        stores
            .stats
            .record(StatType::HumanHelp, &reply.uuid.to_string(), today())
            .await?;
        self.ctx
            .bus
            .emit(&NotifyEvent {
                kind: NotifyKind::HumanHelp,
                from_user_id: reply.user_id,
                to_user_id: bot,
                discussion_id: Some(discussion.id),
                comment_id: Some(reply.id),
                content: excerpt(&reply.content, EXCERPT_CHARS),
            })
            .await;
        info!(comment_id, discussion_id = discussion.id, "Human help requested");
        Ok(())
    }
}

fn wants_human(verdict: &str) -> bool {
    verdict.trim().to_lowercase().starts_with("yes")
}

#[async_trait]
impl Subscriber for CommentEscalate {
    type Message = CommentChange;

    fn descriptor(&self) -> SubscriberDescriptor {
        SubscriberDescriptor::of::<CommentChange>(groups::COMMENT_ESCALATE)
            .with_concurrent(ESCALATE_CONCURRENT)
            .with_ack_wait(Duration::from_secs(ESCALATE_ACK_WAIT_SECS))
    }

    async fn handle(&self, _ctx: &DeliveryContext, event: CommentChange) -> Result<()> {
        match event.op {
            Operation::Insert => self.on_insert(event.id).await,
            Operation::Update | Operation::Delete(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wants_human() {
        assert!(wants_human("Yes"));
        assert!(wants_human("  yes, they want a person"));
        assert!(!wants_human("No."));
        assert!(!wants_human(""));
    }
}
