//! Workflows triggered by discussion changes.
//!
//! Each struct is its own consumer group, so a slow model call never holds
//! back indexing, stats or the delete cascade for the same event.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use forum_bus::{DeliveryContext, Subscriber, SubscriberDescriptor};
use forum_core::defaults::*;
use forum_core::{
    Comment, CommentChange, CommentLike, DeleteInfo, Discussion, DiscussionChange,
    DiscussionType, Error, GenerationBackend, NewComment, NotifyEvent, NotifyKind, ObjectStorage,
    Operation, PointType, RagClient, Result, RevokeOutcome, RevokeRequest, StatType,
    WebhookMessage, WebhookSender,
};

use super::{groups, load_live_discussion};
use crate::context::{excerpt, today, FlowContext};
use crate::ledger::LIKE_TYPES;

// =============================================================================
// AI ANSWER
// =============================================================================

/// Answers new questions as the bot user.
///
/// An unknown answer is deferred (handler error) while the delivery count is
/// within `BotConfig::unknown_retry_threshold`; after that it is accepted:
/// the fallback comment is posted if configured, an unknown stat is
/// recorded and the admins are notified.
pub struct DiscussionAiAnswer {
    ctx: FlowContext,
    model: Arc<dyn GenerationBackend>,
}

impl DiscussionAiAnswer {
    pub fn new(ctx: FlowContext, model: Arc<dyn GenerationBackend>) -> Self {
        Self { ctx, model }
    }

    async fn bot_comment(&self, discussion_id: i64, bot_id: i64) -> Result<Option<Comment>> {
        self.ctx
            .stores
            .comments
            .find_by_author(discussion_id, bot_id)
            .await
    }

    #[instrument(skip(self, delivery), fields(num_delivered = delivery.num_delivered()))]
    async fn on_insert(&self, delivery: &DeliveryContext, discussion_id: i64) -> Result<()> {
        let Some(bot_id) = self.ctx.bot_user_id() else {
            warn!(discussion_id, "Bot user id not set, question left unanswered");
            return Ok(());
        };
        let Some(discussion) =
            load_live_discussion(&self.ctx, discussion_id, groups::DISC_AI_ANSWER).await?
        else {
            return Ok(());
        };
        if discussion.kind != DiscussionType::Qa {
            return Ok(());
        }
        if self.bot_comment(discussion.id, bot_id).await?.is_some() {
            debug!(discussion_id, "Bot already answered");
            return Ok(());
        }

        let bot = &self.ctx.config.bot;
        let prompt = self.ctx.prompts.answer_prompt(&discussion);
        let answer = self.model.generate(&prompt).await?;

        if bot.is_unknown(&answer) {
            if delivery.num_delivered() <= bot.unknown_retry_threshold {
                debug!(discussion_id, "Unknown answer deferred to a later delivery");
                return Err(Error::Deferred(format!(
                    "model could not answer discussion {}",
                    discussion_id
                )));
            }
            return self.accept_unknown(&discussion, bot_id).await;
        }

        self.post(&discussion, bot_id, answer.trim()).await?;
        self.ctx
            .stores
            .stats
            .record(StatType::BotAnswered, &discussion.uuid.to_string(), today())
            .await?;
        info!(discussion_id, "Bot answer posted");
        Ok(())
    }

    async fn accept_unknown(&self, discussion: &Discussion, bot_id: i64) -> Result<()> {
        let bot = &self.ctx.config.bot;
        self.ctx
            .stores
            .stats
            .record(StatType::BotUnknown, &discussion.uuid.to_string(), today())
            .await?;
        self.ctx
            .bus
            .emit(&NotifyEvent {
                kind: NotifyKind::BotUnknown,
                from_user_id: discussion.user_id,
                to_user_id: bot_id,
                discussion_id: Some(discussion.id),
                comment_id: None,
                content: discussion.title.clone(),
            })
            .await;
        if !bot.unknown_prompt.is_empty() {
            self.post(discussion, bot_id, &bot.unknown_prompt).await?;
        }
        info!(discussion_id = discussion.id, "Bot could not answer, admins notified");
        Ok(())
    }

    async fn post(&self, discussion: &Discussion, bot_id: i64, content: &str) -> Result<()> {
        // A redelivered copy may have posted while the model was running.
        if self.bot_comment(discussion.id, bot_id).await?.is_some() {
            debug!(discussion_id = discussion.id, "Bot answer raced, not posting twice");
            return Ok(());
        }
        let comment = self
            .ctx
            .stores
            .comments
            .create(NewComment {
                discussion_id: discussion.id,
                parent_id: None,
                user_id: bot_id,
                content: content.to_string(),
            })
            .await?;
        self.ctx
            .bus
            .emit(&CommentChange::insert(comment.id, comment.uuid))
            .await;
        Ok(())
    }
}

#[async_trait]
impl Subscriber for DiscussionAiAnswer {
    type Message = DiscussionChange;

    fn descriptor(&self) -> SubscriberDescriptor {
        SubscriberDescriptor::of::<DiscussionChange>(groups::DISC_AI_ANSWER)
            .with_concurrent(AI_ANSWER_CONCURRENT)
            .with_ack_wait(Duration::from_secs(AI_ANSWER_ACK_WAIT_SECS))
    }

    async fn handle(&self, ctx: &DeliveryContext, event: DiscussionChange) -> Result<()> {
        match event.op {
            Operation::Insert => self.on_insert(ctx, event.id).await,
            // Reserved for answer regeneration.
            Operation::Update => Ok(()),
            Operation::Delete(_) => Ok(()),
        }
    }
}

// =============================================================================
// RAG INDEX
// =============================================================================

/// Keeps the forum RAG dataset in sync with live discussions. Removal on
/// delete belongs to [`DiscussionCascade`].
pub struct DiscussionRagIndex {
    ctx: FlowContext,
    rag: Arc<dyn RagClient>,
}

impl DiscussionRagIndex {
    pub fn new(ctx: FlowContext, rag: Arc<dyn RagClient>) -> Self {
        Self { ctx, rag }
    }

    async fn index(&self, discussion_id: i64) -> Result<()> {
        let Some(discussion) =
            load_live_discussion(&self.ctx, discussion_id, groups::DISC_RAG).await?
        else {
            return Ok(());
        };

        let content = format!("{}\n\n{}", discussion.title, discussion.content);
        let metadata = json!({
            "discussion_id": discussion.id,
            "kind": discussion.kind,
            "title": discussion.title,
        });
        let rag_id = self
            .rag
            .upsert_record(
                &self.ctx.config.rag.forum_dataset,
                &discussion.uuid.to_string(),
                &content,
                metadata,
            )
            .await?;

        if discussion.rag_id.as_deref() != Some(rag_id.as_str()) {
            self.ctx
                .stores
                .discussions
                .set_rag_id(discussion.id, Some(&rag_id))
                .await?;
        }
        debug!(discussion_id, rag_id = %rag_id, "Discussion indexed");
        Ok(())
    }
}

#[async_trait]
impl Subscriber for DiscussionRagIndex {
    type Message = DiscussionChange;

    fn descriptor(&self) -> SubscriberDescriptor {
        SubscriberDescriptor::of::<DiscussionChange>(groups::DISC_RAG)
            .with_concurrent(RAG_INDEX_CONCURRENT)
            .with_ack_wait(Duration::from_secs(RAG_INDEX_ACK_WAIT_SECS))
    }

    async fn handle(&self, _ctx: &DeliveryContext, event: DiscussionChange) -> Result<()> {
        match event.op {
            Operation::Insert | Operation::Update => self.index(event.id).await,
            Operation::Delete(_) => Ok(()),
        }
    }
}

// =============================================================================
// SUMMARY
// =============================================================================

/// Back-fills the summary of blog posts.
pub struct DiscussionSummary {
    ctx: FlowContext,
    model: Arc<dyn GenerationBackend>,
}

impl DiscussionSummary {
    pub fn new(ctx: FlowContext, model: Arc<dyn GenerationBackend>) -> Self {
        Self { ctx, model }
    }

    /// `force` regenerates an existing summary (updates); inserts keep one
    /// written by an earlier delivery.
    async fn summarize(&self, discussion_id: i64, force: bool) -> Result<()> {
        let Some(discussion) =
            load_live_discussion(&self.ctx, discussion_id, groups::DISC_SUMMARY).await?
        else {
            return Ok(());
        };
        if discussion.kind != DiscussionType::Blog {
            return Ok(());
        }
        if !force && discussion.summary.is_some() {
            debug!(discussion_id, "Summary already present");
            return Ok(());
        }

        let prompt = self.ctx.prompts.summary_prompt(&discussion);
        let summary = self.model.generate(&prompt).await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(Error::Inference(format!(
                "empty summary for discussion {}",
                discussion_id
            )));
        }

        self.ctx
            .stores
            .discussions
            .set_summary(discussion.id, summary)
            .await?;
        debug!(discussion_id, "Summary stored");
        Ok(())
    }
}

#[async_trait]
impl Subscriber for DiscussionSummary {
    type Message = DiscussionChange;

    fn descriptor(&self) -> SubscriberDescriptor {
        SubscriberDescriptor::of::<DiscussionChange>(groups::DISC_SUMMARY)
            .with_concurrent(SUMMARY_CONCURRENT)
            .with_ack_wait(Duration::from_secs(SUMMARY_ACK_WAIT_SECS))
    }

    async fn handle(&self, _ctx: &DeliveryContext, event: DiscussionChange) -> Result<()> {
        match event.op {
            Operation::Insert => self.summarize(event.id, false).await,
            Operation::Update => self.summarize(event.id, true).await,
            Operation::Delete(_) => Ok(()),
        }
    }
}

// =============================================================================
// TREND
// =============================================================================

/// Records blog creations for the trend ranking.
pub struct DiscussionTrend {
    ctx: FlowContext,
}

impl DiscussionTrend {
    pub fn new(ctx: FlowContext) -> Self {
        Self { ctx }
    }

    async fn record(&self, discussion_id: i64) -> Result<()> {
        let Some(discussion) =
            load_live_discussion(&self.ctx, discussion_id, groups::DISC_TREND).await?
        else {
            return Ok(());
        };
        if discussion.kind != DiscussionType::Blog {
            return Ok(());
        }
        let recorded = self
            .ctx
            .stores
            .trends
            .record_created(
                discussion.id,
                discussion.kind,
                discussion.created_at.date_naive(),
            )
            .await?;
        debug!(discussion_id, recorded, "Trend entry");
        Ok(())
    }
}

#[async_trait]
impl Subscriber for DiscussionTrend {
    type Message = DiscussionChange;

    fn descriptor(&self) -> SubscriberDescriptor {
        SubscriberDescriptor::of::<DiscussionChange>(groups::DISC_TREND)
            .with_concurrent(TREND_CONCURRENT)
            .with_ack_wait(Duration::from_secs(TREND_ACK_WAIT_SECS))
    }

    async fn handle(&self, _ctx: &DeliveryContext, event: DiscussionChange) -> Result<()> {
        match event.op {
            Operation::Insert => self.record(event.id).await,
            Operation::Update | Operation::Delete(_) => Ok(()),
        }
    }
}

// =============================================================================
// WEBHOOK
// =============================================================================

/// Announces new discussions on the webhook channel. Best effort: failures
/// are logged and the message is acked.
pub struct DiscussionWebhook {
    ctx: FlowContext,
    webhook: Arc<dyn WebhookSender>,
}

impl DiscussionWebhook {
    pub fn new(ctx: FlowContext, webhook: Arc<dyn WebhookSender>) -> Self {
        Self { ctx, webhook }
    }

    async fn announce(&self, discussion_id: i64) -> Result<()> {
        let Some(discussion) =
            load_live_discussion(&self.ctx, discussion_id, groups::DISC_WEBHOOK).await?
        else {
            return Ok(());
        };
        let message = WebhookMessage {
            event: format!("discussion.{}.created", discussion.kind),
            title: discussion.title.clone(),
            content: excerpt(&discussion.content, 200),
            discussion_id: Some(discussion.id),
        };
        if let Err(e) = self.webhook.send(&message).await {
            warn!(discussion_id, error = %e, "Webhook delivery failed");
        }
        Ok(())
    }
}

#[async_trait]
impl Subscriber for DiscussionWebhook {
    type Message = DiscussionChange;

    fn descriptor(&self) -> SubscriberDescriptor {
        SubscriberDescriptor::of::<DiscussionChange>(groups::DISC_WEBHOOK)
            .with_concurrent(WEBHOOK_CONCURRENT)
            .with_ack_wait(Duration::from_secs(WEBHOOK_ACK_WAIT_SECS))
    }

    async fn handle(&self, _ctx: &DeliveryContext, event: DiscussionChange) -> Result<()> {
        match event.op {
            Operation::Insert => self.announce(event.id).await,
            Operation::Update | Operation::Delete(_) => Ok(()),
        }
    }
}

// =============================================================================
// DELETE CASCADE
// =============================================================================

/// Revocations implied by deleting `discussion`, derived from its current
/// children.
///
/// Every comment may have been accepted at some point and every like may
/// have earned either like type, so all candidates are listed; keys that
/// were never awarded, or are already revoked, are no-ops in the ledger.
pub fn cascade_revokes(
    discussion: &Discussion,
    children: &[(Comment, Vec<CommentLike>)],
) -> Vec<RevokeRequest> {
    let mut revokes = Vec::new();
    for (comment, likes) in children {
        revokes.push(RevokeRequest {
            user_id: comment.user_id,
            point_type: PointType::AnswerAccepted,
            foreign_id: comment.id,
        });
        revokes.push(RevokeRequest {
            user_id: discussion.user_id,
            point_type: PointType::AcceptAnswer,
            foreign_id: comment.id,
        });
        for like in likes {
            for point_type in LIKE_TYPES {
                revokes.push(RevokeRequest {
                    user_id: comment.user_id,
                    point_type,
                    foreign_id: like.id,
                });
            }
        }
    }
    revokes
}

/// Object storage prefix of a discussion's uploaded assets.
pub fn asset_prefix(discussion: &uuid::Uuid) -> String {
    format!("discussion/{}/", discussion)
}

/// Reverses the effects of a deleted discussion: points earned through it,
/// its RAG record and its uploaded assets.
///
/// Relies on the write path soft-deleting the discussion and keeping its
/// comments and likes until this group has acked the delete event.
pub struct DiscussionCascade {
    ctx: FlowContext,
}

impl DiscussionCascade {
    pub fn new(ctx: FlowContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, info))]
    async fn on_delete(
        &self,
        discussion_id: i64,
        uuid: uuid::Uuid,
        info: DeleteInfo,
    ) -> Result<()> {
        let stores = &self.ctx.stores;
        let discussion = stores.discussions.get(discussion_id).await?;

        match &discussion {
            Some(d) if !d.is_deleted() => {
                warn!(discussion_id, "Delete event for a discussion that is not deleted, skipping");
                return Ok(());
            }
            Some(d) => {
                let revoked = self.revoke_points(d).await?;
                info!(discussion_id, revoked, "Discussion points revoked");
            }
            None => {
                warn!(discussion_id, "Discussion purged before cascade, points cannot be re-derived");
            }
        }

        let rag_id = info
            .rag_id
            .or_else(|| discussion.as_ref().and_then(|d| d.rag_id.clone()));
        if let (Some(rag), Some(rag_id)) = (&self.ctx.rag, rag_id) {
            rag.delete_records(&self.ctx.config.rag.forum_dataset, &[rag_id])
                .await?;
            if discussion.is_some() {
                stores.discussions.set_rag_id(discussion_id, None).await?;
            }
        }

        if let Some(storage) = &self.ctx.storage {
            let removed = delete_assets(storage.as_ref(), &uuid).await?;
            debug!(discussion_id, removed, "Discussion assets removed");
        }
        Ok(())
    }

    async fn revoke_points(&self, discussion: &Discussion) -> Result<usize> {
        let stores = &self.ctx.stores;
        let mut children = Vec::new();
        for comment in stores.comments.list_for_discussion(discussion.id).await? {
            let likes = stores.comment_likes.list_for_comment(comment.id).await?;
            children.push((comment, likes));
        }

        let ledger = self.ctx.ledger();
        let mut revoked = 0;
        for req in cascade_revokes(discussion, &children) {
            let outcome = ledger
                .revoke(req.user_id, req.point_type, req.foreign_id)
                .await?;
            if matches!(outcome, RevokeOutcome::Revoked(_)) {
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}

async fn delete_assets(storage: &dyn ObjectStorage, uuid: &uuid::Uuid) -> Result<u64> {
    storage.delete_prefix(&asset_prefix(uuid)).await
}

#[async_trait]
impl Subscriber for DiscussionCascade {
    type Message = DiscussionChange;

    fn descriptor(&self) -> SubscriberDescriptor {
        SubscriberDescriptor::of::<DiscussionChange>(groups::DISC_CASCADE)
            .with_concurrent(CASCADE_CONCURRENT)
            .with_ack_wait(Duration::from_secs(CASCADE_ACK_WAIT_SECS))
    }

    async fn handle(&self, _ctx: &DeliveryContext, event: DiscussionChange) -> Result<()> {
        match event.op {
            Operation::Delete(info) => self.on_delete(event.id, event.uuid, info).await,
            Operation::Insert | Operation::Update => Ok(()),
        }
    }
}
