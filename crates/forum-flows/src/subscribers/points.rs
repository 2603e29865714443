//! Point workflows. Both re-derive the wanted ledger state from current rows
//! and reconcile, so event order and repetition do not matter.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use forum_bus::{DeliveryContext, Subscriber, SubscriberDescriptor};
use forum_core::defaults::*;
use forum_core::{
    AnswerAcceptChange, CommentLike, CommentLikeChange, NotifyEvent, NotifyKind, Operation,
    PointType, Result,
};

use super::groups;
use crate::context::{excerpt, FlowContext};
use crate::ledger::LIKE_TYPES;

/// Like type a vote earns the comment author.
fn like_type(like: &CommentLike) -> PointType {
    if like.like {
        PointType::AnswerLiked
    } else {
        PointType::AnswerDisliked
    }
}

/// Keeps like points in line with the like row: one of liked/disliked
/// while the row exists and the discussion is live, neither otherwise.
pub struct CommentLikePoints {
    ctx: FlowContext,
}

impl CommentLikePoints {
    pub fn new(ctx: FlowContext) -> Self {
        Self { ctx }
    }

    /// `comment_hint` locates the comment once the like row is gone.
    async fn reconcile(&self, like_id: i64, comment_hint: Option<i64>, notify: bool) -> Result<()> {
        let stores = &self.ctx.stores;
        let like = stores.comment_likes.get(like_id).await?;

        let comment_id = match (&like, comment_hint) {
            (Some(like), _) => like.comment_id,
            (None, Some(comment_id)) => comment_id,
            (None, None) => {
                warn!(like_id, "Like gone and event names no comment, skipping");
                return Ok(());
            }
        };
        let Some(comment) = stores.comments.get(comment_id).await? else {
            warn!(like_id, comment_id, "Comment not found, skipping");
            return Ok(());
        };
        let discussion = stores.discussions.get(comment.discussion_id).await?;
        let live = discussion.as_ref().is_some_and(|d| !d.is_deleted());

        let wanted = like.as_ref().filter(|_| live).map(like_type);
        let from_user_id = like.as_ref().map(|l| l.user_id).unwrap_or_default();
        let delta = self
            .ctx
            .ledger()
            .reconcile(comment.user_id, like_id, from_user_id, wanted, &LIKE_TYPES)
            .await?;
        debug!(like_id, comment_id, delta, "Like points reconciled");

        if let Some(like) = like.filter(|l| notify && live && l.like) {
            if like.user_id != comment.user_id {
                self.ctx
                    .bus
                    .emit(&NotifyEvent {
                        kind: NotifyKind::CommentLiked,
                        from_user_id: like.user_id,
                        to_user_id: comment.user_id,
                        discussion_id: Some(comment.discussion_id),
                        comment_id: Some(comment.id),
                        content: excerpt(&comment.content, 100),
                    })
                    .await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Subscriber for CommentLikePoints {
    type Message = CommentLikeChange;

    fn descriptor(&self) -> SubscriberDescriptor {
        SubscriberDescriptor::of::<CommentLikeChange>(groups::LIKE_POINTS)
            .with_concurrent(POINTS_CONCURRENT)
            .with_ack_wait(Duration::from_secs(POINTS_ACK_WAIT_SECS))
    }

    async fn handle(&self, _ctx: &DeliveryContext, event: CommentLikeChange) -> Result<()> {
        match event.op {
            Operation::Insert => self.reconcile(event.id, None, true).await,
            Operation::Update => self.reconcile(event.id, None, false).await,
            Operation::Delete(info) => self.reconcile(event.id, info.comment_id, false).await,
        }
    }
}

/// Keeps accept points in line with the discussion's accepted answer.
///
/// Every comment of the discussion is reconciled, so moving the accepted
/// answer from one comment to another settles both in one pass.
pub struct AnswerAcceptPoints {
    ctx: FlowContext,
}

impl AnswerAcceptPoints {
    pub fn new(ctx: FlowContext) -> Self {
        Self { ctx }
    }

    async fn reconcile(&self, comment_id: i64) -> Result<()> {
        let stores = &self.ctx.stores;
        let Some(comment) = stores.comments.get(comment_id).await? else {
            warn!(comment_id, "Accepted comment not found, skipping");
            return Ok(());
        };
        let Some(discussion) = stores.discussions.get(comment.discussion_id).await? else {
            warn!(comment_id, "Discussion not found, skipping");
            return Ok(());
        };

        let ledger = self.ctx.ledger();
        let asker = discussion.user_id;
        for answer in stores.comments.list_for_discussion(discussion.id).await? {
            let accepted =
                !discussion.is_deleted() && discussion.accepted_comment_id == Some(answer.id);
            ledger
                .reconcile(
                    answer.user_id,
                    answer.id,
                    asker,
                    accepted.then_some(PointType::AnswerAccepted),
                    &[PointType::AnswerAccepted],
                )
                .await?;
            ledger
                .reconcile(
                    asker,
                    answer.id,
                    answer.user_id,
                    accepted.then_some(PointType::AcceptAnswer),
                    &[PointType::AcceptAnswer],
                )
                .await?;
        }
        debug!(
            discussion_id = discussion.id,
            accepted = ?discussion.accepted_comment_id,
            "Accept points reconciled"
        );
        Ok(())
    }
}

#[async_trait]
impl Subscriber for AnswerAcceptPoints {
    type Message = AnswerAcceptChange;

    fn descriptor(&self) -> SubscriberDescriptor {
        SubscriberDescriptor::of::<AnswerAcceptChange>(groups::ACCEPT_POINTS)
            .with_concurrent(POINTS_CONCURRENT)
            .with_ack_wait(Duration::from_secs(POINTS_ACK_WAIT_SECS))
    }

    async fn handle(&self, _ctx: &DeliveryContext, event: AnswerAcceptChange) -> Result<()> {
        self.reconcile(event.id).await
    }
}
