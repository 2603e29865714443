//! In-process implementation of every repository trait.
//!
//! Used by tests and single-node development. Point ledger updates are
//! serialized per beneficiary by a keyed mutex table, the in-process
//! counterpart of the advisory lock taken by [`crate::PgPointRepository`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use forum_core::ledger::{apply_delta, plan_award, plan_revoke};
use forum_core::{
    AwardOutcome, AwardPlan, AwardRequest, Comment, CommentLike, CommentLikeRepository,
    CommentRepository, Discussion, DiscussionRepository, DiscussionType, Error, KbDocument,
    KbDocumentRepository, MessageNotify, NewComment, NewMessageNotify, NotifyRepository,
    PointRepository, Result, RevokeOutcome, RevokePlan, RevokeRequest, StatEntry, StatRepository,
    StatType, TrendEntry, TrendRepository, User, UserPointRecord, UserRepository, UserRole,
};

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<i64, User>,
    discussions: BTreeMap<i64, Discussion>,
    comments: BTreeMap<i64, Comment>,
    likes: BTreeMap<i64, CommentLike>,
    kb_documents: BTreeMap<i64, KbDocument>,
    points: Vec<UserPointRecord>,
    notifies: Vec<MessageNotify>,
    stats: Vec<StatEntry>,
    trends: Vec<TrendEntry>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn is_revoked(&self, record_id: i64) -> bool {
        self.points.iter().any(|r| r.revoke_id == Some(record_id))
    }

    fn originals<'a>(
        &'a self,
        user_id: i64,
        point_type: forum_core::PointType,
        foreign_id: i64,
    ) -> impl Iterator<Item = &'a UserPointRecord> + 'a {
        self.points.iter().filter(move |r| {
            r.user_id == user_id
                && r.point_type == point_type
                && r.foreign_id == foreign_id
                && r.revoke_id.is_none()
        })
    }

    fn today_positive(&self, user_id: i64, since: DateTime<Utc>) -> i64 {
        self.points
            .iter()
            .filter(|r| {
                r.user_id == user_id
                    && r.point > 0
                    && r.revoke_id.is_none()
                    && r.created_at >= since
                    && !self.is_revoked(r.id)
            })
            .map(|r| r.point)
            .sum()
    }

    fn insert_record(
        &mut self,
        user_id: i64,
        point_type: forum_core::PointType,
        foreign_id: i64,
        from_user_id: i64,
        point: i64,
        revoke_id: Option<i64>,
    ) -> UserPointRecord {
        let record = UserPointRecord {
            id: self.next_id(),
            user_id,
            point_type,
            foreign_id,
            from_user_id,
            point,
            revoke_id,
            created_at: Utc::now(),
        };
        self.points.push(record.clone());
        if let Some(user) = self.users.get_mut(&user_id) {
            user.point = apply_delta(user.point, point);
        }
        record
    }
}

type LockTable = Arc<SyncMutex<HashMap<i64, Arc<Mutex<()>>>>>;

/// Held while a user's ledger is being modified. Dropping the last holder
/// removes the user's entry from the lock table.
struct UserLockGuard {
    user_id: i64,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockTable,
}

impl Drop for UserLockGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Entries are only cloned under the table lock, so a count of one
        // means nobody holds or waits on it.
        if locks
            .get(&self.user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.user_id);
        }
    }
}

/// Shared in-memory store. Cheap to clone; clones see the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    user_locks: LockTable,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive per-user lock for ledger read-modify-write.
    async fn lock_user(&self, user_id: i64) -> UserLockGuard {
        let lock = {
            let mut locks = self
                .user_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            locks.entry(user_id).or_default().clone()
        };
        UserLockGuard {
            user_id,
            guard: Some(lock.lock_owned().await),
            locks: self.user_locks.clone(),
        }
    }

    /// Users whose ledger lock is currently held or awaited.
    pub fn locked_users(&self) -> usize {
        self.user_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    // -------------------------------------------------------------------------
    // Write-path helpers (seeding)
    // -------------------------------------------------------------------------

    /// Insert a user with the floor point total.
    pub async fn add_user(&self, name: &str, role: UserRole) -> User {
        let mut t = self.tables.lock().await;
        let user = User {
            id: t.next_id(),
            name: name.to_string(),
            role,
            point: forum_core::defaults::POINT_FLOOR,
        };
        t.users.insert(user.id, user.clone());
        user
    }

    pub async fn add_discussion(
        &self,
        user_id: i64,
        kind: DiscussionType,
        title: &str,
        content: &str,
    ) -> Discussion {
        let mut t = self.tables.lock().await;
        let now = Utc::now();
        let discussion = Discussion {
            id: t.next_id(),
            uuid: Uuid::now_v7(),
            user_id,
            kind,
            title: title.to_string(),
            content: content.to_string(),
            summary: None,
            rag_id: None,
            accepted_comment_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        t.discussions.insert(discussion.id, discussion.clone());
        discussion
    }

    pub async fn update_discussion_content(&self, id: i64, content: &str) -> Result<Discussion> {
        let mut t = self.tables.lock().await;
        let discussion = t
            .discussions
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("discussion {}", id)))?;
        discussion.content = content.to_string();
        discussion.updated_at = Utc::now();
        Ok(discussion.clone())
    }

    /// Soft-delete a discussion. Comments and likes stay readable until the
    /// delete cascade has run.
    pub async fn soft_delete_discussion(&self, id: i64) -> Result<Discussion> {
        let mut t = self.tables.lock().await;
        let discussion = t
            .discussions
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("discussion {}", id)))?;
        if discussion.deleted_at.is_none() {
            discussion.deleted_at = Some(Utc::now());
        }
        Ok(discussion.clone())
    }

    /// Mark `comment_id` (or nothing) as the accepted answer.
    pub async fn set_accepted_comment(
        &self,
        discussion_id: i64,
        comment_id: Option<i64>,
    ) -> Result<()> {
        let mut t = self.tables.lock().await;
        let discussion = t
            .discussions
            .get_mut(&discussion_id)
            .ok_or_else(|| Error::NotFound(format!("discussion {}", discussion_id)))?;
        discussion.accepted_comment_id = comment_id;
        Ok(())
    }

    pub async fn add_comment(
        &self,
        discussion_id: i64,
        parent_id: Option<i64>,
        user_id: i64,
        content: &str,
    ) -> Comment {
        let mut t = self.tables.lock().await;
        let comment = Comment {
            id: t.next_id(),
            uuid: Uuid::now_v7(),
            discussion_id,
            parent_id,
            user_id,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        t.comments.insert(comment.id, comment.clone());
        comment
    }

    pub async fn add_like(&self, comment_id: i64, user_id: i64, like: bool) -> CommentLike {
        let mut t = self.tables.lock().await;
        let record = CommentLike {
            id: t.next_id(),
            comment_id,
            user_id,
            like,
            created_at: Utc::now(),
        };
        t.likes.insert(record.id, record.clone());
        record
    }

    /// Flip a like to a dislike or back.
    pub async fn set_like(&self, id: i64, like: bool) -> Result<()> {
        let mut t = self.tables.lock().await;
        let record = t
            .likes
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("comment like {}", id)))?;
        record.like = like;
        Ok(())
    }

    pub async fn remove_like(&self, id: i64) -> Option<CommentLike> {
        self.tables.lock().await.likes.remove(&id)
    }

    pub async fn add_kb_document(&self, title: &str, content: &str) -> KbDocument {
        let mut t = self.tables.lock().await;
        let document = KbDocument {
            id: t.next_id(),
            uuid: Uuid::now_v7(),
            title: title.to_string(),
            content: content.to_string(),
            rag_id: None,
        };
        t.kb_documents.insert(document.id, document.clone());
        document
    }

    pub async fn remove_kb_document(&self, id: i64) -> Option<KbDocument> {
        self.tables.lock().await.kb_documents.remove(&id)
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    pub async fn stat_entries(&self) -> Vec<StatEntry> {
        self.tables.lock().await.stats.clone()
    }

    pub async fn trend_entries(&self) -> Vec<TrendEntry> {
        self.tables.lock().await.trends.clone()
    }

    /// Every notification row, oldest first.
    pub async fn all_notifications(&self) -> Vec<MessageNotify> {
        self.tables.lock().await.notifies.clone()
    }

    /// Every ledger row, oldest first.
    pub async fn all_point_records(&self) -> Vec<UserPointRecord> {
        self.tables.lock().await.points.clone()
    }
}

#[async_trait]
impl DiscussionRepository for MemoryStore {
    async fn get(&self, id: i64) -> Result<Option<Discussion>> {
        Ok(self.tables.lock().await.discussions.get(&id).cloned())
    }

    async fn set_summary(&self, id: i64, summary: &str) -> Result<()> {
        if let Some(d) = self.tables.lock().await.discussions.get_mut(&id) {
            d.summary = Some(summary.to_string());
        }
        Ok(())
    }

    async fn set_rag_id(&self, id: i64, rag_id: Option<&str>) -> Result<()> {
        if let Some(d) = self.tables.lock().await.discussions.get_mut(&id) {
            d.rag_id = rag_id.map(str::to_string);
        }
        Ok(())
    }
}

#[async_trait]
impl CommentRepository for MemoryStore {
    async fn get(&self, id: i64) -> Result<Option<Comment>> {
        Ok(self.tables.lock().await.comments.get(&id).cloned())
    }

    async fn list_for_discussion(&self, discussion_id: i64) -> Result<Vec<Comment>> {
        Ok(self
            .tables
            .lock()
            .await
            .comments
            .values()
            .filter(|c| c.discussion_id == discussion_id)
            .cloned()
            .collect())
    }

    async fn find_by_author(&self, discussion_id: i64, user_id: i64) -> Result<Option<Comment>> {
        Ok(self
            .tables
            .lock()
            .await
            .comments
            .values()
            .find(|c| c.discussion_id == discussion_id && c.user_id == user_id)
            .cloned())
    }

    async fn create(&self, comment: NewComment) -> Result<Comment> {
        Ok(self
            .add_comment(
                comment.discussion_id,
                comment.parent_id,
                comment.user_id,
                &comment.content,
            )
            .await)
    }
}

#[async_trait]
impl CommentLikeRepository for MemoryStore {
    async fn get(&self, id: i64) -> Result<Option<CommentLike>> {
        Ok(self.tables.lock().await.likes.get(&id).cloned())
    }

    async fn list_for_comment(&self, comment_id: i64) -> Result<Vec<CommentLike>> {
        Ok(self
            .tables
            .lock()
            .await
            .likes
            .values()
            .filter(|l| l.comment_id == comment_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl KbDocumentRepository for MemoryStore {
    async fn get(&self, id: i64) -> Result<Option<KbDocument>> {
        Ok(self.tables.lock().await.kb_documents.get(&id).cloned())
    }

    async fn set_rag_id(&self, id: i64, rag_id: Option<&str>) -> Result<()> {
        if let Some(d) = self.tables.lock().await.kb_documents.get_mut(&id) {
            d.rag_id = rag_id.map(str::to_string);
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn get(&self, id: i64) -> Result<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn list_admin_ids(&self) -> Result<Vec<i64>> {
        Ok(self
            .tables
            .lock()
            .await
            .users
            .values()
            .filter(|u| u.role == UserRole::Admin)
            .map(|u| u.id)
            .collect())
    }
}

#[async_trait]
impl PointRepository for MemoryStore {
    async fn award(&self, req: AwardRequest) -> Result<AwardOutcome> {
        let _guard = self.lock_user(req.user_id).await;

        let (active_exists, today_positive) = {
            let t = self.tables.lock().await;
            let active_exists = t
                .originals(req.user_id, req.point_type, req.foreign_id)
                .any(|r| !t.is_revoked(r.id));
            let since = Utc::now()
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|midnight| midnight.and_utc())
                .unwrap_or_else(Utc::now);
            (active_exists, t.today_positive(req.user_id, since))
        };

        let outcome = match plan_award(&req, active_exists, today_positive) {
            AwardPlan::Insert { point, clipped } => {
                let mut t = self.tables.lock().await;
                let record = t.insert_record(
                    req.user_id,
                    req.point_type,
                    req.foreign_id,
                    req.from_user_id,
                    point,
                    None,
                );
                info!(
                    user_id = req.user_id,
                    point_type = %req.point_type,
                    foreign_id = req.foreign_id,
                    point,
                    clipped,
                    "Points awarded"
                );
                AwardOutcome::Awarded { record, clipped }
            }
            AwardPlan::SelfAction => {
                let mut t = self.tables.lock().await;
                AwardOutcome::SelfAction(t.insert_record(
                    req.user_id,
                    req.point_type,
                    req.foreign_id,
                    req.from_user_id,
                    0,
                    None,
                ))
            }
            AwardPlan::CapReached => AwardOutcome::CapReached,
            AwardPlan::AlreadyAwarded => AwardOutcome::AlreadyAwarded,
        };
        if outcome.delta() == 0 {
            debug!(user_id = req.user_id, point_type = %req.point_type, foreign_id = req.foreign_id, outcome = ?outcome, "Award skipped");
        }
        Ok(outcome)
    }

    async fn revoke(&self, req: RevokeRequest) -> Result<RevokeOutcome> {
        let _guard = self.lock_user(req.user_id).await;

        let (latest, latest_revoked) = {
            let t = self.tables.lock().await;
            let latest = t
                .originals(req.user_id, req.point_type, req.foreign_id)
                .max_by_key(|r| r.id)
                .cloned();
            let revoked = latest.as_ref().is_some_and(|r| t.is_revoked(r.id));
            (latest, revoked)
        };

        let outcome = match (plan_revoke(latest.as_ref(), latest_revoked), latest) {
            (RevokePlan::Insert { point, revoke_id }, Some(original)) => {
                let mut t = self.tables.lock().await;
                let record = t.insert_record(
                    req.user_id,
                    req.point_type,
                    req.foreign_id,
                    original.from_user_id,
                    point,
                    Some(revoke_id),
                );
                info!(
                    user_id = req.user_id,
                    point_type = %req.point_type,
                    foreign_id = req.foreign_id,
                    point,
                    "Points revoked"
                );
                RevokeOutcome::Revoked(record)
            }
            (RevokePlan::AlreadyRevoked, _) => RevokeOutcome::AlreadyRevoked,
            _ => RevokeOutcome::NothingToRevoke,
        };
        if outcome.delta() == 0 {
            debug!(user_id = req.user_id, point_type = %req.point_type, foreign_id = req.foreign_id, outcome = ?outcome, "Revoke skipped");
        }
        Ok(outcome)
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<UserPointRecord>> {
        Ok(self
            .tables
            .lock()
            .await
            .points
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl NotifyRepository for MemoryStore {
    async fn create_if_absent(&self, notify: NewMessageNotify) -> Result<Option<MessageNotify>> {
        let mut t = self.tables.lock().await;
        let exists = t.notifies.iter().any(|n| {
            n.user_id == notify.user_id
                && n.kind == notify.kind
                && n.from_user_id == notify.from_user_id
                && n.discussion_id == notify.discussion_id
                && n.comment_id == notify.comment_id
        });
        if exists {
            return Ok(None);
        }
        let row = MessageNotify {
            id: t.next_id(),
            user_id: notify.user_id,
            user_name: notify.user_name,
            from_user_id: notify.from_user_id,
            from_user_name: notify.from_user_name,
            kind: notify.kind,
            discussion_id: notify.discussion_id,
            comment_id: notify.comment_id,
            content: notify.content,
            read: false,
            created_at: Utc::now(),
        };
        t.notifies.push(row.clone());
        Ok(Some(row))
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<MessageNotify>> {
        Ok(self
            .tables
            .lock()
            .await
            .notifies
            .iter()
            .rev()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, user_id: i64, ids: &[i64]) -> Result<u64> {
        let mut t = self.tables.lock().await;
        let mut changed = 0;
        for n in t
            .notifies
            .iter_mut()
            .filter(|n| n.user_id == user_id && !n.read && ids.contains(&n.id))
        {
            n.read = true;
            changed += 1;
        }
        Ok(changed)
    }
}

#[async_trait]
impl StatRepository for MemoryStore {
    async fn record(&self, stat_type: StatType, key: &str, day: NaiveDate) -> Result<bool> {
        let mut t = self.tables.lock().await;
        let entry = StatEntry {
            stat_type,
            key: key.to_string(),
            day,
        };
        if t.stats.contains(&entry) {
            return Ok(false);
        }
        t.stats.push(entry);
        Ok(true)
    }
}

#[async_trait]
impl TrendRepository for MemoryStore {
    async fn record_created(
        &self,
        discussion_id: i64,
        kind: DiscussionType,
        day: NaiveDate,
    ) -> Result<bool> {
        let mut t = self.tables.lock().await;
        if t.trends.iter().any(|e| e.discussion_id == discussion_id) {
            return Ok(false);
        }
        t.trends.push(TrendEntry {
            discussion_id,
            kind,
            day,
        });
        Ok(true)
    }
}
