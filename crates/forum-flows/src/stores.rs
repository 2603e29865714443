//! Repository handles shared by every workflow.

use std::sync::Arc;

use forum_core::{
    CommentLikeRepository, CommentRepository, DiscussionRepository, KbDocumentRepository,
    NotifyRepository, PointRepository, StatRepository, TrendRepository, UserRepository,
};
use forum_db::{Database, MemoryStore};

#[derive(Clone)]
pub struct Stores {
    pub discussions: Arc<dyn DiscussionRepository>,
    pub comments: Arc<dyn CommentRepository>,
    pub comment_likes: Arc<dyn CommentLikeRepository>,
    pub kb_documents: Arc<dyn KbDocumentRepository>,
    pub users: Arc<dyn UserRepository>,
    pub points: Arc<dyn PointRepository>,
    pub notifies: Arc<dyn NotifyRepository>,
    pub stats: Arc<dyn StatRepository>,
    pub trends: Arc<dyn TrendRepository>,
}

impl Stores {
    pub fn postgres(db: &Database) -> Self {
        Self {
            discussions: Arc::new(db.discussions.clone()),
            comments: Arc::new(db.comments.clone()),
            comment_likes: Arc::new(db.comment_likes.clone()),
            kb_documents: Arc::new(db.kb_documents.clone()),
            users: Arc::new(db.users.clone()),
            points: Arc::new(db.points.clone()),
            notifies: Arc::new(db.notifies.clone()),
            stats: Arc::new(db.stats.clone()),
            trends: Arc::new(db.stats.clone()),
        }
    }

    pub fn memory(store: &MemoryStore) -> Self {
        Self {
            discussions: Arc::new(store.clone()),
            comments: Arc::new(store.clone()),
            comment_likes: Arc::new(store.clone()),
            kb_documents: Arc::new(store.clone()),
            users: Arc::new(store.clone()),
            points: Arc::new(store.clone()),
            notifies: Arc::new(store.clone()),
            stats: Arc::new(store.clone()),
            trends: Arc::new(store.clone()),
        }
    }
}
