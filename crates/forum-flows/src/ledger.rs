//! Point ledger service.
//!
//! Resolves point values from [`PointConfig`] and reconciles the ledger
//! against the current state of a like or an accepted answer. Workflows
//! never compute deltas themselves.

use std::sync::Arc;

use tracing::debug;

use forum_core::{
    AwardOutcome, AwardRequest, PointConfig, PointRepository, PointType, Result, RevokeOutcome,
    RevokeRequest,
};

/// Types that share one foreign id and are mutually exclusive.
pub const LIKE_TYPES: [PointType; 2] = [PointType::AnswerLiked, PointType::AnswerDisliked];

#[derive(Clone)]
pub struct PointLedger {
    points: Arc<dyn PointRepository>,
    config: PointConfig,
}

impl PointLedger {
    pub fn new(points: Arc<dyn PointRepository>, config: PointConfig) -> Self {
        Self { points, config }
    }

    pub fn config(&self) -> &PointConfig {
        &self.config
    }

    /// Award `point_type` to `user_id` for the action of `from_user_id`.
    pub async fn award(
        &self,
        user_id: i64,
        point_type: PointType,
        foreign_id: i64,
        from_user_id: i64,
    ) -> Result<AwardOutcome> {
        self.points
            .award(AwardRequest {
                user_id,
                point_type,
                foreign_id,
                from_user_id,
                point: self.config.value(point_type),
                daily_cap: self.config.daily_cap,
            })
            .await
    }

    pub async fn revoke(
        &self,
        user_id: i64,
        point_type: PointType,
        foreign_id: i64,
    ) -> Result<RevokeOutcome> {
        self.points
            .revoke(RevokeRequest {
                user_id,
                point_type,
                foreign_id,
            })
            .await
    }

    /// Bring the ledger in line with current state for one foreign id.
    ///
    /// `wanted` is the type the user should hold now (or `None`); every
    /// other type in `family` is revoked. Returns the net point delta.
    pub async fn reconcile(
        &self,
        user_id: i64,
        foreign_id: i64,
        from_user_id: i64,
        wanted: Option<PointType>,
        family: &[PointType],
    ) -> Result<i64> {
        let mut delta = 0;
        for point_type in family.iter().copied().filter(|t| Some(*t) != wanted) {
            delta += self.revoke(user_id, point_type, foreign_id).await?.delta();
        }
        if let Some(point_type) = wanted {
            delta += self
                .award(user_id, point_type, foreign_id, from_user_id)
                .await?
                .delta();
        }
        debug!(user_id, foreign_id, ?wanted, delta, "Ledger reconciled");
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forum_core::UserRole;
    use forum_db::MemoryStore;

    #[tokio::test]
    async fn test_reconcile_flips_like_to_dislike() {
        let store = MemoryStore::new();
        let author = store.add_user("author", UserRole::Normal).await;
        let voter = store.add_user("voter", UserRole::Normal).await;
        let ledger = PointLedger::new(Arc::new(store.clone()), PointConfig::default());

        let liked = ledger
            .reconcile(author.id, 5, voter.id, Some(PointType::AnswerLiked), &LIKE_TYPES)
            .await
            .unwrap();
        assert_eq!(liked, 10);

        let flipped = ledger
            .reconcile(author.id, 5, voter.id, Some(PointType::AnswerDisliked), &LIKE_TYPES)
            .await
            .unwrap();
        assert_eq!(flipped, -12);

        let removed = ledger
            .reconcile(author.id, 5, voter.id, None, &LIKE_TYPES)
            .await
            .unwrap();
        assert_eq!(removed, 2);

        // Converged: a repeat changes nothing.
        let again = ledger
            .reconcile(author.id, 5, voter.id, None, &LIKE_TYPES)
            .await
            .unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn test_award_uses_configured_value() {
        let store = MemoryStore::new();
        let author = store.add_user("author", UserRole::Normal).await;
        let asker = store.add_user("asker", UserRole::Normal).await;
        let ledger = PointLedger::new(Arc::new(store.clone()), PointConfig::default());

        let outcome = ledger
            .award(author.id, PointType::AnswerAccepted, 1, asker.id)
            .await
            .unwrap();
        assert_eq!(outcome.delta(), 15);
    }
}
