//! Point ledger rules.
//!
//! Repositories call these planning functions while holding the per-user
//! lock, so the PostgreSQL and in-memory stores apply identical rules. The
//! functions are pure: they take what the store read and return what the
//! store must write.

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::models::{PointType, UserPointRecord};

/// Point values and the daily cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointConfig {
    pub daily_cap: i64,
    pub answer_accepted: i64,
    pub accept_answer: i64,
    pub answer_liked: i64,
    pub answer_disliked: i64,
}

impl Default for PointConfig {
    fn default() -> Self {
        Self {
            daily_cap: defaults::POINT_DAILY_CAP,
            answer_accepted: defaults::POINT_ANSWER_ACCEPTED,
            accept_answer: defaults::POINT_ACCEPT_ANSWER,
            answer_liked: defaults::POINT_ANSWER_LIKED,
            answer_disliked: defaults::POINT_ANSWER_DISLIKED,
        }
    }
}

impl PointConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `POINT_DAILY_CAP` | `100` | Max positive points per user per UTC day |
    /// | `POINT_ANSWER_ACCEPTED` | `15` | Answer author, on accept |
    /// | `POINT_ACCEPT_ANSWER` | `2` | Asker, on accept |
    /// | `POINT_ANSWER_LIKED` | `10` | Comment author, per like |
    /// | `POINT_ANSWER_DISLIKED` | `-2` | Comment author, per dislike |
    pub fn from_env() -> Self {
        fn var(name: &str, default: i64) -> i64 {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(default)
        }

        Self {
            daily_cap: var("POINT_DAILY_CAP", defaults::POINT_DAILY_CAP).max(0),
            answer_accepted: var("POINT_ANSWER_ACCEPTED", defaults::POINT_ANSWER_ACCEPTED),
            accept_answer: var("POINT_ACCEPT_ANSWER", defaults::POINT_ACCEPT_ANSWER),
            answer_liked: var("POINT_ANSWER_LIKED", defaults::POINT_ANSWER_LIKED),
            answer_disliked: var("POINT_ANSWER_DISLIKED", defaults::POINT_ANSWER_DISLIKED),
        }
    }

    /// Set the daily cap.
    pub fn with_daily_cap(mut self, cap: i64) -> Self {
        self.daily_cap = cap;
        self
    }

    /// Configured value of a point type.
    pub fn value(&self, point_type: PointType) -> i64 {
        match point_type {
            PointType::AnswerAccepted => self.answer_accepted,
            PointType::AcceptAnswer => self.accept_answer,
            PointType::AnswerLiked => self.answer_liked,
            PointType::AnswerDisliked => self.answer_disliked,
        }
    }
}

/// Input to an award, resolved against [`PointConfig`] by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwardRequest {
    /// Beneficiary.
    pub user_id: i64,
    pub point_type: PointType,
    pub foreign_id: i64,
    /// Acting user.
    pub from_user_id: i64,
    /// Configured value before capping.
    pub point: i64,
    pub daily_cap: i64,
}

/// Input to a revoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevokeRequest {
    pub user_id: i64,
    pub point_type: PointType,
    pub foreign_id: i64,
}

/// Result of an award.
#[derive(Debug, Clone, PartialEq)]
pub enum AwardOutcome {
    /// A record was written. `clipped` is true when the cap reduced it.
    Awarded {
        record: UserPointRecord,
        clipped: bool,
    },
    /// Acting user and beneficiary are the same; a zero-point record was
    /// written and the total is unchanged.
    SelfAction(UserPointRecord),
    /// Today's cap is exhausted; nothing written.
    CapReached,
    /// An active record for the key already exists; nothing written.
    AlreadyAwarded,
}

impl AwardOutcome {
    /// Point delta applied to the user's total.
    pub fn delta(&self) -> i64 {
        match self {
            AwardOutcome::Awarded { record, .. } => record.point,
            _ => 0,
        }
    }
}

/// Result of a revoke.
#[derive(Debug, Clone, PartialEq)]
pub enum RevokeOutcome {
    /// A reversing record was written.
    Revoked(UserPointRecord),
    /// The latest matching record is already reversed.
    AlreadyRevoked,
    /// No record matches the key.
    NothingToRevoke,
}

impl RevokeOutcome {
    pub fn delta(&self) -> i64 {
        match self {
            RevokeOutcome::Revoked(record) => record.point,
            _ => 0,
        }
    }
}

/// What the store must do for an award.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwardPlan {
    /// Insert a record worth `point` and add it to the running total.
    Insert { point: i64, clipped: bool },
    /// Insert a zero-point record; the total stays as it is.
    SelfAction,
    CapReached,
    AlreadyAwarded,
}

/// Decide an award.
///
/// `active_exists` is whether an unrevoked original record for
/// (user, type, foreign id) exists; `today_positive` is the sum of today's
/// positive, unrevoked original records for the user.
pub fn plan_award(req: &AwardRequest, active_exists: bool, today_positive: i64) -> AwardPlan {
    if active_exists {
        return AwardPlan::AlreadyAwarded;
    }
    if req.user_id == req.from_user_id {
        return AwardPlan::SelfAction;
    }
    if req.point <= 0 {
        // Penalties are not capped.
        return AwardPlan::Insert {
            point: req.point,
            clipped: false,
        };
    }

    let remaining = req.daily_cap - today_positive;
    if remaining <= 0 {
        return AwardPlan::CapReached;
    }
    if req.point > remaining {
        AwardPlan::Insert {
            point: remaining,
            clipped: true,
        }
    } else {
        AwardPlan::Insert {
            point: req.point,
            clipped: false,
        }
    }
}

/// What the store must do for a revoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevokePlan {
    /// Insert a record worth `point` reversing `revoke_id`.
    Insert { point: i64, revoke_id: i64 },
    AlreadyRevoked,
    NothingToRevoke,
}

/// Decide a revoke.
///
/// `latest` is the most recent original record for the key and
/// `latest_revoked` whether a reversing record already points at it.
pub fn plan_revoke(latest: Option<&UserPointRecord>, latest_revoked: bool) -> RevokePlan {
    match latest {
        None => RevokePlan::NothingToRevoke,
        Some(_) if latest_revoked => RevokePlan::AlreadyRevoked,
        Some(record) => RevokePlan::Insert {
            point: -record.point,
            revoke_id: record.id,
        },
    }
}

/// Apply a delta to a running total, flooring at [`defaults::POINT_FLOOR`].
pub fn apply_delta(total: i64, delta: i64) -> i64 {
    total.saturating_add(delta).max(defaults::POINT_FLOOR)
}
