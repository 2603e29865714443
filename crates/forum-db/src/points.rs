//! Point ledger repository.
//!
//! Award and revoke run in one transaction that first takes a transaction
//! scoped advisory lock keyed by the beneficiary, so concurrent likes on the
//! same user's content serialize on the cap check and the running total.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::{debug, info};

use forum_core::defaults::POINT_FLOOR;
use forum_core::ledger::{plan_award, plan_revoke};
use forum_core::{
    AwardOutcome, AwardPlan, AwardRequest, Error, PointRepository, Result, RevokeOutcome,
    RevokePlan, RevokeRequest, UserPointRecord,
};

const RECORD_COLUMNS: &str =
    "id, user_id, point_type, foreign_id, from_user_id, point, revoke_id, created_at";

fn parse_record(row: PgRow) -> Result<UserPointRecord> {
    let point_type: String = row.get("point_type");
    Ok(UserPointRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        point_type: point_type.parse()?,
        foreign_id: row.get("foreign_id"),
        from_user_id: row.get("from_user_id"),
        point: row.get("point"),
        revoke_id: row.get("revoke_id"),
        created_at: row.get("created_at"),
    })
}

/// Start of the current UTC day.
fn today_start() -> DateTime<Utc> {
    let now = Utc::now();
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

/// PostgreSQL implementation of PointRepository.
#[derive(Clone)]
pub struct PgPointRepository {
    pool: Pool<Postgres>,
}

impl PgPointRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn lock_user(tx: &mut Transaction<'_, Postgres>, user_id: i64) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("user_point:{}", user_id))
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn insert_record(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        point_type: &str,
        foreign_id: i64,
        from_user_id: i64,
        point: i64,
        revoke_id: Option<i64>,
    ) -> Result<UserPointRecord> {
        let row = sqlx::query(&format!(
            "INSERT INTO user_point_record
                 (user_id, point_type, foreign_id, from_user_id, point, revoke_id)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(user_id)
        .bind(point_type)
        .bind(foreign_id)
        .bind(from_user_id)
        .bind(point)
        .bind(revoke_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(Error::Database)?;
        parse_record(row)
    }

    async fn bump_total(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        delta: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE app_user SET point = GREATEST(point + $2, $3) WHERE id = $1")
            .bind(user_id)
            .bind(delta)
            .bind(POINT_FLOOR)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}

#[async_trait]
impl PointRepository for PgPointRepository {
    async fn award(&self, req: AwardRequest) -> Result<AwardOutcome> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        Self::lock_user(&mut tx, req.user_id).await?;

        let active_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM user_point_record r
                 WHERE r.user_id = $1 AND r.point_type = $2 AND r.foreign_id = $3
                   AND r.revoke_id IS NULL
                   AND NOT EXISTS (SELECT 1 FROM user_point_record x WHERE x.revoke_id = r.id)
             )",
        )
        .bind(req.user_id)
        .bind(req.point_type.as_str())
        .bind(req.foreign_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let today_positive: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(r.point), 0)::BIGINT FROM user_point_record r
             WHERE r.user_id = $1 AND r.point > 0 AND r.revoke_id IS NULL
               AND r.created_at >= $2
               AND NOT EXISTS (SELECT 1 FROM user_point_record x WHERE x.revoke_id = r.id)",
        )
        .bind(req.user_id)
        .bind(today_start())
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let outcome = match plan_award(&req, active_exists, today_positive) {
            AwardPlan::Insert { point, clipped } => {
                let record = Self::insert_record(
                    &mut tx,
                    req.user_id,
                    req.point_type.as_str(),
                    req.foreign_id,
                    req.from_user_id,
                    point,
                    None,
                )
                .await?;
                Self::bump_total(&mut tx, req.user_id, point).await?;
                AwardOutcome::Awarded { record, clipped }
            }
            AwardPlan::SelfAction => AwardOutcome::SelfAction(
                Self::insert_record(
                    &mut tx,
                    req.user_id,
                    req.point_type.as_str(),
                    req.foreign_id,
                    req.from_user_id,
                    0,
                    None,
                )
                .await?,
            ),
            AwardPlan::CapReached => AwardOutcome::CapReached,
            AwardPlan::AlreadyAwarded => AwardOutcome::AlreadyAwarded,
        };

        tx.commit().await.map_err(Error::Database)?;

        match &outcome {
            AwardOutcome::Awarded { record, clipped } => info!(
                user_id = req.user_id,
                point_type = %req.point_type,
                foreign_id = req.foreign_id,
                point = record.point,
                clipped,
                "Points awarded"
            ),
            other => debug!(
                user_id = req.user_id,
                point_type = %req.point_type,
                foreign_id = req.foreign_id,
                outcome = ?other,
                "Award skipped"
            ),
        }
        Ok(outcome)
    }

    async fn revoke(&self, req: RevokeRequest) -> Result<RevokeOutcome> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        Self::lock_user(&mut tx, req.user_id).await?;

        let latest = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM user_point_record
             WHERE user_id = $1 AND point_type = $2 AND foreign_id = $3 AND revoke_id IS NULL
             ORDER BY id DESC LIMIT 1"
        ))
        .bind(req.user_id)
        .bind(req.point_type.as_str())
        .bind(req.foreign_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        .map(parse_record)
        .transpose()?;

        let latest_revoked = match &latest {
            Some(record) => sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM user_point_record WHERE revoke_id = $1)",
            )
            .bind(record.id)
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::Database)?,
            None => false,
        };

        let outcome = match (plan_revoke(latest.as_ref(), latest_revoked), &latest) {
            (RevokePlan::Insert { point, revoke_id }, Some(original)) => {
                let record = Self::insert_record(
                    &mut tx,
                    req.user_id,
                    req.point_type.as_str(),
                    req.foreign_id,
                    original.from_user_id,
                    point,
                    Some(revoke_id),
                )
                .await?;
                Self::bump_total(&mut tx, req.user_id, point).await?;
                RevokeOutcome::Revoked(record)
            }
            (RevokePlan::AlreadyRevoked, _) => RevokeOutcome::AlreadyRevoked,
            _ => RevokeOutcome::NothingToRevoke,
        };

        tx.commit().await.map_err(Error::Database)?;

        if let RevokeOutcome::Revoked(record) = &outcome {
            info!(
                user_id = req.user_id,
                point_type = %req.point_type,
                foreign_id = req.foreign_id,
                point = record.point,
                "Points revoked"
            );
        } else {
            debug!(user_id = req.user_id, point_type = %req.point_type, foreign_id = req.foreign_id, outcome = ?outcome, "Revoke skipped");
        }
        Ok(outcome)
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<UserPointRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM user_point_record WHERE user_id = $1 ORDER BY id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.into_iter().map(parse_record).collect()
    }
}
