//! Relational persistence for rosters and venue staff.

use async_trait::async_trait;
use chrono::Duration;
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::roster::{RosterHistoryRow, RosterRow, RosterShiftRow, UnmatchedEntryRow};
use crate::models::staff::StaffMember;
use crate::roster::versioning::{
    plan_version, CreatedRoster, HistoryAction, NewRosterRequest, RosterStatus,
    SOURCE_IMAGE_UPLOAD,
};

/// Read-only view of the portal's staff records.
#[async_trait]
pub trait StaffDirectory: Send + Sync {
    async fn venue_staff(&self, venue_id: Uuid) -> Result<Vec<StaffMember>, AppError>;
}

#[async_trait]
pub trait RosterStore: Send + Sync {
    /// Writes a roster version with all its shifts atomically.
    async fn create_roster(&self, request: NewRosterRequest) -> Result<CreatedRoster, AppError>;

    /// Makes `roster_id` the active version for its venue and week.
    async fn activate_version(
        &self,
        roster_id: Uuid,
        actor: Option<Uuid>,
    ) -> Result<RosterRow, AppError>;

    async fn get_roster(&self, roster_id: Uuid) -> Result<Option<RosterRow>, AppError>;

    async fn roster_shifts(&self, roster_id: Uuid) -> Result<Vec<RosterShiftRow>, AppError>;

    async fn unmatched_entries(&self, roster_id: Uuid)
        -> Result<Vec<UnmatchedEntryRow>, AppError>;

    /// Every version in the chain, oldest first.
    async fn chain_versions(&self, chain_id: Uuid) -> Result<Vec<RosterRow>, AppError>;

    /// Audit records for one roster, oldest first.
    async fn history(&self, roster_id: Uuid) -> Result<Vec<RosterHistoryRow>, AppError>;
}

pub struct PgRosterStore {
    pool: PgPool,
}

impl PgRosterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn active_for_week(
        &self,
        venue_id: Uuid,
        week_start: chrono::NaiveDate,
    ) -> Result<Option<RosterRow>, AppError> {
        Ok(sqlx::query_as::<_, RosterRow>(
            "SELECT * FROM rosters WHERE venue_id = $1 AND week_start = $2 AND is_active",
        )
        .bind(venue_id)
        .bind(week_start)
        .fetch_optional(&self.pool)
        .await?)
    }
}

async fn insert_history(
    tx: &mut Transaction<'_, Postgres>,
    roster_id: Uuid,
    action: HistoryAction,
    shift_count: i64,
    unmatched_count: i64,
    actor: Option<Uuid>,
    details: serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO roster_history
            (id, roster_id, action, source, shift_count, unmatched_count, actor, details)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(roster_id)
    .bind(action.as_str())
    .bind(SOURCE_IMAGE_UPLOAD)
    .bind(shift_count as i32)
    .bind(unmatched_count as i32)
    .bind(actor)
    .bind(details)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn is_unique_violation(e: &AppError) -> bool {
    matches!(e, AppError::Database(sqlx::Error::Database(db)) if db.is_unique_violation())
}

#[async_trait]
impl StaffDirectory for PgRosterStore {
    async fn venue_staff(&self, venue_id: Uuid) -> Result<Vec<StaffMember>, AppError> {
        Ok(sqlx::query_as::<_, StaffMember>(
            r#"
            SELECT id, first_name, last_name
            FROM venue_staff
            WHERE venue_id = $1 AND is_active
            ORDER BY last_name, first_name, id
            "#,
        )
        .bind(venue_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

impl PgRosterStore {
    async fn create_roster_tx(&self, request: &NewRosterRequest) -> Result<CreatedRoster, AppError> {
        let mut tx = self.pool.begin().await?;

        // Lock the active row so a concurrent confirm for the same week waits.
        let active: Option<RosterRow> = sqlx::query_as(
            r#"
            SELECT * FROM rosters
            WHERE venue_id = $1 AND week_start = $2 AND is_active
            FOR UPDATE
            "#,
        )
        .bind(request.venue_id)
        .bind(request.week_start)
        .fetch_optional(&mut *tx)
        .await?;

        let chain_max: Option<i32> = match &active {
            Some(a) => {
                sqlx::query_scalar("SELECT MAX(version_number) FROM rosters WHERE chain_id = $1")
                    .bind(a.chain_id)
                    .fetch_one(&mut *tx)
                    .await?
            }
            None => None,
        };

        let plan = plan_version(
            active.as_ref(),
            chain_max,
            request.create_as_new_version,
            request.version_number,
        )?;

        if let Some(previous) = plan.deactivate {
            sqlx::query("UPDATE rosters SET is_active = false WHERE id = $1")
                .bind(previous)
                .execute(&mut *tx)
                .await?;
        }

        let roster: RosterRow = sqlx::query_as(
            r#"
            INSERT INTO rosters
                (id, venue_id, week_start, week_end, status, chain_id, version_number,
                 parent_id, is_active, source, source_image_url, extraction_confidence, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, true, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.venue_id)
        .bind(request.week_start)
        .bind(request.week_start + Duration::days(6))
        .bind(RosterStatus::Draft.as_str())
        .bind(plan.chain_id)
        .bind(plan.version_number)
        .bind(plan.parent_id)
        .bind(SOURCE_IMAGE_UPLOAD)
        .bind(request.source_image_url.as_deref())
        .bind(request.extraction_confidence.map(i32::from))
        .bind(request.created_by)
        .fetch_one(&mut *tx)
        .await?;

        for shift in &request.shifts {
            sqlx::query(
                r#"
                INSERT INTO roster_shifts
                    (id, roster_id, staff_id, staff_name, date, start_time, end_time,
                     role, notes, has_break, original_name, match_confidence)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(roster.id)
            .bind(shift.staff_id)
            .bind(&shift.staff_name)
            .bind(shift.date)
            .bind(shift.start_time)
            .bind(shift.end_time)
            .bind(shift.role.as_deref())
            .bind(shift.notes.as_deref())
            .bind(shift.has_break)
            .bind(&shift.original_name)
            .bind(i32::from(shift.match_confidence))
            .execute(&mut *tx)
            .await?;
        }

        for entry in &request.unmatched {
            sqlx::query(
                r#"
                INSERT INTO unmatched_roster_entries
                    (id, roster_id, extracted_name, date, start_time, end_time, role, raw_cell, reason)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(roster.id)
            .bind(&entry.extracted_name)
            .bind(entry.date)
            .bind(entry.start_time.as_deref())
            .bind(entry.end_time.as_deref())
            .bind(entry.role.as_deref())
            .bind(entry.raw_cell.as_deref())
            .bind(&entry.reason)
            .execute(&mut *tx)
            .await?;
        }

        insert_history(
            &mut tx,
            roster.id,
            plan.action,
            request.shifts.len() as i64,
            request.unmatched.len() as i64,
            Some(request.created_by),
            json!({
                "chain_id": plan.chain_id,
                "version_number": plan.version_number,
                "parent_id": plan.parent_id,
                "deactivated_roster_id": plan.deactivate,
                "extraction_confidence": request.extraction_confidence,
                "source_image_url": request.source_image_url,
            }),
        )
        .await?;

        tx.commit().await?;

        info!(
            roster_id = %roster.id,
            chain_id = %roster.chain_id,
            version = roster.version_number,
            shifts = request.shifts.len(),
            unmatched = request.unmatched.len(),
            "Roster version created"
        );

        Ok(CreatedRoster {
            roster,
            shift_count: request.shifts.len(),
            unmatched_count: request.unmatched.len(),
            deactivated_roster_id: plan.deactivate,
        })
    }
}

#[async_trait]
impl RosterStore for PgRosterStore {
    async fn create_roster(&self, request: NewRosterRequest) -> Result<CreatedRoster, AppError> {
        match self.create_roster_tx(&request).await {
            // Another confirm activated a roster for this week between our
            // read and our insert; the partial unique index rejected ours.
            Err(e) if is_unique_violation(&e) => {
                warn!(venue_id = %request.venue_id, "Concurrent roster activation detected");
                match self
                    .active_for_week(request.venue_id, request.week_start)
                    .await?
                {
                    Some(active) => Err(AppError::RosterConflict {
                        roster_id: active.id,
                        version_number: active.version_number,
                    }),
                    None => Err(e),
                }
            }
            other => other,
        }
    }

    async fn activate_version(
        &self,
        roster_id: Uuid,
        actor: Option<Uuid>,
    ) -> Result<RosterRow, AppError> {
        let mut tx = self.pool.begin().await?;

        let target: RosterRow = sqlx::query_as("SELECT * FROM rosters WHERE id = $1 FOR UPDATE")
            .bind(roster_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Roster {roster_id} not found")))?;

        if target.is_active {
            return Ok(target);
        }

        let deactivated: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE rosters SET is_active = false
            WHERE venue_id = $1 AND week_start = $2 AND is_active
            RETURNING id
            "#,
        )
        .bind(target.venue_id)
        .bind(target.week_start)
        .fetch_optional(&mut *tx)
        .await?;

        let activated: RosterRow =
            sqlx::query_as("UPDATE rosters SET is_active = true WHERE id = $1 RETURNING *")
                .bind(roster_id)
                .fetch_one(&mut *tx)
                .await?;

        let shift_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM roster_shifts WHERE roster_id = $1")
                .bind(roster_id)
                .fetch_one(&mut *tx)
                .await?;
        let unmatched_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM unmatched_roster_entries WHERE roster_id = $1")
                .bind(roster_id)
                .fetch_one(&mut *tx)
                .await?;

        insert_history(
            &mut tx,
            roster_id,
            HistoryAction::Activated,
            shift_count,
            unmatched_count,
            actor,
            json!({ "deactivated_roster_id": deactivated }),
        )
        .await?;

        tx.commit().await?;

        info!(
            roster_id = %roster_id,
            version = activated.version_number,
            "Roster version activated"
        );
        Ok(activated)
    }

    async fn get_roster(&self, roster_id: Uuid) -> Result<Option<RosterRow>, AppError> {
        Ok(sqlx::query_as::<_, RosterRow>("SELECT * FROM rosters WHERE id = $1")
            .bind(roster_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn roster_shifts(&self, roster_id: Uuid) -> Result<Vec<RosterShiftRow>, AppError> {
        Ok(sqlx::query_as::<_, RosterShiftRow>(
            r#"
            SELECT * FROM roster_shifts
            WHERE roster_id = $1
            ORDER BY date, start_time, staff_name
            "#,
        )
        .bind(roster_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn unmatched_entries(
        &self,
        roster_id: Uuid,
    ) -> Result<Vec<UnmatchedEntryRow>, AppError> {
        Ok(sqlx::query_as::<_, UnmatchedEntryRow>(
            r#"
            SELECT * FROM unmatched_roster_entries
            WHERE roster_id = $1
            ORDER BY date NULLS LAST, extracted_name
            "#,
        )
        .bind(roster_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn chain_versions(&self, chain_id: Uuid) -> Result<Vec<RosterRow>, AppError> {
        Ok(sqlx::query_as::<_, RosterRow>(
            "SELECT * FROM rosters WHERE chain_id = $1 ORDER BY version_number",
        )
        .bind(chain_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn history(&self, roster_id: Uuid) -> Result<Vec<RosterHistoryRow>, AppError> {
        Ok(sqlx::query_as::<_, RosterHistoryRow>(
            "SELECT * FROM roster_history WHERE roster_id = $1 ORDER BY created_at, id",
        )
        .bind(roster_id)
        .fetch_all(&self.pool)
        .await?)
    }
}
