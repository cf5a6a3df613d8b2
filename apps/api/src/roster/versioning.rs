//! Version chain rules and the records a confirmed extraction turns into.
//!
//! Append-only: a new version is a new row. Only `is_active` ever flips on
//! rows that already exist.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::matching::{MatchReport, MatchedShift};
use crate::models::roster::RosterRow;

pub const SOURCE_IMAGE_UPLOAD: &str = "image_upload";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RosterStatus {
    Draft,
    Published,
    Archived,
}

impl RosterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RosterStatus::Draft => "draft",
            RosterStatus::Published => "published",
            RosterStatus::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Created,
    NewVersion,
    Activated,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Created => "created",
            HistoryAction::NewVersion => "new_version",
            HistoryAction::Activated => "activated",
        }
    }
}

/// Where a new roster row goes in its chain.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionPlan {
    pub chain_id: Uuid,
    pub version_number: i32,
    pub parent_id: Option<Uuid>,
    /// Active roster to deactivate in the same transaction.
    pub deactivate: Option<Uuid>,
    pub action: HistoryAction,
}

/// Decides chain id, version number and parent for a new roster.
///
/// `active` is the currently active roster for the venue and week;
/// `chain_max` the highest version number in its chain.
pub fn plan_version(
    active: Option<&RosterRow>,
    chain_max: Option<i32>,
    create_as_new_version: bool,
    requested: Option<i32>,
) -> Result<VersionPlan, AppError> {
    match active {
        Some(existing) if !create_as_new_version => Err(AppError::RosterConflict {
            roster_id: existing.id,
            version_number: existing.version_number,
        }),
        Some(existing) => {
            let max = chain_max.unwrap_or(existing.version_number);
            let version_number = match requested {
                Some(n) if n <= max => {
                    return Err(AppError::Validation(format!(
                        "Version {n} must be greater than the chain's current version {max}"
                    )))
                }
                Some(n) => n,
                None => max + 1,
            };
            Ok(VersionPlan {
                chain_id: existing.chain_id,
                version_number,
                parent_id: Some(existing.id),
                deactivate: Some(existing.id),
                action: HistoryAction::NewVersion,
            })
        }
        None => {
            let version_number = requested.unwrap_or(1);
            if version_number < 1 {
                return Err(AppError::Validation(
                    "Version numbers start at 1".to_string(),
                ));
            }
            Ok(VersionPlan {
                chain_id: Uuid::new_v4(),
                version_number,
                parent_id: None,
                deactivate: None,
                action: HistoryAction::Created,
            })
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Records to persist
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewRosterShift {
    pub staff_id: Uuid,
    pub staff_name: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub role: Option<String>,
    pub notes: Option<String>,
    pub has_break: bool,
    pub original_name: String,
    pub match_confidence: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewUnmatchedEntry {
    pub extracted_name: String,
    pub date: Option<NaiveDate>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub role: Option<String>,
    pub raw_cell: Option<String>,
    pub reason: String,
}

/// Everything one confirm writes, in one transaction.
#[derive(Debug, Clone)]
pub struct NewRosterRequest {
    pub venue_id: Uuid,
    pub week_start: NaiveDate,
    pub created_by: Uuid,
    pub create_as_new_version: bool,
    pub version_number: Option<i32>,
    pub source_image_url: Option<String>,
    pub extraction_confidence: Option<u8>,
    pub shifts: Vec<NewRosterShift>,
    pub unmatched: Vec<NewUnmatchedEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedRoster {
    pub roster: RosterRow,
    pub shift_count: usize,
    pub unmatched_count: usize,
    pub deactivated_roster_id: Option<Uuid>,
}

fn parse_hhmm(value: Option<&str>) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value?, "%H:%M").ok()
}

fn unmatched(m: &MatchedShift, reason: &str) -> NewUnmatchedEntry {
    NewUnmatchedEntry {
        extracted_name: m.shift.staff_name.clone(),
        date: m.shift.date,
        start_time: m.shift.start_time.clone(),
        end_time: m.shift.end_time.clone(),
        role: m.shift.role.clone(),
        raw_cell: m.shift.raw_cell.clone(),
        reason: reason.to_string(),
    }
}

/// Splits matched shifts into roster shifts and unmatched entries.
///
/// A shift becomes a roster shift only with a resolved staff member, a date,
/// and readable start and end times. Nothing is dropped.
pub fn build_shift_records(report: &MatchReport) -> (Vec<NewRosterShift>, Vec<NewUnmatchedEntry>) {
    let mut shifts = Vec::new();
    let mut entries = Vec::new();

    for m in &report.shifts {
        let (Some(staff_id), Some(staff_name)) =
            (m.staff_match.staff_id, m.staff_match.staff_name.clone())
        else {
            entries.push(unmatched(m, "no matching staff member"));
            continue;
        };
        let Some(date) = m.shift.date else {
            entries.push(unmatched(m, "date could not be read"));
            continue;
        };
        let (Some(start_time), Some(end_time)) = (
            parse_hhmm(m.shift.start_time.as_deref()),
            parse_hhmm(m.shift.end_time.as_deref()),
        ) else {
            entries.push(unmatched(m, "start or end time could not be read"));
            continue;
        };

        let notes = (!m.shift.uncertainty_notes.is_empty())
            .then(|| m.shift.uncertainty_notes.join("; "));

        shifts.push(NewRosterShift {
            staff_id,
            staff_name,
            date,
            start_time,
            end_time,
            role: m.shift.role.clone(),
            notes,
            has_break: m.shift.has_break,
            original_name: m.shift.staff_name.clone(),
            match_confidence: m.staff_match.confidence,
        });
    }

    (shifts, entries)
}
