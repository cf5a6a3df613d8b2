//! Structural diff between two roster versions of one chain.
//!
//! Shifts are keyed by (staff member, date). Within a key, identical shifts
//! cancel out first; the rest pair up in start-time order as modifications.
//! Leftover removed and added shifts with the same date and times become
//! reassignments. Summary counts are always derived from the lists.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::roster::{RosterRow, RosterShiftRow};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShiftSnapshot {
    pub staff_id: Uuid,
    pub staff_name: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub role: Option<String>,
    pub notes: Option<String>,
    pub has_break: bool,
}

impl From<&RosterShiftRow> for ShiftSnapshot {
    fn from(row: &RosterShiftRow) -> Self {
        Self {
            staff_id: row.staff_id,
            staff_name: row.staff_name.clone(),
            date: row.date,
            start_time: row.start_time,
            end_time: row.end_time,
            role: row.role.clone(),
            notes: row.notes.clone(),
            has_break: row.has_break,
        }
    }
}

impl ShiftSnapshot {
    fn same_content(&self, other: &ShiftSnapshot) -> bool {
        self.start_time == other.start_time
            && self.end_time == other.end_time
            && self.role == other.role
            && self.notes == other.notes
            && self.has_break == other.has_break
    }

    fn sort_key(&self) -> (NaiveDate, NaiveTime, NaiveTime, String) {
        (self.date, self.start_time, self.end_time, self.staff_name.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModifiedShift {
    pub staff_id: Uuid,
    pub staff_name: String,
    pub date: NaiveDate,
    pub before: ShiftSnapshot,
    pub after: ShiftSnapshot,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReassignedShift {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub previous_staff_id: Uuid,
    pub previous_staff_name: String,
    pub new_staff_id: Uuid,
    pub new_staff_name: String,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub reassigned: usize,
    pub total_changes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionDiff {
    pub chain_id: Uuid,
    pub from_roster_id: Uuid,
    pub from_version: i32,
    pub to_roster_id: Uuid,
    pub to_version: i32,
    pub added: Vec<ShiftSnapshot>,
    pub removed: Vec<ShiftSnapshot>,
    pub modified: Vec<ModifiedShift>,
    pub reassigned: Vec<ReassignedShift>,
}

impl VersionDiff {
    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            added: self.added.len(),
            removed: self.removed.len(),
            modified: self.modified.len(),
            reassigned: self.reassigned.len(),
            total_changes: self.added.len()
                + self.removed.len()
                + self.modified.len()
                + self.reassigned.len(),
        }
    }
}

/// JSON shape returned by the diff endpoint.
#[derive(Debug, Serialize)]
pub struct VersionDiffResponse {
    #[serde(flatten)]
    pub diff: VersionDiff,
    pub summary: DiffSummary,
}

impl From<VersionDiff> for VersionDiffResponse {
    fn from(diff: VersionDiff) -> Self {
        let summary = diff.summary();
        Self { diff, summary }
    }
}

fn describe<T: ToString>(field: &str, from: Option<T>, to: Option<T>) -> FieldChange {
    let from = from.map(|v| v.to_string());
    let to = to.map(|v| v.to_string());
    let description = format!(
        "{field} changed from {} to {}",
        from.as_deref().unwrap_or("none"),
        to.as_deref().unwrap_or("none")
    );
    FieldChange {
        field: field.to_string(),
        from,
        to,
        description,
    }
}

fn field_changes(before: &ShiftSnapshot, after: &ShiftSnapshot) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    if before.start_time != after.start_time {
        changes.push(describe(
            "start_time",
            Some(before.start_time.format("%H:%M")),
            Some(after.start_time.format("%H:%M")),
        ));
    }
    if before.end_time != after.end_time {
        changes.push(describe(
            "end_time",
            Some(before.end_time.format("%H:%M")),
            Some(after.end_time.format("%H:%M")),
        ));
    }
    if before.role != after.role {
        changes.push(describe("role", before.role.as_deref(), after.role.as_deref()));
    }
    if before.notes != after.notes {
        changes.push(describe("notes", before.notes.as_deref(), after.notes.as_deref()));
    }
    if before.has_break != after.has_break {
        changes.push(describe("has_break", Some(before.has_break), Some(after.has_break)));
    }
    changes
}

type ShiftKey = (Uuid, NaiveDate);

fn group(shifts: &[RosterShiftRow]) -> BTreeMap<ShiftKey, Vec<ShiftSnapshot>> {
    let mut groups: BTreeMap<ShiftKey, Vec<ShiftSnapshot>> = BTreeMap::new();
    for row in shifts {
        groups
            .entry((row.staff_id, row.date))
            .or_default()
            .push(ShiftSnapshot::from(row));
    }
    for list in groups.values_mut() {
        list.sort_by_key(ShiftSnapshot::sort_key);
    }
    groups
}

/// Compares `from` (source) with `to` (target). Both must belong to one chain.
pub fn diff_versions(
    from: &RosterRow,
    from_shifts: &[RosterShiftRow],
    to: &RosterRow,
    to_shifts: &[RosterShiftRow],
) -> Result<VersionDiff, AppError> {
    if from.chain_id != to.chain_id {
        return Err(AppError::Validation(format!(
            "Rosters {} and {} belong to different version chains",
            from.id, to.id
        )));
    }

    let mut source = group(from_shifts);
    let mut target = group(to_shifts);
    let keys: BTreeSet<ShiftKey> = source.keys().chain(target.keys()).copied().collect();

    let mut added = Vec::new();
    let mut removed = Vec::new();
    let mut modified = Vec::new();

    for key in keys {
        let mut before = source.remove(&key).unwrap_or_default();
        let mut after = target.remove(&key).unwrap_or_default();

        // Identical shifts on both sides are unchanged.
        before.retain(|b| match after.iter().position(|a| a.same_content(b)) {
            Some(i) => {
                after.remove(i);
                false
            }
            None => true,
        });

        let paired = before.len().min(after.len());
        let mut after_rest = after.split_off(paired);
        let before_rest = before.split_off(paired);
        for (b, a) in before.into_iter().zip(after) {
            modified.push(ModifiedShift {
                staff_id: a.staff_id,
                staff_name: a.staff_name.clone(),
                date: a.date,
                changes: field_changes(&b, &a),
                before: b,
                after: a,
            });
        }
        removed.extend(before_rest);
        added.append(&mut after_rest);
    }

    removed.sort_by_key(ShiftSnapshot::sort_key);
    added.sort_by_key(ShiftSnapshot::sort_key);

    let mut reassigned = Vec::new();
    let mut unpaired_removed = Vec::new();
    for r in removed {
        let slot = added.iter().position(|a: &ShiftSnapshot| {
            a.date == r.date && a.start_time == r.start_time && a.end_time == r.end_time
        });
        match slot {
            Some(i) => {
                let a = added.remove(i);
                reassigned.push(ReassignedShift {
                    date: r.date,
                    start_time: r.start_time,
                    end_time: r.end_time,
                    previous_staff_id: r.staff_id,
                    previous_staff_name: r.staff_name,
                    new_staff_id: a.staff_id,
                    new_staff_name: a.staff_name,
                    role: a.role,
                });
            }
            None => unpaired_removed.push(r),
        }
    }

    Ok(VersionDiff {
        chain_id: to.chain_id,
        from_roster_id: from.id,
        from_version: from.version_number,
        to_roster_id: to.id,
        to_version: to.version_number,
        added,
        removed: unpaired_removed,
        modified,
        reassigned,
    })
}
