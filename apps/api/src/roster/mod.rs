// Roster Reconciler / Version Chain.
// Confirmed extractions become append-only roster versions; diffs are computed on demand.

use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::roster::{RosterRow, RosterShiftRow, UnmatchedEntryRow};
use crate::roster::diff::{diff_versions, VersionDiff};
use crate::roster::store::RosterStore;

pub mod diff;
pub mod handlers;
pub mod store;
pub mod versioning;

#[derive(Debug, Serialize)]
pub struct RosterDetail {
    pub roster: RosterRow,
    pub shifts: Vec<RosterShiftRow>,
    pub unmatched: Vec<UnmatchedEntryRow>,
}

async fn require_roster(store: &dyn RosterStore, roster_id: Uuid) -> Result<RosterRow, AppError> {
    store
        .get_roster(roster_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Roster {roster_id} not found")))
}

/// Roster with its shifts and unmatched entries.
pub async fn get_roster_detail(
    store: &dyn RosterStore,
    roster_id: Uuid,
) -> Result<RosterDetail, AppError> {
    let roster = require_roster(store, roster_id).await?;
    let shifts = store.roster_shifts(roster_id).await?;
    let unmatched = store.unmatched_entries(roster_id).await?;
    Ok(RosterDetail {
        roster,
        shifts,
        unmatched,
    })
}

pub async fn list_chain_versions(
    store: &dyn RosterStore,
    chain_id: Uuid,
) -> Result<Vec<RosterRow>, AppError> {
    let versions = store.chain_versions(chain_id).await?;
    if versions.is_empty() {
        return Err(AppError::NotFound(format!("Roster chain {chain_id} not found")));
    }
    Ok(versions)
}

/// Diff between two versions of `chain_id`, `from` as the source.
pub async fn diff_chain_versions(
    store: &dyn RosterStore,
    chain_id: Uuid,
    from_id: Uuid,
    to_id: Uuid,
) -> Result<VersionDiff, AppError> {
    let from = require_roster(store, from_id).await?;
    let to = require_roster(store, to_id).await?;
    for roster in [&from, &to] {
        if roster.chain_id != chain_id {
            return Err(AppError::Validation(format!(
                "Roster {} is not part of chain {chain_id}",
                roster.id
            )));
        }
    }
    let from_shifts = store.roster_shifts(from_id).await?;
    let to_shifts = store.roster_shifts(to_id).await?;
    diff_versions(&from, &from_shifts, &to, &to_shifts)
}
