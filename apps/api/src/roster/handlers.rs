use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::roster::{RosterHistoryRow, RosterRow};
use crate::roster::diff::VersionDiffResponse;
use crate::roster::{diff_chain_versions, get_roster_detail, list_chain_versions, RosterDetail};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ActivateRequest {
    pub actor: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct DiffQuery {
    pub from: Uuid,
    pub to: Uuid,
}

/// GET /api/v1/rosters/:id
pub async fn handle_get_roster(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RosterDetail>, AppError> {
    Ok(Json(get_roster_detail(state.rosters.as_ref(), id).await?))
}

/// GET /api/v1/rosters/:id/history
pub async fn handle_roster_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<RosterHistoryRow>>, AppError> {
    if state.rosters.get_roster(id).await?.is_none() {
        return Err(AppError::NotFound(format!("Roster {id} not found")));
    }
    Ok(Json(state.rosters.history(id).await?))
}

/// POST /api/v1/rosters/:id/activate
pub async fn handle_activate_version(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ActivateRequest>>,
) -> Result<Json<RosterRow>, AppError> {
    let actor = body.and_then(|Json(req)| req.actor);
    Ok(Json(state.rosters.activate_version(id, actor).await?))
}

/// GET /api/v1/roster-chains/:chain_id/versions
pub async fn handle_chain_versions(
    State(state): State<AppState>,
    Path(chain_id): Path<Uuid>,
) -> Result<Json<Vec<RosterRow>>, AppError> {
    Ok(Json(list_chain_versions(state.rosters.as_ref(), chain_id).await?))
}

/// GET /api/v1/roster-chains/:chain_id/diff?from=&to=
pub async fn handle_chain_diff(
    State(state): State<AppState>,
    Path(chain_id): Path<Uuid>,
    Query(q): Query<DiffQuery>,
) -> Result<Json<VersionDiffResponse>, AppError> {
    let diff = diff_chain_versions(state.rosters.as_ref(), chain_id, q.from, q.to).await?;
    Ok(Json(diff.into()))
}
