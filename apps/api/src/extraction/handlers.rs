use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::extraction::service::{
    cancel_session, confirm_session, get_session, override_matches, reextract_session,
    start_extraction, ConfirmRequest, ConfirmResponse, SessionView,
};
use crate::matching::ManualOverride;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct VenueQuery {
    pub venue_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct VenueBody {
    pub venue_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct OverridesRequest {
    pub venue_id: Uuid,
    pub overrides: Vec<ManualOverride>,
}

/// POST /api/v1/roster-sessions (multipart: venue_id, file)
pub async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SessionView>), AppError> {
    let mut venue_id: Option<Uuid> = None;
    let mut file: Option<Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "venue_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Unreadable venue_id: {e}")))?;
                let id = text
                    .trim()
                    .parse()
                    .map_err(|_| AppError::Validation(format!("Invalid venue_id: {text}")))?;
                venue_id = Some(id);
            }
            "file" => {
                file = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| AppError::Validation(format!("Unreadable file: {e}")))?,
                );
            }
            _ => {}
        }
    }

    let venue_id = venue_id.ok_or_else(|| AppError::Validation("venue_id is required".into()))?;
    let file = file.ok_or_else(|| AppError::Validation("file is required".into()))?;

    let view = start_extraction(state.extraction(), venue_id, file).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/v1/roster-sessions/:id?venue_id=
pub async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<VenueQuery>,
) -> Result<Json<SessionView>, AppError> {
    let view = get_session(state.extraction(), id, q.venue_id).await?;
    Ok(Json(view))
}

/// DELETE /api/v1/roster-sessions/:id?venue_id=
pub async fn handle_cancel_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<VenueQuery>,
) -> Result<StatusCode, AppError> {
    cancel_session(state.extraction(), id, q.venue_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/roster-sessions/:id/overrides
pub async fn handle_overrides(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<OverridesRequest>,
) -> Result<Json<SessionView>, AppError> {
    let view = override_matches(state.extraction(), id, req.venue_id, req.overrides).await?;
    Ok(Json(view))
}

/// POST /api/v1/roster-sessions/:id/confirm
pub async fn handle_confirm(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ConfirmRequest>,
) -> Result<(StatusCode, Json<ConfirmResponse>), AppError> {
    let response = confirm_session(state.extraction(), id, req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/v1/roster-sessions/:id/reextract
pub async fn handle_reextract(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<VenueBody>,
) -> Result<Json<SessionView>, AppError> {
    let view = reextract_session(state.extraction(), id, req.venue_id).await?;
    Ok(Json(view))
}
