pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::extraction::handlers as sessions;
use crate::roster::handlers as rosters;
use crate::state::AppState;

/// Multipart framing on top of the largest accepted image.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.settings.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .route("/health", get(health::health_handler))
        // Extraction sessions
        .route("/api/v1/roster-sessions", post(sessions::handle_upload))
        .route(
            "/api/v1/roster-sessions/:id",
            get(sessions::handle_get_session).delete(sessions::handle_cancel_session),
        )
        .route(
            "/api/v1/roster-sessions/:id/overrides",
            post(sessions::handle_overrides),
        )
        .route(
            "/api/v1/roster-sessions/:id/confirm",
            post(sessions::handle_confirm),
        )
        .route(
            "/api/v1/roster-sessions/:id/reextract",
            post(sessions::handle_reextract),
        )
        // Rosters and version chains
        .route("/api/v1/rosters/:id", get(rosters::handle_get_roster))
        .route(
            "/api/v1/rosters/:id/history",
            get(rosters::handle_roster_history),
        )
        .route(
            "/api/v1/rosters/:id/activate",
            post(rosters::handle_activate_version),
        )
        .route(
            "/api/v1/roster-chains/:chain_id/versions",
            get(rosters::handle_chain_versions),
        )
        .route(
            "/api/v1/roster-chains/:chain_id/diff",
            get(rosters::handle_chain_diff),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
