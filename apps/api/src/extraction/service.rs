//! Extraction Service: orchestrates one roster upload end to end.
//!
//! Flow: upload → session (Processing) → preprocess → retry controller →
//!       staff match → session (Ready) → overrides → confirm | cancel.
//!
//! The session exists before the first model call and is deleted on confirm
//! (after the roster transaction commits) or on cancel (after the blob is gone).

use bytes::Bytes;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::blob_store::BlobStore;
use crate::config::Config;
use crate::errors::AppError;
use crate::extraction::preprocess::{
    detect_mime, preprocess_image, PreparedImage, PreprocessConfig, PreprocessNote,
};
use crate::extraction::retry::{
    run_extraction, ExtractionOutcome, PromptVariant, RetryPolicy, RetryState,
};
use crate::extraction::session::{ExtractionSession, SessionStatus, SessionStore};
use crate::extraction::types::{QualityLabel, ValidationIssue};
use crate::extraction::validation::{week_monday, ValidatorConfig};
use crate::llm_client::VisionModel;
use crate::matching::{apply_overrides, ManualOverride, MatchReport, StaffMatcher};
use crate::models::roster::RosterRow;
use crate::roster::store::{RosterStore, StaffDirectory};
use crate::roster::versioning::{build_shift_records, NewRosterRequest};

// ────────────────────────────────────────────────────────────────────────────
// Settings and dependencies
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub preprocess: PreprocessConfig,
    pub retry: RetryPolicy,
    pub validator: ValidatorConfig,
    pub max_upload_bytes: usize,
    pub session_ttl: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            preprocess: PreprocessConfig {
                min_width: config.preprocess_min_width,
                max_width: config.preprocess_max_width,
                contrast: config.preprocess_contrast,
                ..PreprocessConfig::default()
            },
            retry: RetryPolicy {
                max_retries: config.max_extraction_retries,
                ..RetryPolicy::default()
            },
            validator: ValidatorConfig {
                overnight_policy: config.overnight_policy,
                ..ValidatorConfig::default()
            },
            max_upload_bytes: config.max_upload_bytes,
            session_ttl: Duration::seconds(config.session_ttl_secs as i64),
        }
    }
}

/// Borrowed view of everything the pipeline talks to.
#[derive(Clone, Copy)]
pub struct ExtractionContext<'a> {
    pub vision: &'a dyn VisionModel,
    pub blobs: &'a dyn BlobStore,
    pub sessions: &'a dyn SessionStore,
    pub staff: &'a dyn StaffDirectory,
    pub rosters: &'a dyn RosterStore,
    pub settings: &'a PipelineSettings,
}

// ────────────────────────────────────────────────────────────────────────────
// Request / response shapes
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct AttemptSummary {
    pub index: u32,
    pub prompt_variant: PromptVariant,
    pub confidence: Option<u8>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionSummary {
    pub state: RetryState,
    pub confidence: u8,
    pub quality: QualityLabel,
    /// No validation errors on the returned attempt; warnings may remain.
    pub valid: bool,
    pub needs_review: bool,
    pub selected_attempt: u32,
    pub attempts: Vec<AttemptSummary>,
    pub week_start: Option<NaiveDate>,
    pub venue_name: Option<String>,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl From<&ExtractionOutcome> for ExtractionSummary {
    fn from(outcome: &ExtractionOutcome) -> Self {
        Self {
            state: outcome.state,
            confidence: outcome.validation.confidence,
            quality: outcome.validation.quality,
            valid: outcome.validation.is_valid(),
            needs_review: outcome.needs_review,
            selected_attempt: outcome.selected_attempt,
            attempts: outcome
                .attempts
                .iter()
                .map(|a| AttemptSummary {
                    index: a.index,
                    prompt_variant: a.prompt_variant,
                    confidence: a.validation.as_ref().map(|v| v.confidence),
                    error: a.error.clone(),
                })
                .collect(),
            week_start: outcome.data.week_start,
            venue_name: outcome.data.venue_name.clone(),
            errors: outcome.validation.errors.clone(),
            warnings: outcome.validation.warnings.clone(),
        }
    }
}

/// Session preview returned to the caller for review.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub venue_id: Uuid,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub degraded: Vec<PreprocessNote>,
    pub extraction: Option<ExtractionSummary>,
    pub matches: Option<MatchReport>,
    pub overrides: Vec<ManualOverride>,
}

impl From<&ExtractionSession> for SessionView {
    fn from(session: &ExtractionSession) -> Self {
        Self {
            session_id: session.id,
            venue_id: session.venue_id,
            status: session.status,
            created_at: session.created_at,
            last_error: session.last_error.clone(),
            degraded: session.degraded.clone(),
            extraction: session.outcome.as_ref().map(ExtractionSummary::from),
            matches: session.matches.clone(),
            overrides: session.overrides.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmRequest {
    pub venue_id: Uuid,
    pub created_by: Uuid,
    #[serde(default)]
    pub create_as_new_version: bool,
    pub version_number: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmResponse {
    pub roster: RosterRow,
    pub shift_count: usize,
    pub unmatched_count: usize,
    pub deactivated_roster_id: Option<Uuid>,
    pub confidence: u8,
    pub needs_review: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Operations
// ────────────────────────────────────────────────────────────────────────────

async fn load_session(
    ctx: ExtractionContext<'_>,
    session_id: Uuid,
) -> Result<ExtractionSession, AppError> {
    ctx.sessions
        .get(session_id)
        .await?
        .ok_or(AppError::SessionNotFound(session_id))
}

async fn load_owned_session(
    ctx: ExtractionContext<'_>,
    session_id: Uuid,
    venue_id: Uuid,
) -> Result<ExtractionSession, AppError> {
    let session = load_session(ctx, session_id).await?;
    if session.venue_id != venue_id {
        warn!(%session_id, %venue_id, "Venue does not own extraction session");
        return Err(AppError::VenueAccessDenied(venue_id));
    }
    Ok(session)
}

/// Loads a session on behalf of `venue_id`.
pub async fn get_session(
    ctx: ExtractionContext<'_>,
    session_id: Uuid,
    venue_id: Uuid,
) -> Result<SessionView, AppError> {
    let session = load_owned_session(ctx, session_id, venue_id).await?;
    Ok(SessionView::from(&session))
}

/// Accepts an uploaded roster image and runs the full extraction pipeline.
pub async fn start_extraction(
    ctx: ExtractionContext<'_>,
    venue_id: Uuid,
    bytes: Bytes,
) -> Result<SessionView, AppError> {
    if bytes.is_empty() {
        return Err(AppError::Validation("Uploaded file is empty".to_string()));
    }
    if bytes.len() > ctx.settings.max_upload_bytes {
        return Err(AppError::Validation(format!(
            "Uploaded file is {} bytes; the limit is {} bytes",
            bytes.len(),
            ctx.settings.max_upload_bytes
        )));
    }
    let mime_type = detect_mime(&bytes).ok_or_else(|| {
        AppError::Validation("Unsupported image format; use PNG, JPEG, WebP or GIF".to_string())
    })?;

    let blob_url = ctx.blobs.upload(bytes.clone(), venue_id, mime_type).await?;
    let mut session = ExtractionSession::new(venue_id, blob_url, mime_type.to_string());
    ctx.sessions.create(&session).await?;
    info!(session_id = %session.id, %venue_id, size = bytes.len(), mime_type, "Extraction session created");

    process_session(ctx, &mut session, bytes).await?;
    Ok(SessionView::from(&session))
}

/// Runs the pipeline for `session` and stores the result, Ready or Failed.
async fn process_session(
    ctx: ExtractionContext<'_>,
    session: &mut ExtractionSession,
    bytes: Bytes,
) -> Result<(), AppError> {
    match run_pipeline(ctx, session, bytes).await {
        Ok(()) => {
            session.status = SessionStatus::Ready;
            session.last_error = None;
            ctx.sessions.update(session).await?;
            Ok(())
        }
        Err(e) => {
            warn!(session_id = %session.id, error = %e, "Extraction failed");
            session.status = SessionStatus::Failed;
            session.last_error = Some(e.to_string());
            ctx.sessions.update(session).await?;
            Err(match e {
                AppError::Llm(msg) => AppError::Llm(format!("session {}: {msg}", session.id)),
                other => other,
            })
        }
    }
}

async fn run_pipeline(
    ctx: ExtractionContext<'_>,
    session: &mut ExtractionSession,
    bytes: Bytes,
) -> Result<(), AppError> {
    let config = ctx.settings.preprocess.clone();
    let input = bytes.clone();
    let prepared = match tokio::task::spawn_blocking(move || preprocess_image(&input, &config)).await
    {
        Ok(prepared) => prepared,
        Err(e) => {
            warn!(session_id = %session.id, "Preprocessing task failed: {e}");
            PreparedImage::passthrough(&bytes, format!("preprocessing task failed: {e}"))
        }
    };
    info!(
        session_id = %session.id,
        width = prepared.width,
        height = prepared.height,
        degraded = prepared.degraded.len(),
        "Roster image prepared"
    );

    let outcome = run_extraction(
        ctx.vision,
        &prepared,
        &ctx.settings.retry,
        &ctx.settings.validator,
    )
    .await?;

    let staff = ctx.staff.venue_staff(session.venue_id).await?;
    let report = StaffMatcher::new(&staff).match_shifts(outcome.data.shifts.clone());
    info!(
        session_id = %session.id,
        confidence = outcome.validation.confidence,
        state = ?outcome.state,
        attempts = outcome.attempts.len(),
        matched = report.matched_count,
        unmatched = report.unmatched_count,
        "Roster extraction complete"
    );

    session.degraded = prepared.degraded;
    session.outcome = Some(outcome);
    session.matches = Some(report);
    session.overrides.clear();
    Ok(())
}

/// Re-runs the pipeline on the stored upload. Previous overrides are discarded.
pub async fn reextract_session(
    ctx: ExtractionContext<'_>,
    session_id: Uuid,
    venue_id: Uuid,
) -> Result<SessionView, AppError> {
    let mut session = load_owned_session(ctx, session_id, venue_id).await?;
    match session.status {
        SessionStatus::Ready | SessionStatus::Failed => {}
        SessionStatus::Processing => {
            return Err(AppError::Validation(
                "Extraction is still running for this session".to_string(),
            ))
        }
        SessionStatus::Confirming => return Err(confirm_in_progress()),
    }
    let bytes = ctx.blobs.download(&session.blob_url).await?;

    session.status = SessionStatus::Processing;
    session.last_error = None;
    ctx.sessions.update(&session).await?;
    info!(%session_id, "Re-extracting roster image");

    process_session(ctx, &mut session, bytes).await?;
    Ok(SessionView::from(&session))
}

/// Applies manual name → staff decisions to a ready session.
pub async fn override_matches(
    ctx: ExtractionContext<'_>,
    session_id: Uuid,
    venue_id: Uuid,
    overrides: Vec<ManualOverride>,
) -> Result<SessionView, AppError> {
    if overrides.is_empty() {
        return Err(AppError::Validation("No overrides supplied".to_string()));
    }
    let mut session = load_owned_session(ctx, session_id, venue_id).await?;
    if session.status == SessionStatus::Confirming {
        return Err(confirm_in_progress());
    }
    let Some(report) = session.matches.as_mut() else {
        return Err(AppError::Validation(
            "Session has no extraction results to override".to_string(),
        ));
    };

    let staff = ctx.staff.venue_staff(venue_id).await?;
    let changed = apply_overrides(report, &overrides, &staff)?;
    session.overrides.extend(overrides);
    ctx.sessions.update(&session).await?;

    info!(%session_id, changed, "Manual staff overrides applied");
    Ok(SessionView::from(&session))
}

fn confirm_in_progress() -> AppError {
    AppError::Validation("This session is already being confirmed".to_string())
}

/// Persists the session's matched shifts as a roster version, then deletes the session.
///
/// The session is claimed by moving it from Ready to Confirming first, so two
/// concurrent confirms cannot both write a roster. A failed write hands the
/// session back as Ready.
pub async fn confirm_session(
    ctx: ExtractionContext<'_>,
    session_id: Uuid,
    request: ConfirmRequest,
) -> Result<ConfirmResponse, AppError> {
    let session = load_owned_session(ctx, session_id, request.venue_id).await?;
    match session.status {
        SessionStatus::Ready => {}
        SessionStatus::Processing => {
            return Err(AppError::Validation(
                "Extraction is still running for this session".to_string(),
            ))
        }
        SessionStatus::Failed => {
            return Err(AppError::Validation(
                "Extraction failed for this session; re-extract or cancel it".to_string(),
            ))
        }
        SessionStatus::Confirming => return Err(confirm_in_progress()),
    }

    let claimed = ctx
        .sessions
        .transition(session_id, SessionStatus::Ready, SessionStatus::Confirming)
        .await?
        .ok_or_else(confirm_in_progress)?;

    let response = match persist_roster(ctx, &claimed, request).await {
        Ok(response) => response,
        Err(e) => {
            let released = ctx
                .sessions
                .transition(session_id, SessionStatus::Confirming, SessionStatus::Ready)
                .await;
            if !matches!(released, Ok(Some(_))) {
                warn!(%session_id, "Could not release session after failed confirm");
            }
            return Err(e);
        }
    };

    // The roster is committed; a failed session delete must not report failure.
    if let Err(e) = ctx.sessions.delete(session_id).await {
        warn!(%session_id, "Roster saved but session could not be deleted: {e}");
    }

    info!(
        %session_id,
        roster_id = %response.roster.id,
        version = response.roster.version_number,
        "Extraction session confirmed"
    );
    Ok(response)
}

async fn persist_roster(
    ctx: ExtractionContext<'_>,
    session: &ExtractionSession,
    request: ConfirmRequest,
) -> Result<ConfirmResponse, AppError> {
    let (Some(outcome), Some(report)) = (&session.outcome, &session.matches) else {
        return Err(AppError::Validation(
            "Session has no extraction results".to_string(),
        ));
    };

    let week_start = outcome
        .data
        .week_start
        .or_else(|| report.shifts.iter().filter_map(|s| s.shift.date).min().map(week_monday))
        .ok_or_else(|| {
            AppError::Validation("The roster week could not be determined".to_string())
        })?;

    let (shifts, unmatched) = build_shift_records(report);
    let created = ctx
        .rosters
        .create_roster(NewRosterRequest {
            venue_id: session.venue_id,
            week_start,
            created_by: request.created_by,
            create_as_new_version: request.create_as_new_version,
            version_number: request.version_number,
            source_image_url: Some(session.blob_url.clone()),
            extraction_confidence: Some(outcome.validation.confidence),
            shifts,
            unmatched,
        })
        .await?;

    Ok(ConfirmResponse {
        roster: created.roster,
        shift_count: created.shift_count,
        unmatched_count: created.unmatched_count,
        deactivated_roster_id: created.deactivated_roster_id,
        confidence: outcome.validation.confidence,
        needs_review: outcome.needs_review,
    })
}

/// Releases the uploaded image, then discards the session.
pub async fn cancel_session(
    ctx: ExtractionContext<'_>,
    session_id: Uuid,
    venue_id: Uuid,
) -> Result<(), AppError> {
    let session = load_owned_session(ctx, session_id, venue_id).await?;
    ctx.blobs.delete(&session.blob_url).await?;
    ctx.sessions.delete(session_id).await?;
    info!(%session_id, "Extraction session cancelled");
    Ok(())
}

/// Deletes sessions older than `ttl` along with their uploads. Returns how many were removed.
pub async fn sweep_expired_sessions(
    sessions: &dyn SessionStore,
    blobs: &dyn BlobStore,
    ttl: Duration,
) -> Result<usize, AppError> {
    let expired = sessions.list_expired(ttl).await?;
    let mut removed = 0;
    for session in expired {
        if let Err(e) = blobs.delete(&session.blob_url).await {
            warn!(session_id = %session.id, "Could not delete upload for expired session: {e}");
        }
        if sessions.delete(session.id).await? {
            removed += 1;
        }
    }
    if removed > 0 {
        info!(removed, "Expired extraction sessions swept");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::MatchType;
    use crate::extraction::validation::OvernightPolicy;
    use crate::test_support::{roster_json, test_config, tiny_png, Harness};

    const WEEK: &[(&str, &str, &str, &str)] = &[
        ("Sam Lee", "2024-03-05", "09:00", "17:00"),
        ("Ana Ruiz", "2024-03-05", "12:00", "20:00"),
        ("Mystery Person", "2024-03-06", "09:00", "17:00"),
    ];

    #[test]
    fn test_settings_follow_config() {
        let mut config = test_config();
        config.max_extraction_retries = 4;
        config.overnight_policy = OvernightPolicy::WrapNextDay;
        config.session_ttl_secs = 90;
        let settings = PipelineSettings::from_config(&config);
        assert_eq!(settings.retry.max_retries, 4);
        assert_eq!(settings.retry.accept_threshold, 70);
        assert_eq!(settings.validator.overnight_policy, OvernightPolicy::WrapNextDay);
        assert_eq!(settings.preprocess.max_width, 64);
        assert_eq!(settings.session_ttl, Duration::seconds(90));
    }

    async fn ready_session(h: &Harness, venue_id: Uuid) -> SessionView {
        start_extraction(h.ctx(), venue_id, tiny_png()).await.unwrap()
    }

    #[tokio::test]
    async fn test_start_extraction_produces_ready_session() {
        let h = Harness::new(vec![roster_json(92, WEEK)]);
        let venue = Uuid::new_v4();
        let view = ready_session(&h, venue).await;

        assert_eq!(view.status, SessionStatus::Ready);
        let extraction = view.extraction.unwrap();
        assert_eq!(extraction.state, RetryState::Accepted);
        assert_eq!(extraction.confidence, 92);
        assert!(extraction.valid);
        let matches = view.matches.unwrap();
        assert_eq!(matches.matched_count, 2);
        assert_eq!(matches.unmatched_names, vec!["Mystery Person"]);
        assert_eq!(h.blobs.len(), 1);
        assert!(h.sessions.get(view.session_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unsupported_upload_is_rejected_before_storage() {
        let h = Harness::new(vec![]);
        let err = start_extraction(h.ctx(), Uuid::new_v4(), Bytes::from_static(b"%PDF-1.7"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(h.blobs.len(), 0);
    }

    #[tokio::test]
    async fn test_model_failure_marks_session_failed() {
        let h = Harness::new(vec!["no".into(), "still no".into(), "never".into()]);
        let err = start_extraction(h.ctx(), Uuid::new_v4(), tiny_png())
            .await
            .unwrap_err();
        let AppError::Llm(msg) = err else {
            panic!("expected model call failure, got {err:?}");
        };
        assert!(msg.starts_with("session "));

        let failed = h.sessions.all().await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status, SessionStatus::Failed);
        assert!(failed[0].last_error.is_some());
    }

    #[tokio::test]
    async fn test_confirm_creates_roster_and_deletes_session() {
        let h = Harness::new(vec![roster_json(92, WEEK)]);
        let venue = Uuid::new_v4();
        let view = ready_session(&h, venue).await;

        let confirmed = confirm_session(
            h.ctx(),
            view.session_id,
            ConfirmRequest {
                venue_id: venue,
                created_by: Uuid::new_v4(),
                create_as_new_version: false,
                version_number: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(confirmed.roster.version_number, 1);
        assert!(confirmed.roster.is_active);
        assert_eq!(confirmed.roster.week_start, NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert_eq!(confirmed.shift_count, 2);
        assert_eq!(confirmed.unmatched_count, 1);
        assert!(h.sessions.get(view.session_id).await.unwrap().is_none());
        assert_eq!(h.rosters.history_actions(confirmed.roster.id).await, vec!["created"]);
    }

    #[tokio::test]
    async fn test_second_confirm_without_flag_conflicts_and_keeps_active() {
        let h = Harness::new(vec![roster_json(92, WEEK), roster_json(90, WEEK), roster_json(88, WEEK)]);
        let venue = Uuid::new_v4();
        let request = |new_version| ConfirmRequest {
            venue_id: venue,
            created_by: Uuid::new_v4(),
            create_as_new_version: new_version,
            version_number: None,
        };

        let first = ready_session(&h, venue).await;
        let v1 = confirm_session(h.ctx(), first.session_id, request(false))
            .await
            .unwrap();

        let second = ready_session(&h, venue).await;
        let err = confirm_session(h.ctx(), second.session_id, request(false))
            .await
            .unwrap_err();
        match err {
            AppError::RosterConflict {
                roster_id,
                version_number,
            } => {
                assert_eq!(roster_id, v1.roster.id);
                assert_eq!(version_number, 1);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        let still_active = h.rosters.roster(v1.roster.id).await.unwrap();
        assert!(still_active.is_active);
        // Session survives a failed confirm so the caller can retry with the flag.
        let released = h.sessions.get(second.session_id).await.unwrap().unwrap();
        assert_eq!(released.status, SessionStatus::Ready);

        let v2 = confirm_session(h.ctx(), second.session_id, request(true))
            .await
            .unwrap();
        assert_eq!(v2.roster.version_number, 2);
        assert_eq!(v2.roster.chain_id, v1.roster.chain_id);
        assert_eq!(v2.roster.parent_id, Some(v1.roster.id));
        assert_eq!(v2.deactivated_roster_id, Some(v1.roster.id));
        assert!(!h.rosters.roster(v1.roster.id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn test_confirm_rejected_while_another_confirm_holds_the_session() {
        let h = Harness::new(vec![roster_json(92, WEEK)]);
        let venue = Uuid::new_v4();
        let view = ready_session(&h, venue).await;
        let claim = h
            .sessions
            .transition(view.session_id, SessionStatus::Ready, SessionStatus::Confirming)
            .await
            .unwrap();
        assert!(claim.is_some());

        let request = ConfirmRequest {
            venue_id: venue,
            created_by: Uuid::new_v4(),
            create_as_new_version: false,
            version_number: None,
        };
        let err = confirm_session(h.ctx(), view.session_id, request)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = reextract_session(h.ctx(), view.session_id, venue)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(h.rosters.roster_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_confirms_write_one_roster() {
        let h = Harness::new(vec![roster_json(92, WEEK)]);
        let venue = Uuid::new_v4();
        let view = ready_session(&h, venue).await;
        let request = || ConfirmRequest {
            venue_id: venue,
            created_by: Uuid::new_v4(),
            create_as_new_version: true,
            version_number: None,
        };

        let (a, b) = tokio::join!(
            confirm_session(h.ctx(), view.session_id, request()),
            confirm_session(h.ctx(), view.session_id, request()),
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert_eq!(h.rosters.roster_count().await, 1);
        assert!(h.sessions.get(view.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_update_after_cancel_is_session_not_found() {
        let h = Harness::new(vec![roster_json(92, WEEK)]);
        let venue = Uuid::new_v4();
        let view = ready_session(&h, venue).await;
        let stale = h.sessions.get(view.session_id).await.unwrap().unwrap();

        cancel_session(h.ctx(), view.session_id, venue).await.unwrap();
        let err = h.sessions.update(&stale).await.unwrap_err();
        let err = AppError::from(err);
        assert!(matches!(err, AppError::SessionNotFound(id) if id == view.session_id));
        assert!(h.sessions.get(view.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_session_checks_venue() {
        let h = Harness::new(vec![roster_json(92, WEEK)]);
        let venue = Uuid::new_v4();
        let view = ready_session(&h, venue).await;

        let loaded = get_session(h.ctx(), view.session_id, venue).await.unwrap();
        assert_eq!(loaded.session_id, view.session_id);
        let err = get_session(h.ctx(), view.session_id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::VenueAccessDenied(_)));
    }

    #[tokio::test]
    async fn test_other_venue_is_denied() {
        let h = Harness::new(vec![roster_json(92, WEEK)]);
        let view = ready_session(&h, Uuid::new_v4()).await;
        let err = cancel_session(h.ctx(), view.session_id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::VenueAccessDenied(_)));
    }

    #[tokio::test]
    async fn test_cancel_releases_blob_then_session() {
        let h = Harness::new(vec![roster_json(92, WEEK)]);
        let venue = Uuid::new_v4();
        let view = ready_session(&h, venue).await;

        cancel_session(h.ctx(), view.session_id, venue).await.unwrap();
        assert_eq!(h.blobs.len(), 0);
        let err = load_session(h.ctx(), view.session_id).await.unwrap_err();
        assert!(matches!(err, AppError::SessionNotFound(id) if id == view.session_id));
    }

    #[tokio::test]
    async fn test_overrides_resolve_unmatched_name() {
        let h = Harness::new(vec![roster_json(92, WEEK)]);
        let venue = Uuid::new_v4();
        let view = ready_session(&h, venue).await;
        let zoe = h.staff.member("Zoe").id;

        let updated = override_matches(
            h.ctx(),
            view.session_id,
            venue,
            vec![ManualOverride {
                extracted_name: "mystery person".to_string(),
                user_id: zoe,
            }],
        )
        .await
        .unwrap();

        let matches = updated.matches.unwrap();
        assert_eq!(matches.unmatched_count, 0);
        assert_eq!(matches.matched_count, 3);
        assert_eq!(matches.shifts[2].staff_match.match_type, MatchType::Manual);
        let stored = h.sessions.get(view.session_id).await.unwrap().unwrap();
        assert_eq!(stored.overrides.len(), 1);
    }

    #[tokio::test]
    async fn test_reextract_reruns_pipeline_on_stored_upload() {
        let h = Harness::new(vec![roster_json(60, WEEK), roster_json(61, WEEK), roster_json(62, WEEK), roster_json(95, WEEK)]);
        let venue = Uuid::new_v4();
        let first = ready_session(&h, venue).await;
        assert!(first.extraction.unwrap().needs_review);

        let again = reextract_session(h.ctx(), first.session_id, venue)
            .await
            .unwrap();
        let extraction = again.extraction.unwrap();
        assert_eq!(extraction.state, RetryState::Accepted);
        assert_eq!(extraction.confidence, 95);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_sessions_and_uploads() {
        let h = Harness::new(vec![roster_json(92, WEEK)]);
        let view = ready_session(&h, Uuid::new_v4()).await;

        let mut stale = h.sessions.get(view.session_id).await.unwrap().unwrap();
        stale.created_at = Utc::now() - Duration::hours(3);
        h.sessions.update(&stale).await.unwrap();

        let removed = sweep_expired_sessions(&h.sessions, &h.blobs, Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(h.blobs.len(), 0);
        assert!(h.sessions.get(view.session_id).await.unwrap().is_none());
    }
}
