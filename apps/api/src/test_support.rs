//! In-memory fakes for the pipeline's seams, shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::blob_store::{BlobError, BlobStore};
use crate::config::Config;
use crate::errors::AppError;
use crate::extraction::preprocess::{PreparedImage, PreprocessConfig};
use crate::extraction::service::{ExtractionContext, PipelineSettings};
use crate::extraction::session::InMemorySessionStore;
use crate::extraction::validation::{OvernightPolicy, ValidatorConfig};
use crate::extraction::retry::RetryPolicy;
use crate::llm_client::{LlmError, VisionModel, VisionRequest};
use crate::models::roster::{RosterHistoryRow, RosterRow, RosterShiftRow, UnmatchedEntryRow};
use crate::models::staff::StaffMember;
use crate::roster::store::{RosterStore, StaffDirectory};
use crate::roster::versioning::{
    plan_version, CreatedRoster, HistoryAction, NewRosterRequest, RosterStatus,
    SOURCE_IMAGE_UPLOAD,
};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Vision model
// ────────────────────────────────────────────────────────────────────────────

/// Replays canned answers in order and records every prompt it was sent.
pub struct ScriptedVision {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedVision {
    pub fn new(responses: Vec<Result<String, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn ok(responses: &[&str]) -> Self {
        Self::new(responses.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl VisionModel for ScriptedVision {
    async fn complete(&self, request: VisionRequest<'_>) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(request.prompt.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(LlmError::EmptyContent))
    }
}

/// Model answer for a week starting Monday 2024-03-04; each shift is
/// `(name, date, start, end)` with role "Bar".
pub fn roster_json(confidence: u8, shifts: &[(&str, &str, &str, &str)]) -> String {
    let shifts: Vec<_> = shifts
        .iter()
        .map(|(name, date, start, end)| {
            json!({
                "date": date,
                "day": null,
                "role": "Bar",
                "staff_name": name,
                "start_time": start,
                "end_time": end,
                "break": false,
                "raw_cell": format!("{start}-{end}"),
            })
        })
        .collect();
    json!({
        "week_start": "2024-03-04",
        "venue_name": "Harbour Bar",
        "confidence_score": confidence,
        "shifts": shifts,
        "uncertain_fields": [],
    })
    .to_string()
}

/// Stand-in for a preprocessed image; the scripted model never looks at it.
pub fn test_image() -> PreparedImage {
    PreparedImage {
        bytes: vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A],
        width: 1,
        height: 1,
        mime_type: "image/png".to_string(),
        degraded: Vec::new(),
    }
}

/// A decodable 24x12 PNG: white with a dark band through the middle.
pub fn tiny_png() -> Bytes {
    let img = image::RgbImage::from_fn(24, 12, |_, y| {
        if (4..8).contains(&y) {
            image::Rgb([20, 20, 20])
        } else {
            image::Rgb([255, 255, 255])
        }
    });
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    Bytes::from(out.into_inner())
}

// ────────────────────────────────────────────────────────────────────────────
// Blob store
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        bytes: Bytes,
        venue_id: Uuid,
        _content_type: &str,
    ) -> Result<String, BlobError> {
        let url = format!("mem://{venue_id}/{}", Uuid::new_v4());
        self.objects.lock().unwrap().insert(url.clone(), bytes);
        Ok(url)
    }

    async fn download(&self, url: &str) -> Result<Bytes, BlobError> {
        self.objects
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| BlobError::Download(format!("no object at {url}")))
    }

    async fn delete(&self, url: &str) -> Result<(), BlobError> {
        self.objects.lock().unwrap().remove(url);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Staff directory
// ────────────────────────────────────────────────────────────────────────────

/// Same staff list for every venue: Sam Lee, Ana Ruiz, Zoe Park.
pub struct FixedStaffDirectory {
    staff: Vec<StaffMember>,
}

impl Default for FixedStaffDirectory {
    fn default() -> Self {
        let member = |first: &str, last: &str| StaffMember {
            id: Uuid::new_v4(),
            first_name: first.to_string(),
            last_name: last.to_string(),
        };
        Self {
            staff: vec![
                member("Sam", "Lee"),
                member("Ana", "Ruiz"),
                member("Zoe", "Park"),
            ],
        }
    }
}

impl FixedStaffDirectory {
    pub fn member(&self, first_name: &str) -> &StaffMember {
        self.staff
            .iter()
            .find(|m| m.first_name == first_name)
            .unwrap()
    }
}

#[async_trait]
impl StaffDirectory for FixedStaffDirectory {
    async fn venue_staff(&self, _venue_id: Uuid) -> Result<Vec<StaffMember>, AppError> {
        Ok(self.staff.clone())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Roster store
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RosterTables {
    rosters: Vec<RosterRow>,
    shifts: Vec<RosterShiftRow>,
    unmatched: Vec<UnmatchedEntryRow>,
    history: Vec<RosterHistoryRow>,
}

/// Follows the same version planning as the Postgres store, without a database.
#[derive(Default)]
pub struct MemoryRosterStore {
    tables: Mutex<RosterTables>,
}

impl MemoryRosterStore {
    pub async fn roster(&self, id: Uuid) -> Option<RosterRow> {
        self.get_roster(id).await.unwrap()
    }

    pub async fn roster_count(&self) -> usize {
        self.tables.lock().unwrap().rosters.len()
    }

    pub async fn history_actions(&self, roster_id: Uuid) -> Vec<String> {
        self.history(roster_id)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.action)
            .collect()
    }
}

fn history_row(
    roster_id: Uuid,
    action: HistoryAction,
    shift_count: usize,
    unmatched_count: usize,
    actor: Option<Uuid>,
) -> RosterHistoryRow {
    RosterHistoryRow {
        id: Uuid::new_v4(),
        roster_id,
        action: action.as_str().to_string(),
        source: SOURCE_IMAGE_UPLOAD.to_string(),
        shift_count: shift_count as i32,
        unmatched_count: unmatched_count as i32,
        actor,
        details: json!({}),
        created_at: Utc::now(),
    }
}

#[async_trait]
impl RosterStore for MemoryRosterStore {
    async fn create_roster(&self, request: NewRosterRequest) -> Result<CreatedRoster, AppError> {
        let mut t = self.tables.lock().unwrap();
        let active = t
            .rosters
            .iter()
            .find(|r| r.venue_id == request.venue_id && r.week_start == request.week_start && r.is_active)
            .cloned();
        let chain_max = active.as_ref().and_then(|a| {
            t.rosters
                .iter()
                .filter(|r| r.chain_id == a.chain_id)
                .map(|r| r.version_number)
                .max()
        });
        let plan = plan_version(
            active.as_ref(),
            chain_max,
            request.create_as_new_version,
            request.version_number,
        )?;

        if let Some(previous) = plan.deactivate {
            for r in t.rosters.iter_mut().filter(|r| r.id == previous) {
                r.is_active = false;
            }
        }

        let roster = RosterRow {
            id: Uuid::new_v4(),
            venue_id: request.venue_id,
            week_start: request.week_start,
            week_end: request.week_start + Duration::days(6),
            status: RosterStatus::Draft.as_str().to_string(),
            chain_id: plan.chain_id,
            version_number: plan.version_number,
            parent_id: plan.parent_id,
            is_active: true,
            source: SOURCE_IMAGE_UPLOAD.to_string(),
            source_image_url: request.source_image_url.clone(),
            extraction_confidence: request.extraction_confidence.map(i32::from),
            created_by: request.created_by,
            created_at: Utc::now(),
        };
        t.rosters.push(roster.clone());

        for s in &request.shifts {
            t.shifts.push(RosterShiftRow {
                id: Uuid::new_v4(),
                roster_id: roster.id,
                staff_id: s.staff_id,
                staff_name: s.staff_name.clone(),
                date: s.date,
                start_time: s.start_time,
                end_time: s.end_time,
                role: s.role.clone(),
                notes: s.notes.clone(),
                has_break: s.has_break,
                original_name: s.original_name.clone(),
                match_confidence: i32::from(s.match_confidence),
                created_at: Utc::now(),
            });
        }
        for e in &request.unmatched {
            t.unmatched.push(UnmatchedEntryRow {
                id: Uuid::new_v4(),
                roster_id: roster.id,
                extracted_name: e.extracted_name.clone(),
                date: e.date,
                start_time: e.start_time.clone(),
                end_time: e.end_time.clone(),
                role: e.role.clone(),
                raw_cell: e.raw_cell.clone(),
                reason: e.reason.clone(),
                created_at: Utc::now(),
            });
        }
        t.history.push(history_row(
            roster.id,
            plan.action,
            request.shifts.len(),
            request.unmatched.len(),
            Some(request.created_by),
        ));

        Ok(CreatedRoster {
            roster,
            shift_count: request.shifts.len(),
            unmatched_count: request.unmatched.len(),
            deactivated_roster_id: plan.deactivate,
        })
    }

    async fn activate_version(
        &self,
        roster_id: Uuid,
        actor: Option<Uuid>,
    ) -> Result<RosterRow, AppError> {
        let mut t = self.tables.lock().unwrap();
        let target = t
            .rosters
            .iter()
            .find(|r| r.id == roster_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Roster {roster_id} not found")))?;
        if target.is_active {
            return Ok(target);
        }
        for r in t.rosters.iter_mut() {
            if r.venue_id == target.venue_id && r.week_start == target.week_start {
                r.is_active = r.id == roster_id;
            }
        }
        let shift_count = t.shifts.iter().filter(|s| s.roster_id == roster_id).count();
        let unmatched_count = t.unmatched.iter().filter(|u| u.roster_id == roster_id).count();
        t.history.push(history_row(
            roster_id,
            HistoryAction::Activated,
            shift_count,
            unmatched_count,
            actor,
        ));
        Ok(RosterRow {
            is_active: true,
            ..target
        })
    }

    async fn get_roster(&self, roster_id: Uuid) -> Result<Option<RosterRow>, AppError> {
        let t = self.tables.lock().unwrap();
        Ok(t.rosters.iter().find(|r| r.id == roster_id).cloned())
    }

    async fn roster_shifts(&self, roster_id: Uuid) -> Result<Vec<RosterShiftRow>, AppError> {
        let t = self.tables.lock().unwrap();
        Ok(t.shifts.iter().filter(|s| s.roster_id == roster_id).cloned().collect())
    }

    async fn unmatched_entries(
        &self,
        roster_id: Uuid,
    ) -> Result<Vec<UnmatchedEntryRow>, AppError> {
        let t = self.tables.lock().unwrap();
        Ok(t.unmatched.iter().filter(|u| u.roster_id == roster_id).cloned().collect())
    }

    async fn chain_versions(&self, chain_id: Uuid) -> Result<Vec<RosterRow>, AppError> {
        let t = self.tables.lock().unwrap();
        let mut versions: Vec<RosterRow> = t
            .rosters
            .iter()
            .filter(|r| r.chain_id == chain_id)
            .cloned()
            .collect();
        versions.sort_by_key(|r| r.version_number);
        Ok(versions)
    }

    async fn history(&self, roster_id: Uuid) -> Result<Vec<RosterHistoryRow>, AppError> {
        let t = self.tables.lock().unwrap();
        Ok(t.history.iter().filter(|h| h.roster_id == roster_id).cloned().collect())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wiring
// ────────────────────────────────────────────────────────────────────────────

pub fn test_settings() -> PipelineSettings {
    PipelineSettings {
        preprocess: PreprocessConfig {
            min_width: 32,
            max_width: 64,
            ..PreprocessConfig::default()
        },
        retry: RetryPolicy::default(),
        validator: ValidatorConfig::default(),
        max_upload_bytes: 1024 * 1024,
        session_ttl: Duration::hours(1),
    }
}

/// Every fake, owned in one place.
pub struct Harness {
    pub vision: ScriptedVision,
    pub blobs: MemoryBlobStore,
    pub sessions: InMemorySessionStore,
    pub staff: FixedStaffDirectory,
    pub rosters: MemoryRosterStore,
    pub settings: PipelineSettings,
}

impl Harness {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            vision: ScriptedVision::new(responses.into_iter().map(Ok).collect()),
            blobs: MemoryBlobStore::default(),
            sessions: InMemorySessionStore::new(),
            staff: FixedStaffDirectory::default(),
            rosters: MemoryRosterStore::default(),
            settings: test_settings(),
        }
    }

    pub fn ctx(&self) -> ExtractionContext<'_> {
        ExtractionContext {
            vision: &self.vision,
            blobs: &self.blobs,
            sessions: &self.sessions,
            staff: &self.staff,
            rosters: &self.rosters,
            settings: &self.settings,
        }
    }
}

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/rosters_test".to_string(),
        redis_url: None,
        s3_bucket: "rosters".to_string(),
        s3_endpoint: "http://localhost:9000".to_string(),
        aws_access_key_id: "test".to_string(),
        aws_secret_access_key: "test".to_string(),
        anthropic_api_key: "test".to_string(),
        vision_model: crate::llm_client::DEFAULT_MODEL.to_string(),
        llm_timeout_secs: 5,
        port: 0,
        rust_log: "debug".to_string(),
        max_extraction_retries: 2,
        session_ttl_secs: 3600,
        session_sweep_secs: 300,
        max_upload_bytes: 1024 * 1024,
        overnight_policy: OvernightPolicy::Reject,
        preprocess_min_width: 32,
        preprocess_max_width: 64,
        preprocess_contrast: 1.2,
    }
}

/// Application state backed entirely by fakes.
pub fn test_state(responses: Vec<String>) -> AppState {
    AppState {
        settings: test_settings(),
        vision: Arc::new(ScriptedVision::new(responses.into_iter().map(Ok).collect())),
        blobs: Arc::new(MemoryBlobStore::default()),
        sessions: Arc::new(InMemorySessionStore::new()),
        rosters: Arc::new(MemoryRosterStore::default()),
        staff: Arc::new(FixedStaffDirectory::default()),
    }
}
