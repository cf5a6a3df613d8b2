use std::sync::Arc;

use crate::blob_store::BlobStore;
use crate::extraction::service::{ExtractionContext, PipelineSettings};
use crate::extraction::session::SessionStore;
use crate::llm_client::VisionModel;
use crate::roster::store::{RosterStore, StaffDirectory};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub settings: PipelineSettings,
    pub vision: Arc<dyn VisionModel>,
    pub blobs: Arc<dyn BlobStore>,
    /// In-memory or Redis, chosen at startup by `REDIS_URL`.
    pub sessions: Arc<dyn SessionStore>,
    pub rosters: Arc<dyn RosterStore>,
    pub staff: Arc<dyn StaffDirectory>,
}

impl AppState {
    pub fn extraction(&self) -> ExtractionContext<'_> {
        ExtractionContext {
            vision: self.vision.as_ref(),
            blobs: self.blobs.as_ref(),
            sessions: self.sessions.as_ref(),
            staff: self.staff.as_ref(),
            rosters: self.rosters.as_ref(),
            settings: &self.settings,
        }
    }
}
