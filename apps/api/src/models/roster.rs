use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RosterRow {
    pub id: Uuid,
    pub venue_id: Uuid,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub status: String,
    pub chain_id: Uuid,
    pub version_number: i32,
    pub parent_id: Option<Uuid>,
    pub is_active: bool,
    pub source: String,
    pub source_image_url: Option<String>,
    pub extraction_confidence: Option<i32>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RosterShiftRow {
    pub id: Uuid,
    pub roster_id: Uuid,
    pub staff_id: Uuid,
    /// Resolved staff display name at the time the version was written.
    pub staff_name: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub role: Option<String>,
    pub notes: Option<String>,
    pub has_break: bool,
    /// Name exactly as read off the roster image, kept for audit.
    pub original_name: String,
    pub match_confidence: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UnmatchedEntryRow {
    pub id: Uuid,
    pub roster_id: Uuid,
    pub extracted_name: String,
    pub date: Option<NaiveDate>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub role: Option<String>,
    pub raw_cell: Option<String>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RosterHistoryRow {
    pub id: Uuid,
    pub roster_id: Uuid,
    pub action: String,
    pub source: String,
    pub shift_count: i32,
    pub unmatched_count: i32,
    pub actor: Option<Uuid>,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}
