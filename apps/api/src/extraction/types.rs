//! Extraction data shapes: what the model returns, what the validator emits.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ────────────────────────────────────────────────────────────────────────────
// Raw model output (lenient: models emit numbers and nulls where strings belong)
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawExtraction {
    #[serde(default, deserialize_with = "lenient_string")]
    pub week_start: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub venue_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub shifts: Vec<RawShift>,
    #[serde(default)]
    pub uncertain_fields: Vec<UncertainField>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawShift {
    #[serde(default, deserialize_with = "lenient_string")]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub day: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub staff_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub start_time: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub end_time: Option<String>,
    #[serde(default, rename = "break", deserialize_with = "lenient_bool")]
    pub has_break: Option<bool>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub raw_cell: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UncertainField {
    #[serde(default, deserialize_with = "lenient_string")]
    pub field: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub value: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub reason: Option<String>,
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// Accepts `true`/`false`, `1`/`0` and the strings "true", "yes", "y", "1"
/// (and their negatives). Anything else reads as unknown.
fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(v) if v == 1.0 => Some(true),
            Some(v) if v == 0.0 => Some(false),
            _ => None,
        },
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn lenient_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Normalized output
// ────────────────────────────────────────────────────────────────────────────

/// One shift after normalization. Times are `HH:MM` 24h; `None` means unreadable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedShift {
    pub date: Option<NaiveDate>,
    pub day: Option<String>,
    pub role: Option<String>,
    pub staff_name: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub has_break: bool,
    pub raw_cell: Option<String>,
    pub uncertainty_notes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractionData {
    pub week_start: Option<NaiveDate>,
    pub venue_name: Option<String>,
    pub model_confidence: Option<u8>,
    pub shifts: Vec<ExtractedShift>,
    pub uncertain_fields: Vec<UncertainField>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationIssue {
    pub field: String,
    /// Index into the model's own `shifts` array, before leave markers are
    /// dropped or multi-range cells split. `None` for extraction-level issues
    /// (e.g. an unreadable week start).
    pub shift_index: Option<usize>,
    pub message: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLabel {
    Reject,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityLabel {
    /// excellent ≥90, good ≥80, fair ≥70, poor ≥60, else reject.
    pub fn from_score(score: u8) -> Self {
        match score {
            90..=u8::MAX => QualityLabel::Excellent,
            80..=89 => QualityLabel::Good,
            70..=79 => QualityLabel::Fair,
            60..=69 => QualityLabel::Poor,
            _ => QualityLabel::Reject,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityLabel::Excellent => "excellent",
            QualityLabel::Good => "good",
            QualityLabel::Fair => "fair",
            QualityLabel::Poor => "poor",
            QualityLabel::Reject => "reject",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub confidence: u8,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub quality: QualityLabel,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}
