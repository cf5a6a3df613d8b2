//! Extraction Validator: normalizes raw model output and scores it.
//!
//! Normalization never guesses silently: anything it cannot coerce is left
//! `None` and reported as an error. Confidence starts from the model's own
//! score and loses a fixed penalty per error and per warning.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate};

use crate::extraction::types::{
    ExtractedShift, ExtractionData, QualityLabel, RawExtraction, RawShift, ValidationIssue,
    ValidationResult,
};

/// How a shift whose end time is not after its start time is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OvernightPolicy {
    /// `end <= start` is always a validation error.
    #[default]
    Reject,
    /// `end < start` ends the next day; `end == start` is still an error.
    WrapNextDay,
}

impl FromStr for OvernightPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" | "error" => Ok(OvernightPolicy::Reject),
            "wrap" | "wrap_next_day" | "next_day" => Ok(OvernightPolicy::WrapNextDay),
            other => Err(format!("unknown overnight policy '{other}' (expected reject|wrap)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub overnight_policy: OvernightPolicy,
    pub error_penalty: u8,
    pub warning_penalty: u8,
    /// Used when the model does not report a confidence score.
    pub default_model_confidence: u8,
    pub max_shift_hours: u32,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            overnight_policy: OvernightPolicy::Reject,
            error_penalty: 10,
            warning_penalty: 3,
            default_model_confidence: 50,
            max_shift_hours: 16,
        }
    }
}

const LEAVE_MARKERS: &[&str] = &["OFF", "AL", "A/L", "LEAVE", "ANNUAL LEAVE", "ON LEAVE"];
const BREAK_MARKER: &str = "(B)";

// ────────────────────────────────────────────────────────────────────────────
// Field normalization
// ────────────────────────────────────────────────────────────────────────────

/// Coerces a time to `HH:MM` 24h.
///
/// Accepts `17:00`, `5pm`, `5:30 p.m.`, `0930`, `9`, and dotted forms. A single
/// fractional digit is decimal hours (`9.5` → `09:30`); two digits are minutes
/// when below 60 (`9.30` → `09:30`) and decimal hours otherwise (`9.75` → `09:45`).
pub fn normalize_time(raw: &str) -> Option<String> {
    let compact: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    match compact.as_str() {
        "noon" | "midday" => return Some("12:00".to_string()),
        "midnight" => return Some("00:00".to_string()),
        _ => {}
    }

    let (core, meridiem) = split_meridiem(&compact);
    if core.is_empty() || !core.is_ascii() {
        return None;
    }

    let (mut hour, minute) = if let Some((h, m)) = core.split_once(':') {
        let m = m.split(':').next().unwrap_or_default();
        if m.len() != 2 {
            return None;
        }
        (parse_digits(h)?, parse_digits(m)?)
    } else if let Some((h, frac)) = core.split_once('.') {
        let hour = if h.is_empty() { 0 } else { parse_digits(h)? };
        let frac_value = parse_digits(frac)?;
        let minute = match frac.len() {
            1 => frac_value * 6,
            2 if frac_value < 60 => frac_value,
            2 => (frac_value * 60 + 50) / 100,
            _ => return None,
        };
        (hour, minute)
    } else {
        match core.len() {
            1 | 2 => (parse_digits(core)?, 0),
            3 => (parse_digits(&core[..1])?, parse_digits(&core[1..])?),
            4 => (parse_digits(&core[..2])?, parse_digits(&core[2..])?),
            _ => return None,
        }
    };

    match meridiem {
        Some(Meridiem::Pm) if hour > 12 => return None,
        Some(Meridiem::Pm) if hour < 12 => hour += 12,
        Some(Meridiem::Am) if hour > 12 => return None,
        Some(Meridiem::Am) if hour == 12 => hour = 0,
        _ => {}
    }

    if hour > 23 || minute > 59 {
        return None;
    }
    Some(format!("{hour:02}:{minute:02}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Meridiem {
    Am,
    Pm,
}

fn split_meridiem(s: &str) -> (&str, Option<Meridiem>) {
    for (suffix, meridiem) in [
        ("a.m.", Meridiem::Am),
        ("p.m.", Meridiem::Pm),
        ("am", Meridiem::Am),
        ("pm", Meridiem::Pm),
        ("a", Meridiem::Am),
        ("p", Meridiem::Pm),
    ] {
        if let Some(core) = s.strip_suffix(suffix) {
            return (core, Some(meridiem));
        }
    }
    (s, None)
}

fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Minutes since midnight for a normalized `HH:MM` string.
pub fn minutes_of(hhmm: &str) -> Option<u32> {
    let (h, m) = hhmm.split_once(':')?;
    Some(parse_digits(h)? * 60 + parse_digits(m)?)
}

/// Coerces ISO timestamps, `YYYY-MM-DD`, `DD/MM/YYYY`, and `DD-MM-YYYY` to a date.
pub fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    for fmt in ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    // ISO datetime without offset, e.g. 2024-03-04T00:00:00
    if s.len() > 10 && s.is_char_boundary(10) && s[10..].starts_with(['T', ' ']) {
        return NaiveDate::parse_from_str(&s[..10], "%Y-%m-%d").ok();
    }
    None
}

/// The Monday of the week containing `date`.
pub fn week_monday(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

// ────────────────────────────────────────────────────────────────────────────
// Roster cell handling
// ────────────────────────────────────────────────────────────────────────────

/// One time range read directly from a roster cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellRange {
    pub start: String,
    pub end: String,
    pub has_break: bool,
}

pub fn is_leave_marker(cell: &str) -> bool {
    let upper = cell.trim().to_uppercase();
    LEAVE_MARKERS.contains(&upper.as_str())
}

pub fn cell_has_break(cell: &str) -> bool {
    cell.trim().to_uppercase().ends_with(BREAK_MARKER)
}

/// Parses every time range in a cell such as `"8-4, 12-8"` or `"9am-5pm (B)"`.
///
/// Bare hours are read as a day shift: an end hour below 12 that is not after
/// the start is moved into the afternoon (`8-4` → 08:00–16:00). Returns an
/// empty list when any segment is not a readable range.
pub fn split_cell_ranges(cell: &str) -> Vec<CellRange> {
    let mut ranges = Vec::new();
    for segment in cell.split([',', ';', '&']) {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let has_break = cell_has_break(segment);
        let body = if has_break {
            segment[..segment.len() - BREAK_MARKER.len()].trim()
        } else {
            segment
        };
        let body = body.replace(" to ", "-");
        let Some((start_raw, end_raw)) = body.split_once(['-', '–']) else {
            return Vec::new();
        };
        let (Some(start), Some(end)) = (normalize_time(start_raw), normalize_time(end_raw)) else {
            return Vec::new();
        };
        let end = infer_afternoon_end(&start, &end, end_raw);
        ranges.push(CellRange {
            start,
            end,
            has_break,
        });
    }
    ranges
}

fn infer_afternoon_end(start: &str, end: &str, end_raw: &str) -> String {
    let explicit = end_raw.to_lowercase().contains(['a', 'p']);
    match (minutes_of(start), minutes_of(end)) {
        (Some(s), Some(e)) if !explicit && e <= s && e < 12 * 60 => {
            let shifted = e + 12 * 60;
            format!("{:02}:{:02}", shifted / 60, shifted % 60)
        }
        _ => end.to_string(),
    }
}

/// Drops leave markers and splits merged multi-range cells into one shift per range.
///
/// A cell is only split when it appears once for that person and date; if the
/// model already emitted one object per range the objects are kept as they are.
/// Each output shift carries the index it had in the model's `shifts` array.
fn expand_shifts(
    shifts: Vec<RawShift>,
    warnings: &mut Vec<ValidationIssue>,
) -> Vec<(usize, RawShift)> {
    let key = |s: &RawShift| {
        (
            s.staff_name.as_deref().unwrap_or_default().trim().to_lowercase(),
            s.date.clone(),
            s.raw_cell.as_deref().unwrap_or_default().trim().to_string(),
        )
    };
    let mut occurrences: HashMap<_, usize> = HashMap::new();
    for shift in &shifts {
        *occurrences.entry(key(shift)).or_default() += 1;
    }

    let mut out = Vec::with_capacity(shifts.len());
    for (source, shift) in shifts.into_iter().enumerate() {
        let cell = shift.raw_cell.as_deref().unwrap_or_default().trim().to_string();
        if is_leave_marker(&cell) {
            warnings.push(issue(
                "raw_cell",
                Some(source),
                format!(
                    "leave marker for {} does not produce a shift",
                    shift.staff_name.as_deref().unwrap_or("unknown staff")
                ),
                Some(cell),
            ));
            continue;
        }

        let ranges = split_cell_ranges(&cell);
        if ranges.len() >= 2 && occurrences.get(&key(&shift)).copied() == Some(1) {
            for range in ranges {
                out.push((
                    source,
                    RawShift {
                        start_time: Some(range.start),
                        end_time: Some(range.end),
                        has_break: Some(range.has_break),
                        ..shift.clone()
                    },
                ));
            }
        } else {
            out.push((source, shift));
        }
    }
    out
}

// ────────────────────────────────────────────────────────────────────────────
// Validation
// ────────────────────────────────────────────────────────────────────────────

fn issue(
    field: &str,
    shift_index: Option<usize>,
    message: impl Into<String>,
    value: Option<String>,
) -> ValidationIssue {
    ValidationIssue {
        field: field.to_string(),
        shift_index,
        message: message.into(),
        value,
    }
}

/// `clamp(model − errors × error_penalty − warnings × warning_penalty, 0, 100)`
pub fn compute_confidence(
    model_confidence: Option<u8>,
    errors: usize,
    warnings: usize,
    config: &ValidatorConfig,
) -> u8 {
    let base = model_confidence.unwrap_or(config.default_model_confidence) as i64;
    let score = base
        - errors as i64 * config.error_penalty as i64
        - warnings as i64 * config.warning_penalty as i64;
    score.clamp(0, 100) as u8
}

fn normalize_shift_time(
    field: &str,
    raw: Option<&str>,
    index: usize,
    errors: &mut Vec<ValidationIssue>,
) -> Option<String> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(value) => {
            let normalized = normalize_time(value);
            if normalized.is_none() {
                errors.push(issue(
                    field,
                    Some(index),
                    "time could not be read as HH:MM",
                    Some(value.to_string()),
                ));
            }
            normalized
        }
        None => {
            errors.push(issue(field, Some(index), "time is missing", None));
            None
        }
    }
}

fn check_time_order(
    start: &str,
    end: &str,
    index: usize,
    config: &ValidatorConfig,
    errors: &mut Vec<ValidationIssue>,
    warnings: &mut Vec<ValidationIssue>,
) {
    let (Some(s), Some(e)) = (minutes_of(start), minutes_of(end)) else {
        return;
    };
    let value = Some(format!("{start}-{end}"));
    let duration = if e > s {
        e - s
    } else if config.overnight_policy == OvernightPolicy::WrapNextDay && e < s {
        warnings.push(issue(
            "end_time",
            Some(index),
            "overnight shift: end time is on the next day",
            value.clone(),
        ));
        e + 24 * 60 - s
    } else {
        errors.push(issue(
            "end_time",
            Some(index),
            "end time must be after start time",
            value,
        ));
        return;
    };

    if duration > config.max_shift_hours * 60 {
        warnings.push(issue(
            "end_time",
            Some(index),
            format!("shift is longer than {} hours", config.max_shift_hours),
            value,
        ));
    }
}

/// Normalizes a raw extraction and validates every shift.
pub fn validate_extraction(
    raw: RawExtraction,
    config: &ValidatorConfig,
) -> (ExtractionData, ValidationResult) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let raw_week = raw
        .week_start
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let mut week_start = raw_week.and_then(normalize_date);
    if let (Some(value), None) = (raw_week, week_start) {
        errors.push(issue(
            "week_start",
            None,
            "week start date could not be parsed",
            Some(value.to_string()),
        ));
    }

    let raw_shifts = expand_shifts(raw.shifts, &mut warnings);
    let mut shifts = Vec::with_capacity(raw_shifts.len());
    let mut sources = Vec::with_capacity(raw_shifts.len());

    for (index, rs) in raw_shifts {
        sources.push(index);
        let staff_name = rs
            .staff_name
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if staff_name.is_empty() {
            errors.push(issue("staff_name", Some(index), "staff name is empty", None));
        }

        let date = match rs.date.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(value) => {
                let parsed = normalize_date(value);
                if parsed.is_none() {
                    errors.push(issue(
                        "date",
                        Some(index),
                        "date could not be parsed",
                        Some(value.to_string()),
                    ));
                }
                parsed
            }
            None => {
                errors.push(issue("date", Some(index), "date is missing", None));
                None
            }
        };

        let start_time =
            normalize_shift_time("start_time", rs.start_time.as_deref(), index, &mut errors);
        let end_time = normalize_shift_time("end_time", rs.end_time.as_deref(), index, &mut errors);
        if let (Some(start), Some(end)) = (&start_time, &end_time) {
            check_time_order(start, end, index, config, &mut errors, &mut warnings);
        }

        let role = rs
            .role
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        if role.is_none() {
            warnings.push(issue("role", Some(index), "role is missing", None));
        }

        let has_break = rs.has_break.unwrap_or(false)
            || rs.raw_cell.as_deref().is_some_and(cell_has_break);

        shifts.push(ExtractedShift {
            date,
            day: rs.day.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()),
            role,
            staff_name,
            start_time,
            end_time,
            has_break,
            raw_cell: rs.raw_cell,
            uncertainty_notes: Vec::new(),
        });
    }

    if week_start.is_none() {
        if let Some(earliest) = shifts.iter().filter_map(|s| s.date).min() {
            let inferred = week_monday(earliest);
            warnings.push(issue(
                "week_start",
                None,
                "week start inferred from the earliest shift date",
                Some(inferred.to_string()),
            ));
            week_start = Some(inferred);
        }
    }

    if let Some(ws) = week_start {
        let we = ws + Duration::days(6);
        for (&index, shift) in sources.iter().zip(&shifts) {
            if let Some(date) = shift.date {
                if date < ws || date > we {
                    errors.push(issue(
                        "date",
                        Some(index),
                        format!("date is outside the roster week {ws} to {we}"),
                        Some(date.to_string()),
                    ));
                }
            }
        }
    }

    let mut seen = HashSet::new();
    for (&index, shift) in sources.iter().zip(&shifts) {
        if shift.staff_name.is_empty() {
            continue;
        }
        if let (Some(date), Some(start)) = (shift.date, &shift.start_time) {
            let key = (shift.staff_name.to_lowercase(), date, start.clone());
            if !seen.insert(key) {
                errors.push(issue(
                    "duplicate",
                    Some(index),
                    format!(
                        "duplicate shift for {} on {} at {}",
                        shift.staff_name, date, start
                    ),
                    Some(shift.staff_name.clone()),
                ));
            }
        }
    }

    for uncertain in &raw.uncertain_fields {
        let field = uncertain.field.clone().unwrap_or_else(|| "unknown".to_string());
        let reason = uncertain
            .reason
            .clone()
            .unwrap_or_else(|| "not legible".to_string());
        if let Some(value) = uncertain.value.as_deref() {
            for shift in shifts.iter_mut().filter(|s| {
                s.staff_name.eq_ignore_ascii_case(value) || s.raw_cell.as_deref() == Some(value)
            }) {
                shift.uncertainty_notes.push(format!("{field}: {reason}"));
            }
        }
        warnings.push(issue(
            &field,
            None,
            format!("model was unsure: {reason}"),
            uncertain.value.clone(),
        ));
    }

    if shifts.is_empty() {
        warnings.push(issue("shifts", None, "no shifts were extracted", None));
    }

    errors.sort_by_key(|e| e.shift_index.map_or(0, |i| i + 1));

    let model_confidence = raw
        .confidence_score
        .map(|c| c.round().clamp(0.0, 100.0) as u8);
    let confidence = compute_confidence(model_confidence, errors.len(), warnings.len(), config);

    let data = ExtractionData {
        week_start,
        venue_name: raw.venue_name.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()),
        model_confidence,
        shifts,
        uncertain_fields: raw.uncertain_fields,
    };
    let result = ValidationResult {
        confidence,
        errors,
        warnings,
        quality: QualityLabel::from_score(confidence),
    };
    (data, result)
}
