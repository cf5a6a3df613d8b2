//! Staff Matcher: resolves names read off a roster to known venue staff.
//!
//! Order, first hit wins: exact normalized full name (100), first token
//! against first name (80), best fuzzy full name at or above 0.70
//! (round(similarity × 100)), otherwise unmatched (0).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use strsim::levenshtein;
use tracing::debug;
use uuid::Uuid;

use crate::errors::AppError;
use crate::extraction::types::ExtractedShift;
use crate::models::staff::StaffMember;

pub const FUZZY_THRESHOLD: f64 = 0.70;
const EXACT_CONFIDENCE: u8 = 100;
const FIRST_NAME_CONFIDENCE: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    ExactName,
    FirstName,
    FuzzyName,
    Manual,
    None,
}

/// `confidence == 0` exactly when `staff_id` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffMatch {
    pub extracted_name: String,
    pub staff_id: Option<Uuid>,
    pub staff_name: Option<String>,
    pub confidence: u8,
    pub match_type: MatchType,
}

impl StaffMatch {
    fn resolved(extracted_name: &str, member: &StaffMember, confidence: u8, match_type: MatchType) -> Self {
        Self {
            extracted_name: extracted_name.to_string(),
            staff_id: Some(member.id),
            staff_name: Some(member.full_name()),
            confidence,
            match_type,
        }
    }

    fn unmatched(extracted_name: &str) -> Self {
        Self {
            extracted_name: extracted_name.to_string(),
            staff_id: None,
            staff_name: None,
            confidence: 0,
            match_type: MatchType::None,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.staff_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedShift {
    pub shift: ExtractedShift,
    pub staff_match: StaffMatch,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    pub shifts: Vec<MatchedShift>,
    pub matched_count: usize,
    pub unmatched_count: usize,
    /// Distinct unresolved names, in roster order.
    pub unmatched_names: Vec<String>,
}

impl MatchReport {
    pub fn from_shifts(shifts: Vec<MatchedShift>) -> Self {
        let mut report = Self {
            shifts,
            ..Self::default()
        };
        report.recount();
        report
    }

    pub fn recount(&mut self) {
        self.matched_count = self
            .shifts
            .iter()
            .filter(|s| s.staff_match.is_matched())
            .count();
        self.unmatched_count = self.shifts.len() - self.matched_count;
        self.unmatched_names.clear();
        let mut seen = HashSet::new();
        for shift in self.shifts.iter().filter(|s| !s.staff_match.is_matched()) {
            if seen.insert(normalize_name(&shift.shift.staff_name)) {
                self.unmatched_names.push(shift.shift.staff_name.clone());
            }
        }
    }
}

/// An explicit extracted-name → staff member decision made by a person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualOverride {
    pub extracted_name: String,
    pub user_id: Uuid,
}

/// Lowercase, trim, collapse internal whitespace, drop punctuation except `-` and `'`.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-' || *c == '\'')
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// `1 − levenshtein(a, b) / max(len(a), len(b))`, in characters. Two empty strings are identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

struct Candidate {
    member: StaffMember,
    full_name: String,
    first_name: String,
}

/// Matcher over one venue's staff list, in a fixed alphabetical order so
/// ties always resolve the same way.
pub struct StaffMatcher {
    candidates: Vec<Candidate>,
}

impl StaffMatcher {
    pub fn new(staff: &[StaffMember]) -> Self {
        let mut candidates: Vec<Candidate> = staff
            .iter()
            .map(|m| Candidate {
                full_name: normalize_name(&m.full_name()),
                first_name: normalize_name(&m.first_name),
                member: m.clone(),
            })
            .collect();
        candidates.sort_by(|a, b| {
            a.full_name
                .cmp(&b.full_name)
                .then_with(|| a.member.id.cmp(&b.member.id))
        });
        Self { candidates }
    }

    pub fn match_name(&self, extracted: &str) -> StaffMatch {
        let normalized = normalize_name(extracted);
        if normalized.is_empty() {
            return StaffMatch::unmatched(extracted);
        }

        if let Some(c) = self.candidates.iter().find(|c| c.full_name == normalized) {
            return StaffMatch::resolved(extracted, &c.member, EXACT_CONFIDENCE, MatchType::ExactName);
        }

        if let Some(first_token) = normalized.split(' ').next() {
            if let Some(c) = self.candidates.iter().find(|c| c.first_name == first_token) {
                return StaffMatch::resolved(
                    extracted,
                    &c.member,
                    FIRST_NAME_CONFIDENCE,
                    MatchType::FirstName,
                );
            }
        }

        let mut best: Option<(&Candidate, f64)> = None;
        for candidate in &self.candidates {
            let score = similarity(&normalized, &candidate.full_name);
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((candidate, score));
            }
        }
        match best {
            Some((c, score)) if score >= FUZZY_THRESHOLD => {
                // 100 is reserved for exact and manual matches.
                let confidence = ((score * 100.0).round() as u8).min(EXACT_CONFIDENCE - 1);
                StaffMatch::resolved(extracted, &c.member, confidence, MatchType::FuzzyName)
            }
            _ => StaffMatch::unmatched(extracted),
        }
    }

    /// Annotates every shift, matching each distinct name once.
    pub fn match_shifts(&self, shifts: Vec<ExtractedShift>) -> MatchReport {
        let mut cache: HashMap<String, StaffMatch> = HashMap::new();
        let matched = shifts
            .into_iter()
            .map(|shift| {
                let staff_match = cache
                    .entry(normalize_name(&shift.staff_name))
                    .or_insert_with(|| {
                        let m = self.match_name(&shift.staff_name);
                        debug!(
                            name = %shift.staff_name,
                            match_type = ?m.match_type,
                            confidence = m.confidence,
                            "staff name matched"
                        );
                        m
                    })
                    .clone();
                MatchedShift { shift, staff_match }
            })
            .collect();
        MatchReport::from_shifts(matched)
    }
}

/// Applies manual overrides to every shift carrying the overridden name.
///
/// Overridden shifts get confidence 100 and `MatchType::Manual`. Returns the
/// number of shifts changed.
pub fn apply_overrides(
    report: &mut MatchReport,
    overrides: &[ManualOverride],
    staff: &[StaffMember],
) -> Result<usize, AppError> {
    let mut changed = 0;
    for o in overrides {
        let member = staff.iter().find(|m| m.id == o.user_id).ok_or_else(|| {
            AppError::Validation(format!("User {} is not on this venue's staff list", o.user_id))
        })?;
        let target = normalize_name(&o.extracted_name);
        let mut hits = 0;
        for shift in report
            .shifts
            .iter_mut()
            .filter(|s| normalize_name(&s.shift.staff_name) == target)
        {
            shift.staff_match =
                StaffMatch::resolved(&shift.shift.staff_name, member, EXACT_CONFIDENCE, MatchType::Manual);
            hits += 1;
        }
        if hits == 0 {
            return Err(AppError::Validation(format!(
                "No extracted shift is named '{}'",
                o.extracted_name
            )));
        }
        changed += hits;
    }
    report.recount();
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(first: &str, last: &str) -> StaffMember {
        StaffMember {
            id: Uuid::new_v4(),
            first_name: first.to_string(),
            last_name: last.to_string(),
        }
    }

    fn shift(name: &str) -> ExtractedShift {
        ExtractedShift {
            date: None,
            day: None,
            role: None,
            staff_name: name.to_string(),
            start_time: Some("09:00".to_string()),
            end_time: Some("17:00".to_string()),
            has_break: false,
            raw_cell: None,
            uncertainty_notes: vec![],
        }
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  John   SMITH. "), "john smith");
        assert_eq!(normalize_name("Mary-Jane O'Neil!"), "mary-jane o'neil");
        assert_eq!(normalize_name(""), "");
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("john smith", "john smith"), 1.0);
        assert_eq!(similarity("", ""), 1.0);
        let s = similarity("jon smyth", "john smith");
        assert!((FUZZY_THRESHOLD..1.0).contains(&s), "{s}");
        assert!(similarity("alice brown", "zara zeta") < FUZZY_THRESHOLD);
    }

    #[test]
    fn test_exact_match_is_100() {
        let staff = vec![member("John", "Smith")];
        let m = StaffMatcher::new(&staff).match_name("John Smith");
        assert_eq!(m.match_type, MatchType::ExactName);
        assert_eq!(m.confidence, 100);
        assert_eq!(m.staff_id, Some(staff[0].id));
    }

    #[test]
    fn test_first_name_match_is_80() {
        let staff = vec![member("Priya", "Patel"), member("John", "Smith")];
        let matcher = StaffMatcher::new(&staff);
        let m = matcher.match_name("priya");
        assert_eq!(m.match_type, MatchType::FirstName);
        assert_eq!(m.confidence, 80);
        assert_eq!(m.staff_id, Some(staff[0].id));

        let m = matcher.match_name("Priya P");
        assert_eq!(m.match_type, MatchType::FirstName);
    }

    #[test]
    fn test_fuzzy_match_uses_rounded_similarity() {
        let staff = vec![member("John", "Smith")];
        let m = StaffMatcher::new(&staff).match_name("Jon Smyth");
        assert_eq!(m.match_type, MatchType::FuzzyName);
        assert_eq!(m.confidence, 80);
        assert_eq!(m.staff_id, Some(staff[0].id));
    }

    #[test]
    fn test_no_match_is_zero_without_identity() {
        let staff = vec![member("Alice", "Brown")];
        let m = StaffMatcher::new(&staff).match_name("Zara Zeta");
        assert_eq!(m.match_type, MatchType::None);
        assert_eq!(m.confidence, 0);
        assert_eq!(m.staff_id, None);

        let m = StaffMatcher::new(&staff).match_name("   ");
        assert_eq!(m.match_type, MatchType::None);
    }

    #[test]
    fn test_fuzzy_tie_breaks_alphabetically() {
        // "tam reed" is one edit from both; "tim reed" sorts first.
        let staff = vec![member("Tom", "Reed"), member("Tim", "Reed")];
        let m = StaffMatcher::new(&staff).match_name("Tam Reed");
        assert_eq!(m.staff_id, Some(staff[1].id));
        assert_eq!(m.match_type, MatchType::FuzzyName);
        assert_eq!(m.confidence, 88);
    }

    #[test]
    fn test_match_shifts_counts_and_names() {
        let staff = vec![member("John", "Smith")];
        let report = StaffMatcher::new(&staff).match_shifts(vec![
            shift("John Smith"),
            shift("Zed Q"),
            shift("zed q"),
            shift("John Smith"),
        ]);
        assert_eq!(report.matched_count, 2);
        assert_eq!(report.unmatched_count, 2);
        assert_eq!(report.unmatched_names, vec!["Zed Q"]);
    }

    #[test]
    fn test_manual_override_forces_100_and_recounts() {
        let staff = vec![member("John", "Smith"), member("Zoe", "Quinn")];
        let mut report =
            StaffMatcher::new(&staff).match_shifts(vec![shift("John Smith"), shift("ZQ"), shift("zq")]);
        assert_eq!(report.unmatched_count, 2);

        let changed = apply_overrides(
            &mut report,
            &[ManualOverride {
                extracted_name: "ZQ".to_string(),
                user_id: staff[1].id,
            }],
            &staff,
        )
        .unwrap();

        assert_eq!(changed, 2);
        assert_eq!(report.matched_count, 3);
        assert_eq!(report.unmatched_count, 0);
        assert!(report.unmatched_names.is_empty());
        assert_eq!(report.shifts[1].staff_match.match_type, MatchType::Manual);
        assert_eq!(report.shifts[1].staff_match.confidence, 100);
    }

    #[test]
    fn test_manual_override_replaces_automatic_match() {
        let staff = vec![member("John", "Smith"), member("Johnny", "Smithers")];
        let mut report = StaffMatcher::new(&staff).match_shifts(vec![shift("John Smith")]);
        apply_overrides(
            &mut report,
            &[ManualOverride {
                extracted_name: "john smith".to_string(),
                user_id: staff[1].id,
            }],
            &staff,
        )
        .unwrap();
        assert_eq!(report.shifts[0].staff_match.staff_id, Some(staff[1].id));
    }

    #[test]
    fn test_override_for_unknown_user_is_rejected() {
        let staff = vec![member("John", "Smith")];
        let mut report = StaffMatcher::new(&staff).match_shifts(vec![shift("ZQ")]);
        let err = apply_overrides(
            &mut report,
            &[ManualOverride {
                extracted_name: "ZQ".to_string(),
                user_id: Uuid::new_v4(),
            }],
            &staff,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(report.unmatched_count, 1);
    }
}
