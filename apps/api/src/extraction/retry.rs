//! Retry Controller: runs extraction attempts under a confidence contract.
//!
//! Attempting → Validating → {Accepted, Retrying, Exhausted}. Attempts run
//! strictly in sequence. Results are never thrown away: when no attempt reaches
//! the threshold the best one is returned with `needs_review` set.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::extraction::preprocess::PreparedImage;
use crate::extraction::prompts::{
    build_correction_prompt, build_json_reminder_prompt, extraction_system,
    BASE_EXTRACTION_PROMPT,
};
use crate::extraction::types::{ExtractionData, ValidationResult};
use crate::extraction::validation::{validate_extraction, ValidatorConfig};
use crate::extraction::vision::{extract_once, EXTRACTION_TEMPERATURE};
use crate::extraction::ExtractionError;
use crate::llm_client::VisionModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryState {
    Attempting,
    Validating,
    Accepted,
    Retrying,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptVariant {
    Base,
    Correction,
    /// Base prompt plus a JSON-only reminder, sent after an unparseable answer.
    JsonReminder,
}

/// One model call and what came of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionAttempt {
    /// 1-based.
    pub index: u32,
    pub prompt_variant: PromptVariant,
    pub raw_response: Option<String>,
    pub data: Option<ExtractionData>,
    pub validation: Option<ValidationResult>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts allowed after the first one.
    pub max_retries: u32,
    /// Minimum confidence to accept ("fair").
    pub accept_threshold: u8,
    pub temperature: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            accept_threshold: 70,
            temperature: EXTRACTION_TEMPERATURE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub state: RetryState,
    pub data: ExtractionData,
    pub validation: ValidationResult,
    pub attempts: Vec<ExtractionAttempt>,
    /// Index of the attempt whose data is returned.
    pub selected_attempt: u32,
    pub needs_review: bool,
}

fn advance(state: &mut RetryState, next: RetryState, attempt: u32) {
    debug!(attempt, from = ?*state, to = ?next, "retry controller transition");
    *state = next;
}

/// Runs up to `policy.max_retries + 1` attempts against `model`.
///
/// Fails with `ExtractionError::Exhausted` only when no attempt produced
/// parseable output.
pub async fn run_extraction(
    model: &dyn VisionModel,
    image: &PreparedImage,
    policy: &RetryPolicy,
    validator: &ValidatorConfig,
) -> Result<ExtractionOutcome, ExtractionError> {
    let system = extraction_system();
    let total = policy.max_retries + 1;
    let mut attempts: Vec<ExtractionAttempt> = Vec::with_capacity(total as usize);
    let mut state = RetryState::Attempting;
    let mut variant = PromptVariant::Base;
    let mut prompt = BASE_EXTRACTION_PROMPT.to_string();

    for index in 1..=total {
        advance(&mut state, RetryState::Attempting, index);
        info!(attempt = index, total, variant = ?variant, "extraction attempt");

        let (raw_response, parsed) =
            match extract_once(model, image, &system, &prompt, policy.temperature).await {
                Ok((text, parsed)) => (Some(text), parsed),
                Err(e) => (None, Err(e)),
            };

        match parsed {
            Ok(raw) => {
                advance(&mut state, RetryState::Validating, index);
                let (data, validation) = validate_extraction(raw, validator);
                let confidence = validation.confidence;
                info!(
                    attempt = index,
                    confidence,
                    errors = validation.errors.len(),
                    warnings = validation.warnings.len(),
                    quality = validation.quality.as_str(),
                    "extraction attempt validated"
                );

                let accepted = confidence >= policy.accept_threshold;
                let correction = (!accepted && index < total)
                    .then(|| build_correction_prompt(&validation.errors));

                attempts.push(ExtractionAttempt {
                    index,
                    prompt_variant: variant,
                    raw_response,
                    data: Some(data),
                    validation: Some(validation),
                    error: None,
                });

                if accepted {
                    advance(&mut state, RetryState::Accepted, index);
                    return finish(state, attempts, index as usize - 1, policy).ok_or_else(|| {
                        ExtractionError::Parse("accepted attempt has no data".to_string())
                    });
                }
                if let Some(correction) = correction {
                    advance(&mut state, RetryState::Retrying, index);
                    warn!(
                        attempt = index,
                        confidence,
                        threshold = policy.accept_threshold,
                        "confidence below threshold, retrying with correction prompt"
                    );
                    prompt = correction;
                    variant = PromptVariant::Correction;
                }
            }
            Err(e) => {
                warn!(attempt = index, error = %e, "extraction attempt failed");
                let unparseable = matches!(e, ExtractionError::Parse(_));
                attempts.push(ExtractionAttempt {
                    index,
                    prompt_variant: variant,
                    raw_response,
                    data: None,
                    validation: None,
                    error: Some(e.to_string()),
                });
                if index < total {
                    advance(&mut state, RetryState::Retrying, index);
                    if unparseable {
                        prompt = build_json_reminder_prompt();
                        variant = PromptVariant::JsonReminder;
                    }
                }
            }
        }
    }

    advance(&mut state, RetryState::Exhausted, total);

    let last_failed = attempts.last().is_some_and(|a| a.error.is_some());
    let selected = if last_failed {
        attempts.iter().rposition(|a| a.data.is_some())
    } else {
        best_attempt(&attempts)
    };

    let last_error = attempts
        .iter()
        .rev()
        .find_map(|a| a.error.clone())
        .unwrap_or_else(|| "no attempt produced data".to_string());

    match selected.and_then(|i| finish(state, attempts, i, policy)) {
        Some(outcome) => {
            warn!(
                selected = outcome.selected_attempt,
                confidence = outcome.validation.confidence,
                "extraction attempts exhausted, returning best result for review"
            );
            Ok(outcome)
        }
        None => Err(ExtractionError::Exhausted {
            attempts: total,
            last_error,
        }),
    }
}

/// Highest confidence wins; the earliest attempt wins a tie.
fn best_attempt(attempts: &[ExtractionAttempt]) -> Option<usize> {
    let mut best: Option<(usize, u8)> = None;
    for (i, attempt) in attempts.iter().enumerate() {
        if let Some(v) = &attempt.validation {
            if best.map_or(true, |(_, score)| v.confidence > score) {
                best = Some((i, v.confidence));
            }
        }
    }
    best.map(|(i, _)| i)
}

fn finish(
    state: RetryState,
    attempts: Vec<ExtractionAttempt>,
    selected: usize,
    policy: &RetryPolicy,
) -> Option<ExtractionOutcome> {
    let chosen = attempts.get(selected)?;
    let data = chosen.data.clone()?;
    let validation = chosen.validation.clone()?;
    let selected_attempt = chosen.index;
    let needs_review =
        state != RetryState::Accepted || validation.confidence < policy.accept_threshold;
    Some(ExtractionOutcome {
        state,
        data,
        validation,
        attempts,
        selected_attempt,
        needs_review,
    })
}
