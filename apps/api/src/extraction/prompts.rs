// All LLM prompt constants for the Extraction module.
// Reuses cross-cutting fragments from llm_client::prompts.

use crate::extraction::types::ValidationIssue;
use crate::llm_client::prompts::{JSON_ONLY_SYSTEM, JSON_RETRY_REMINDER};

/// System prompt for roster extraction.
pub const EXTRACTION_SYSTEM_PREFIX: &str =
    "You are a meticulous data-entry assistant that transcribes photographed \
    hospitality staff rosters into structured shift records. ";

pub fn extraction_system() -> String {
    format!("{EXTRACTION_SYSTEM_PREFIX}{JSON_ONLY_SYSTEM}")
}

/// Base extraction prompt. Used verbatim for the first attempt.
pub const BASE_EXTRACTION_PROMPT: &str = r#"The attached image is a weekly staff roster. Transcribe every shift it shows.

Return a JSON object with this EXACT schema (no extra fields):
{
  "week_start": "2024-03-04",
  "venue_name": "The Anchor",
  "confidence_score": 85,
  "shifts": [
    {
      "date": "2024-03-04",
      "day": "Monday",
      "role": "Bar",
      "staff_name": "Sam Lee",
      "start_time": "09:00",
      "end_time": "17:00",
      "break": false,
      "raw_cell": "9-5"
    }
  ],
  "uncertain_fields": [
    {"field": "staff_name", "value": "J?n", "reason": "name partly illegible"}
  ]
}

Rules for extraction:

- Output ONE JSON object per shift. Never merge two shifts into one object.
- Only rows with a visible time produce a shift. Empty cells produce nothing.
- A cell with more than one time range (e.g. "8-4, 12-8") yields one shift object PER range.
- A trailing "(B)" marker on a cell means the shift includes a break: set "break": true.
- Leave or absence markers (OFF, AL, A/L, Leave) NEVER produce a shift.
- Times use 24-hour HH:MM. Rosters often write afternoon hours without am/pm: "8-4" means 08:00 to 16:00.
- Dates use YYYY-MM-DD. "week_start" is the Monday of the rostered week.
- "raw_cell" is the cell text exactly as written.
- If you cannot read a cell confidently, add it to "uncertain_fields" and OMIT it from "shifts". Do not guess.
- "confidence_score" is your own estimate (0-100) that the transcription is complete and correct."#;

/// Prompt for the attempt after a response that could not be parsed as JSON.
pub fn build_json_reminder_prompt() -> String {
    format!("{BASE_EXTRACTION_PROMPT}\n\n{JSON_RETRY_REMINDER}")
}

/// Line used when a retry was triggered by low confidence alone.
pub const LOW_CONFIDENCE_CORRECTION: &str =
    "1. [extraction] confidence: your self-reported confidence was low. \
    Re-read every cell and check each name, date and time against the image.";

/// Builds the correction prompt: the base prompt plus every validation error
/// from the previous attempt, one per line. `[shift i]` is the index into the
/// previous response's `shifts` array.
pub fn build_correction_prompt(errors: &[ValidationIssue]) -> String {
    if errors.is_empty() {
        return correction_prompt_with(LOW_CONFIDENCE_CORRECTION);
    }
    let itemized = errors
        .iter()
        .enumerate()
        .map(|(n, e)| {
            let location = match e.shift_index {
                Some(i) => format!("shift {i}"),
                None => "extraction".to_string(),
            };
            let value = e
                .value
                .as_deref()
                .map(|v| format!(" (value: \"{v}\")"))
                .unwrap_or_default();
            format!("{}. [{location}] {}: {}{value}", n + 1, e.field, e.message)
        })
        .collect::<Vec<_>>()
        .join("\n");
    correction_prompt_with(&itemized)
}

fn correction_prompt_with(itemized: &str) -> String {
    format!(
        "{BASE_EXTRACTION_PROMPT}\n\n\
        Your previous transcription of this image had the following problems:\n\
        {itemized}\n\n\
        Look at the image again and return a corrected JSON object. \
        Fix every listed problem. Keep the shifts that were correct."
    )
}
