// Roster image extraction pipeline.
// Flow: preprocess → vision call → validate → (correct + retry) → staff match → session.
// Preprocessing is CPU-bound and must run inside tokio::task::spawn_blocking.

use thiserror::Error;

use crate::llm_client::LlmError;

pub mod handlers;
pub mod preprocess;
pub mod prompts;
pub mod retry;
pub mod service;
pub mod session;
pub mod types;
pub mod validation;
pub mod vision;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Vision model call failed: {0}")]
    ModelCall(#[from] LlmError),

    #[error("Model response was not a JSON object: {0}")]
    Parse(String),

    #[error("All {attempts} extraction attempts failed; last error: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}
