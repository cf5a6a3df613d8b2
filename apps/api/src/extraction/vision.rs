//! One extraction call against the vision model, parsed into `RawExtraction`.

use tracing::debug;

use crate::extraction::preprocess::PreparedImage;
use crate::extraction::types::RawExtraction;
use crate::extraction::ExtractionError;
use crate::llm_client::{extract_json_object, VisionModel, VisionRequest};

/// Sampling temperature for extraction calls.
pub const EXTRACTION_TEMPERATURE: f32 = 0.1;

/// Sends the image with `prompt` and parses the single JSON object in the answer.
///
/// Returns the raw text alongside the parsed value so failed attempts can
/// still be recorded.
pub async fn extract_once(
    model: &dyn VisionModel,
    image: &PreparedImage,
    system: &str,
    prompt: &str,
    temperature: f32,
) -> Result<(String, Result<RawExtraction, ExtractionError>), ExtractionError> {
    let text = model
        .complete(VisionRequest {
            system,
            prompt,
            image: &image.bytes,
            mime_type: &image.mime_type,
            temperature,
        })
        .await?;
    debug!(response_chars = text.len(), "vision model answered");
    let parsed = parse_extraction(&text);
    Ok((text, parsed))
}

/// Parses model output into a raw extraction. Any text around the object is ignored.
pub fn parse_extraction(text: &str) -> Result<RawExtraction, ExtractionError> {
    let json = extract_json_object(text)
        .ok_or_else(|| ExtractionError::Parse("no JSON object in model output".to_string()))?;
    serde_json::from_str(json).map_err(|e| ExtractionError::Parse(e.to_string()))
}
