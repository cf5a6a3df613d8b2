// Shared prompt fragments. Each module that calls the model keeps its own
// prompts.rs alongside it and reuses these cross-cutting pieces.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Appended to a prompt after the model answered with something that was not JSON.
pub const JSON_RETRY_REMINDER: &str = "\
    IMPORTANT: Your previous answer could not be parsed. \
    Return exactly ONE JSON object matching the schema above and nothing else.";
