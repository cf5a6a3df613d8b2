use std::str::FromStr;

use anyhow::{Context, Result};

use crate::extraction::validation::OvernightPolicy;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// When set, extraction sessions are kept in Redis instead of process memory.
    pub redis_url: Option<String>,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub anthropic_api_key: String,
    pub vision_model: String,
    pub llm_timeout_secs: u64,
    pub port: u16,
    pub rust_log: String,
    pub max_extraction_retries: u32,
    pub session_ttl_secs: u64,
    pub session_sweep_secs: u64,
    pub max_upload_bytes: usize,
    pub overnight_policy: OvernightPolicy,
    pub preprocess_min_width: u32,
    pub preprocess_max_width: u32,
    pub preprocess_contrast: f32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let config = Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: std::env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty()),
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            vision_model: std::env::var("VISION_MODEL")
                .unwrap_or_else(|_| crate::llm_client::DEFAULT_MODEL.to_string()),
            llm_timeout_secs: parse_env("LLM_TIMEOUT_SECS", 120)?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            max_extraction_retries: parse_env("MAX_EXTRACTION_RETRIES", 2)?,
            session_ttl_secs: parse_env("SESSION_TTL_SECS", 3600)?,
            session_sweep_secs: parse_env("SESSION_SWEEP_SECS", 300)?,
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
            overnight_policy: parse_env("OVERNIGHT_POLICY", OvernightPolicy::Reject)?,
            preprocess_min_width: parse_env("PREPROCESS_MIN_WIDTH", 1000)?,
            preprocess_max_width: parse_env("PREPROCESS_MAX_WIDTH", 2000)?,
            preprocess_contrast: parse_env("PREPROCESS_CONTRAST", 1.2)?,
        };

        if config.preprocess_min_width > config.preprocess_max_width {
            anyhow::bail!(
                "PREPROCESS_MIN_WIDTH ({}) must not exceed PREPROCESS_MAX_WIDTH ({})",
                config.preprocess_min_width,
                config.preprocess_max_width
            );
        }

        Ok(config)
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

/// Reads an optional variable, falling back to `default` when unset.
fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key} has an invalid value '{raw}': {e}")),
        Err(_) => Ok(default),
    }
}
