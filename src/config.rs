use anyhow::Context;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60;

/// Settings handed to `GeminiClient`. `api_key: None` selects demo mode.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub gemini: GeminiConfig,
    pub port: u16,
    pub max_upload_bytes: usize,
    /// Sessions untouched this long are dropped by the sweeper.
    pub session_ttl: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup so tests don't touch the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let api_key = ["GEMINI_API_KEY", "API_KEY"]
            .iter()
            .filter_map(|key| lookup(key))
            .map(|k| k.trim().to_string())
            .find(|k| !k.is_empty());

        let timeout_secs = match lookup("GEMINI_TIMEOUT_SECS") {
            Some(v) => v.parse::<u64>().with_context(|| format!("invalid GEMINI_TIMEOUT_SECS: {v}"))?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        let port = match lookup("PORT") {
            Some(v) => v.parse::<u16>().with_context(|| format!("invalid PORT: {v}"))?,
            None => 8080,
        };
        let max_upload_bytes = match lookup("MAX_UPLOAD_BYTES") {
            Some(v) => v.parse::<usize>().with_context(|| format!("invalid MAX_UPLOAD_BYTES: {v}"))?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };
        let session_ttl_secs = match lookup("SESSION_TTL_SECS") {
            Some(v) => v.parse::<u64>().with_context(|| format!("invalid SESSION_TTL_SECS: {v}"))?,
            None => DEFAULT_SESSION_TTL_SECS,
        };

        Ok(Self {
            gemini: GeminiConfig {
                api_key,
                api_base: lookup("GEMINI_API_BASE")
                    .map(|b| b.trim_end_matches('/').to_string())
                    .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
                model: lookup("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                timeout: Duration::from_secs(timeout_secs),
            },
            port,
            max_upload_bytes,
            session_ttl: Duration::from_secs(session_ttl_secs),
        })
    }
}
