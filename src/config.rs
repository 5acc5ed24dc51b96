use anyhow::{bail, Result};
use std::str::FromStr;
use std::time::Duration;

/// Which service performs the actual translation calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationBackend {
    OpenAi,
    DeepL,
}

impl FromStr for TranslationBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "gpt" => Ok(TranslationBackend::OpenAi),
            "deepl" => Ok(TranslationBackend::DeepL),
            other => bail!("Unknown TRANSLATION_BACKEND: '{}'", other),
        }
    }
}

/// Where glossary and dictionary mappings are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    File,
    Url,
}

/// Tunables of the translation pipeline.
///
/// The truncation thresholds are tuned to one service's failure mode;
/// treat them as knobs, not constants.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Sources shorter than this (in chars) are never checked for truncation
    pub truncation_min_chars: usize,
    /// A result shorter than this fraction of the source counts as truncated
    pub truncation_min_ratio: f64,
    /// Prior lines sent along in history context mode
    pub history_lines: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            truncation_min_chars: 20,
            truncation_min_ratio: 0.2,
            history_lines: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // OpenAI (translation and judgment)
    pub openai_api_key: Option<String>,
    pub openai_api_url: String,
    pub openai_model: String,
    pub judge_model: String,

    // Translation backend
    pub translation_backend: TranslationBackend,
    pub deepl_api_key: Option<String>,
    pub deepl_api_url: String,
    pub external_call_timeout: Duration,

    // Persistence
    pub storage_kind: StorageKind,
    pub storage_dir: String,
    pub storage_url: Option<String>,
    pub storage_token: Option<String>,
    pub storage_bin_id: Option<String>,
    pub mirror_store_path: String,
    pub mirror_max_per_guild: usize,

    // Bridge
    pub guilds_file: String,
    pub reply_icon: String,
    pub reply_preview_limit: usize,
    pub session_ttl: Duration,
    pub pipeline: PipelineSettings,

    // Server
    pub api_key: Option<String>,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = PipelineSettings::default();

        let storage_kind = match std::env::var("STORAGE_TYPE")
            .unwrap_or_else(|_| "file".to_string())
            .to_lowercase()
            .as_str()
        {
            "file" => StorageKind::File,
            "url" => StorageKind::Url,
            other => bail!("Unknown STORAGE_TYPE: '{}'", other),
        };

        let config = Self {
            // OpenAI
            openai_api_key: non_empty_var("OPENAI_API_KEY"),
            openai_api_url: std::env::var("OPENAI_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string()),
            openai_model: std::env::var("OPENAI_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            judge_model: std::env::var("JUDGE_MODEL").unwrap_or_else(|_| "gpt-5-mini".to_string()),

            // Translation backend
            translation_backend: std::env::var("TRANSLATION_BACKEND")
                .unwrap_or_else(|_| "openai".to_string())
                .parse()?,
            deepl_api_key: non_empty_var("DEEPL_API_KEY"),
            deepl_api_url: std::env::var("DEEPL_API_URL")
                .unwrap_or_else(|_| "https://api-free.deepl.com/v2/translate".to_string()),
            external_call_timeout: Duration::from_secs(parse_var("EXTERNAL_CALL_TIMEOUT_SECS", 20)),

            // Persistence
            storage_kind,
            storage_dir: std::env::var("STORAGE_DIR").unwrap_or_else(|_| "data".to_string()),
            storage_url: non_empty_var("STORAGE_URL"),
            storage_token: non_empty_var("STORAGE_TOKEN"),
            storage_bin_id: non_empty_var("STORAGE_BIN_ID"),
            mirror_store_path: std::env::var("MIRROR_STORE_PATH")
                .unwrap_or_else(|_| "data/mirror.json".to_string()),
            mirror_max_per_guild: parse_var("MIRROR_MAX_PER_GUILD", 4000),

            // Bridge
            guilds_file: std::env::var("GUILDS_FILE")
                .unwrap_or_else(|_| "data/guilds.json".to_string()),
            reply_icon: std::env::var("REPLY_ICON").unwrap_or_else(|_| "↪".to_string()),
            reply_preview_limit: parse_var("REPLY_PREVIEW_LIMIT", 50),
            session_ttl: Duration::from_secs(parse_var("SESSION_TTL_SECS", 600)),
            pipeline: PipelineSettings {
                truncation_min_chars: parse_var("TRUNCATION_MIN_CHARS", defaults.truncation_min_chars),
                truncation_min_ratio: parse_var("TRUNCATION_MIN_RATIO", defaults.truncation_min_ratio),
                history_lines: parse_var("HISTORY_LINES", defaults.history_lines),
            },

            // Server
            api_key: non_empty_var("API_KEY"),
            port: parse_var("PORT", 3000),
        };

        if config.translation_backend == TranslationBackend::DeepL && config.deepl_api_key.is_none() {
            bail!("TRANSLATION_BACKEND=deepl requires DEEPL_API_KEY");
        }
        if config.storage_kind == StorageKind::Url
            && (config.storage_url.is_none() || config.storage_bin_id.is_none())
        {
            bail!("STORAGE_TYPE=url requires STORAGE_URL and STORAGE_BIN_ID");
        }

        Ok(config)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
