//! Process configuration
//!
//! Everything is read from the environment once at startup (after `.env`
//! has been loaded by the binary) and handed to [`crate::Engine`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },

    #[error("Failed to determine data directory")]
    NoDataDir,
}

/// Tunables of the sync pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Maximum number of new UIDs taken per invocation (newest first)
    pub uid_cap: usize,
    /// UIDs fetched per protocol round trip
    pub sub_batch_size: usize,
    pub inter_batch_delay: Duration,
    /// Wall-clock budget for one account sync
    pub sync_timeout: Duration,
    pub mailbox: String,
    pub spam_folder: String,
    /// Cleaned body characters sent to the model
    pub prompt_body_chars: usize,
    /// Leading body characters scanned for forwarded-header lines
    pub forward_scan_chars: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            uid_cap: 50,
            sub_batch_size: 10,
            inter_batch_delay: Duration::from_millis(200),
            sync_timeout: Duration::from_secs(240),
            mailbox: "INBOX".to_string(),
            spam_folder: "Spam".to_string(),
            prompt_body_chars: 2000,
            forward_scan_chars: 500,
        }
    }
}

/// AI endpoint configuration (OpenAI-compatible chat completions)
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub salt_path: PathBuf,
    pub master_key: String,
    pub scheduler_secret: String,
    pub ai: AiConfig,
    pub sync: SyncSettings,
    pub sync_interval_minutes: u64,
    pub digest_interval_hours: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = match std::env::var("MAILSIFT_DATA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => directories::ProjectDirs::from("com", "mailsift", "mailsift")
                .ok_or(ConfigError::NoDataDir)?
                .data_dir()
                .to_path_buf(),
        };

        let database_path = std::env::var("MAILSIFT_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("mailsift.db"));

        let master_key = required("MAILSIFT_MASTER_KEY")?;
        let scheduler_secret = required("MAILSIFT_SCHEDULER_SECRET")?;

        let defaults = AiConfig::default();
        let ai = AiConfig {
            base_url: std::env::var("MAILSIFT_AI_BASE_URL").unwrap_or(defaults.base_url),
            api_key: std::env::var("MAILSIFT_AI_API_KEY").ok().filter(|k| !k.is_empty()),
            model: std::env::var("MAILSIFT_AI_MODEL").unwrap_or(defaults.model),
            timeout: defaults.timeout,
        };

        let mut sync = SyncSettings::default();
        sync.sync_timeout = Duration::from_secs(parse_or("MAILSIFT_SYNC_TIMEOUT_SECS", 240)?);

        Ok(Self {
            database_path,
            salt_path: data_dir.join(".encryption_salt"),
            master_key,
            scheduler_secret,
            ai,
            sync,
            sync_interval_minutes: parse_or("MAILSIFT_SYNC_INTERVAL_MINUTES", 5)?,
            digest_interval_hours: parse_or("MAILSIFT_DIGEST_INTERVAL_HOURS", 168)?,
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(key)),
    }
}

fn parse_or(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}
