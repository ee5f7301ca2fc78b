//! Configuration file parser for ~/.config/feedsync/config.toml.
//!
//! The config file is optional — a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// Not a recognized IANA timezone name.
    #[error("Invalid quota_reset_timezone: {0}")]
    InvalidTimezone(String),

    /// A numeric limit that must be positive was zero.
    #[error("Invalid value for {0}: must be greater than zero")]
    InvalidLimit(&'static str),
}

// ============================================================================
// Configuration Struct
// ============================================================================

/// Top-level sync configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
///
/// Custom Debug impl masks `api_token` to prevent secret leakage in logs,
/// error messages, and debug output.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hard cap on upstream API calls per calendar day.
    pub daily_quota_limit: i64,

    /// Maximum articles fetched across all feeds in one sync run.
    pub global_article_cap: usize,

    /// Maximum articles fetched from a single feed in one sync run.
    pub per_feed_article_cap: usize,

    /// Maximum stored article count; oldest non-starred articles beyond
    /// this are pruned after each sync.
    pub retention_limit: i64,

    /// IANA timezone name defining the daily quota reset boundary.
    pub quota_reset_timezone: String,

    /// SQLite database path. Defaults to feedsync.db in the config directory.
    pub database_path: Option<String>,

    /// Base URL of the upstream feed API. Required for sync and daemon modes.
    pub upstream_url: Option<String>,

    /// Upstream API token (alternative to FEEDSYNC_API_TOKEN env var).
    /// Env var takes precedence over config file.
    pub api_token: Option<String>,

    /// Daemon mode sync interval in minutes.
    pub sync_interval_minutes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daily_quota_limit: 100,
            global_article_cap: 100,
            per_feed_article_cap: 20,
            retention_limit: 1000,
            quota_reset_timezone: "UTC".to_string(),
            database_path: None,
            upstream_url: None,
            api_token: None,
            sync_interval_minutes: 60,
        }
    }
}

/// Mask api_token in Debug output to prevent secret leakage.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("daily_quota_limit", &self.daily_quota_limit)
            .field("global_article_cap", &self.global_article_cap)
            .field("per_feed_article_cap", &self.per_feed_article_cap)
            .field("retention_limit", &self.retention_limit)
            .field("quota_reset_timezone", &self.quota_reset_timezone)
            .field("database_path", &self.database_path)
            .field("upstream_url", &self.upstream_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("sync_interval_minutes", &self.sync_interval_minutes)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to avoid loading a corrupted or
        // maliciously large config file into memory.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "daily_quota_limit",
                "global_article_cap",
                "per_feed_article_cap",
                "retention_limit",
                "quota_reset_timezone",
                "database_path",
                "upstream_url",
                "api_token",
                "sync_interval_minutes",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            quota = config.daily_quota_limit,
            retention = config.retention_limit,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Validate cross-field constraints not expressible through serde.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timezone()?;
        if self.daily_quota_limit <= 0 {
            return Err(ConfigError::InvalidLimit("daily_quota_limit"));
        }
        if self.global_article_cap == 0 {
            return Err(ConfigError::InvalidLimit("global_article_cap"));
        }
        if self.per_feed_article_cap == 0 {
            return Err(ConfigError::InvalidLimit("per_feed_article_cap"));
        }
        if self.retention_limit <= 0 {
            return Err(ConfigError::InvalidLimit("retention_limit"));
        }
        Ok(())
    }

    /// The quota reset timezone, parsed from its IANA name.
    pub fn timezone(&self) -> Result<chrono_tz::Tz, ConfigError> {
        chrono_tz::Tz::from_str(&self.quota_reset_timezone)
            .map_err(|_| ConfigError::InvalidTimezone(self.quota_reset_timezone.clone()))
    }
}

// ============================================================================
// Tests
// ============================================================================
