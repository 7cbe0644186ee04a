//! Configuration file parser for ~/.config/stormwatch/config.toml.
//!
//! The config file is optional — a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde, though we log a warning when
//! the file contains potential typos. The poll interval is resolved once at
//! startup; nothing inside the polling loop consults the environment.

use crate::subscribe::DEFAULT_POLL_INTERVAL;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment override for the poll interval, read once at startup.
pub const POLL_INTERVAL_ENV: &str = "STORMWATCH_POLL_INTERVAL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be
/// specified. The custom `Debug` impl masks `access_token` to prevent
/// secret leakage in logs and error messages.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API endpoint the client talks to.
    pub server_url: String,

    /// OAuth2 access token (alternative to the STORMFORGE_TOKEN env var;
    /// the env var takes precedence).
    pub access_token: Option<String>,

    /// Poll interval as a duration string (e.g. "30s", "2m").
    pub poll_interval: Option<String>,

    /// Jitter factor applied to each poll wait.
    pub jitter: f64,

    /// Whether failed activities are shown.
    pub show_failed: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "https://api.stormforge.io".to_string(),
            access_token: None,
            poll_interval: None,
            jitter: 1.0,
            show_failed: false,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("server_url", &self.server_url)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("poll_interval", &self.poll_interval)
            .field("jitter", &self.jitter)
            .field("show_failed", &self.show_failed)
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
    /// - Unknown keys → silently accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
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
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "server_url",
                "access_token",
                "poll_interval",
                "jitter",
                "show_failed",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), server = %config.server_url, "Loaded configuration");
        Ok(config)
    }
}

/// Resolves the effective poll interval from, in order of precedence: an
/// explicit value (CLI flag), the environment override, the config file,
/// and finally the 30-second default.
///
/// Values are duration strings; anything unparsable logs a warning and
/// falls through to the next source.
pub fn resolve_poll_interval(explicit: Option<&str>, config: &Config) -> Duration {
    let env = std::env::var(POLL_INTERVAL_ENV).ok();
    let sources = [
        ("flag", explicit),
        ("env", env.as_deref()),
        ("config", config.poll_interval.as_deref()),
    ];
    for (source, value) in sources {
        let Some(raw) = value else { continue };
        match parse_duration::parse(raw) {
            Ok(d) if !d.is_zero() => return d,
            Ok(_) => {
                tracing::warn!(source, value = %raw, "Ignoring zero poll interval");
            }
            Err(e) => {
                tracing::warn!(source, value = %raw, error = %e, "Ignoring unparsable poll interval");
            }
        }
    }
    DEFAULT_POLL_INTERVAL
}
