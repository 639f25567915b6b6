//! Configuration management for the sync client.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the document service
    pub sync_url: String,
    /// Signed-in user; absent means sync stays disabled
    pub user_id: Option<String>,
    /// Bearer token sent to the document service
    pub auth_token: Option<String>,
    /// Directory holding the local key-value files
    pub data_dir: PathBuf,
    pub sync_interval: Duration,
    pub app_version: String,
    pub http_timeout: Duration,
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let sync_url = lookup("STUDYHUB_SYNC_URL").ok_or(ConfigError::MissingSyncUrl)?;

        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let seconds = |name: &'static str, default: u64| -> Result<Duration, ConfigError> {
            match lookup(name) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs)
                    .ok_or(ConfigError::InvalidSeconds { name, value: raw }),
                None => Ok(Duration::from_secs(default)),
            }
        };

        Ok(Self {
            sync_url,
            user_id: non_empty("STUDYHUB_USER_ID"),
            auth_token: non_empty("STUDYHUB_AUTH_TOKEN"),
            data_dir: lookup("STUDYHUB_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./studyhub-data")),
            sync_interval: seconds("STUDYHUB_SYNC_INTERVAL_SECS", 300)?,
            app_version: lookup("STUDYHUB_APP_VERSION")
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            http_timeout: seconds("STUDYHUB_HTTP_TIMEOUT_SECS", 30)?,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("STUDYHUB_SYNC_URL environment variable is required")]
    MissingSyncUrl,

    #[error("Invalid {name} value: {value:?} (expected a positive number of seconds)")]
    InvalidSeconds { name: &'static str, value: String },
}
