//! Application configuration.
//!
//! Loaded from a JSON5 file (comments and trailing commas allowed) with
//! serde defaults for every field, so an empty or missing file yields a
//! runnable local setup. Secrets can be supplied via environment variables
//! instead of the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::channels::whatsapp::WhatsAppConfig;

/// Environment variable overriding the WhatsApp access token.
pub const ENV_ACCESS_TOKEN: &str = "DUKABOT_WHATSAPP_TOKEN";
/// Environment variable overriding the webhook verify token.
pub const ENV_VERIFY_TOKEN: &str = "DUKABOT_VERIFY_TOKEN";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: json5::Error,
    },
}

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Webhook server bind address.
    pub host: String,
    /// Webhook server port.
    pub port: u16,
    /// Token the provider must echo during webhook verification.
    pub verify_token: String,
    /// Tenant webhook traffic is routed to.
    pub tenant_id: String,
    /// Path to the flow definitions file.
    pub flows_path: PathBuf,
    /// Directory for persisted session files. `None` keeps sessions
    /// in memory only.
    pub sessions_dir: Option<PathBuf>,
    /// Sessions untouched for this many hours are retired by the cleanup
    /// task.
    pub session_retention_hours: u64,
    /// Override for the generic apology message.
    pub fallback_message: Option<String>,
    /// WhatsApp Cloud API settings.
    pub whatsapp: WhatsAppConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            verify_token: String::new(),
            tenant_id: "default".to_string(),
            flows_path: PathBuf::from("flows.json5"),
            sessions_dir: None,
            session_retention_hours: 24,
            fallback_message: None,
            whatsapp: WhatsAppConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist. Parse errors are real errors: a present but
    /// broken config should stop startup, not silently revert to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default().with_env_overrides());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        let config: AppConfig = json5::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(config.with_env_overrides())
    }

    /// Default config file location: `{config_dir}/dukabot/config.json5`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dukabot")
            .join("config.json5")
    }

    /// Apply environment variable overrides for secrets.
    fn with_env_overrides(mut self) -> Self {
        if let Ok(token) = std::env::var(ENV_ACCESS_TOKEN) {
            self.whatsapp.access_token = token;
        }
        if let Ok(token) = std::env::var(ENV_VERIFY_TOKEN) {
            self.verify_token = token;
        }
        self
    }

    /// Warn about settings that will not work in production. Non-fatal;
    /// local runs with the logging gateway are a supported mode.
    pub fn warn_incomplete(&self) {
        if self.whatsapp.access_token.is_empty() {
            warn!("no WhatsApp access token configured; outbound sends will fail");
        }
        if self.verify_token.is_empty() {
            warn!("no webhook verify token configured; subscription handshake will fail");
        }
    }
}
