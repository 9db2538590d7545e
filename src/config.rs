//! Configuration system for folo.
//!
//! Provides layered configuration from multiple sources:
//!
//! 1. **Compiled defaults** - Sensible defaults built into the binary
//! 2. **User config file** - `~/.config/folo/config.toml`
//! 3. **Environment variables** - `FOLO_*` prefix
//! 4. **CLI arguments** - Highest priority, always wins
//!
//! The `[session]` section carries pre-established credentials (cookies)
//! produced by an external login flow; folo only consumes them.
//!
//! # Example Configuration File
//!
//! ```toml
//! [session]
//! cookies = { DedeUserID = "12345", bili_jct = "abcdef", SESSDATA = "..." }
//!
//! [pacing]
//! enabled = true
//! min_delay_ms = 1000
//! max_delay_ms = 2000
//! max_retries = 3
//! base_backoff_ms = 1000
//!
//! [sync]
//! page_size = 50
//! ```

use crate::error::{FoloError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cookie key carrying the numeric account id of the logged-in user.
pub const COOKIE_USER_ID: &str = "DedeUserID";
/// Cookie key carrying the CSRF token required by mutation endpoints.
pub const COOKIE_CSRF: &str = "bili_jct";

/// Main configuration structure for folo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote API endpoints and request headers.
    pub api: ApiConfig,
    /// Session credentials consumed by the transport layer.
    pub session: SessionConfig,
    /// Request pacing and retry policy.
    pub pacing: PacingConfig,
    /// Batch synchronization behavior.
    pub sync: SyncConfig,
    /// Local data locations.
    pub paths: PathsConfig,
}

/// Remote API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the remote API.
    pub base_url: String,

    /// User-Agent header sent with every request.
    pub user_agent: String,

    /// Referer header sent with every request.
    pub referer: String,
}

/// Session credentials (cookies) supplied by an external login flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cookie name → value map.
    pub cookies: BTreeMap<String, String>,
}

/// Request pacing and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// When false, all pacing waits are skipped and requests fire
    /// back-to-back with no retries.
    pub enabled: bool,

    /// Minimum humanization delay and inter-request interval, in ms.
    pub min_delay_ms: u64,

    /// Maximum humanization delay, in ms.
    pub max_delay_ms: u64,

    /// Retry budget per logical operation.
    pub max_retries: u32,

    /// Base for exponential backoff, in ms.
    pub base_backoff_ms: u64,
}

/// Batch synchronization behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Page size for following-list fetches (the remote caps this at 50).
    pub page_size: u32,

    /// Simulate mutations instead of calling the remote.
    pub test_mode: bool,

    /// Upper bound on simulated operations per batch in test mode.
    pub max_test_operations: usize,
}

/// Local data locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding the snapshot file, backups, and search history.
    /// Environment variable: `FOLO_DATA_DIR`
    pub data_dir: Option<PathBuf>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.bilibili.com".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            referer: "https://www.bilibili.com/".to_string(),
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_delay_ms: 1000,
            max_delay_ms: 2000,
            max_retries: 3,
            base_backoff_ms: 1000,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            test_mode: false,
            max_test_operations: 5,
        }
    }
}

impl PacingConfig {
    /// Minimum humanization delay.
    #[must_use]
    pub const fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    /// Maximum humanization delay.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Exponential backoff base.
    #[must_use]
    pub const fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }
}

impl SessionConfig {
    /// Look up a cookie value.
    #[must_use]
    pub fn cookie(&self, key: &str) -> Option<&str> {
        self.cookies.get(key).map(String::as_str)
    }

    /// The logged-in user's account id, required for fetches.
    pub fn user_id(&self) -> Result<&str> {
        self.cookie(COOKIE_USER_ID)
            .filter(|v| !v.is_empty())
            .ok_or(FoloError::MissingCredential {
                key: COOKIE_USER_ID,
            })
    }

    /// CSRF token, required for follow/unfollow mutations.
    pub fn csrf(&self) -> Result<&str> {
        self.cookie(COOKIE_CSRF)
            .filter(|v| !v.is_empty())
            .ok_or(FoloError::MissingCredential { key: COOKIE_CSRF })
    }

    /// Render the cookie map as a `Cookie` header value.
    #[must_use]
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. User config file (~/.config/folo/config.toml)
    /// 3. Compiled defaults
    #[must_use]
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config = user_config;
        }

        config.apply_env_overrides();

        debug!("Configuration loaded: {:?}", config.redacted());
        config
    }

    /// Load configuration from a specific file, failing loudly.
    ///
    /// Unlike [`Config::load`], a missing or malformed file here is a
    /// `ConfigError`, used when the user passed `--config` explicitly.
    pub fn load_required(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FoloError::config(path, format!("cannot read: {e}")))?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| FoloError::config(path, format!("cannot parse: {e}")))?;
        config.apply_env_overrides();
        info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    /// Load configuration from a specific file, tolerating absence.
    pub fn load_from_file(path: &PathBuf) -> Option<Self> {
        if !path.exists() {
            debug!("Config file not found: {}", path.display());
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    info!("Loaded config from: {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Load the user configuration file from the standard location.
    fn load_user_config() -> Option<Self> {
        let config_path = Self::user_config_path()?;
        Self::load_from_file(&config_path)
    }

    /// Get the path to the user configuration file.
    #[must_use]
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("folo").join("config.toml"))
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("FOLO_DATA_DIR") {
            self.paths.data_dir = Some(PathBuf::from(dir));
        }
        if let Ok(base) = std::env::var("FOLO_BASE_URL") {
            self.api.base_url = base;
        }
        if let Ok(size) = std::env::var("FOLO_PAGE_SIZE") {
            if let Ok(n) = size.parse() {
                self.sync.page_size = n;
            }
        }
        if std::env::var("FOLO_NO_PACING").is_ok() {
            self.pacing.enabled = false;
        }
        if std::env::var("FOLO_TEST_MODE").is_ok() {
            self.sync.test_mode = true;
        }
    }

    /// Get the data directory, using defaults if not configured.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.paths
            .data_dir
            .clone()
            .unwrap_or_else(crate::default_data_dir)
    }

    /// Save the current configuration to the user config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined,
    /// the parent directory cannot be created, or the file cannot be written.
    pub fn save(&self) -> std::io::Result<()> {
        let config_path = Self::user_config_path().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine config directory",
            )
        })?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        std::fs::write(&config_path, content)?;
        info!("Saved config to: {}", config_path.display());
        Ok(())
    }

    /// Generate a default configuration file content.
    #[must_use]
    pub fn default_config_content() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    /// A copy safe for debug logging: cookie values are masked.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for value in copy.session.cookies.values_mut() {
            *value = "***".to_string();
        }
        copy
    }
}
