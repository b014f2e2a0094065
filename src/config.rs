//! Top-level sync engine configuration.
//!
//! Configuration is stored in `.kanban-sync/config.yaml` and includes:
//! - The pending-mutation window and expiry sweep interval
//! - Rank allocation limits
//! - REST endpoint and API token
//! - The local client identity

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use jiff::SignedDuration;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Directory holding the config file, relative to the working directory.
pub const CONFIG_DIR: &str = ".kanban-sync";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How long an optimistic change is trusted over competing signals (default: 3000)
    #[serde(default = "default_pending_window_ms")]
    pub pending_window_ms: u64,

    /// How often expired pending markers are swept (default: 250)
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Rank allocation settings
    #[serde(default)]
    pub rank: RankConfig,

    /// REST endpoint settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Identity of this client on the realtime channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

fn default_pending_window_ms() -> u64 {
    3000
}

fn default_sweep_interval_ms() -> u64 {
    250
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pending_window_ms: default_pending_window_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            rank: RankConfig::default(),
            api: ApiConfig::default(),
            client_id: None,
        }
    }
}

/// Rank allocation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankConfig {
    /// Longest rank generated by midpoint insertion before renumbering (default: 16)
    #[serde(default = "default_rank_max_len")]
    pub max_len: usize,

    /// Digits per rank when a column is renumbered (default: 4)
    #[serde(default = "default_renumber_width")]
    pub renumber_width: usize,
}

fn default_rank_max_len() -> usize {
    16
}

fn default_renumber_width() -> usize {
    4
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            max_len: default_rank_max_len(),
            renumber_width: default_renumber_width(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

fn default_api_timeout() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            timeout_secs: default_api_timeout(),
        }
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl SyncConfig {
    /// Get the default path to the config file
    pub fn config_path() -> PathBuf {
        PathBuf::from(CONFIG_DIR).join("config.yaml")
    }

    /// Load configuration from the default path, or return defaults if not found
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, or return defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(SyncConfig::default());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            SyncError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config at {}: {}", path.display(), e),
            ))
        })?;
        let config: SyncConfig = serde_yaml_ng::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| {
                SyncError::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create directory for config at {}: {}",
                        parent.display(),
                        e
                    ),
                ))
            })?;
        }

        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).map_err(|e| {
            SyncError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to write config at {}: {}", path.display(), e),
            ))
        })?;

        // Set restrictive permissions on Unix (owner read/write only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(path, permissions)?;
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.pending_window_ms == 0 {
            return Err(SyncError::Config(
                "pending_window_ms must be greater than zero".to_string(),
            ));
        }
        if self.rank.max_len == 0 || self.rank.renumber_width == 0 {
            return Err(SyncError::Config(
                "rank.max_len and rank.renumber_width must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The pending-mutation window as a duration
    pub fn pending_window(&self) -> SignedDuration {
        SignedDuration::from_millis(self.pending_window_ms as i64)
    }

    /// The expiry sweep interval
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    /// Get the API token from environment variable or config
    pub fn api_token(&self) -> Option<String> {
        if let Ok(token) = env::var("KANBAN_SYNC_API_TOKEN")
            && !token.is_empty()
        {
            return Some(token);
        }
        self.api.token.clone()
    }

    /// Get the API base URL from environment variable or config
    pub fn api_base_url(&self) -> Option<String> {
        if let Ok(url) = env::var("KANBAN_SYNC_API_URL")
            && !url.is_empty()
        {
            return Some(url);
        }
        self.api.base_url.clone()
    }

    /// Get the API request timeout
    pub fn api_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.api.timeout_secs)
    }

    /// The configured client id, or a fresh random one
    pub fn client_id_or_random(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}
