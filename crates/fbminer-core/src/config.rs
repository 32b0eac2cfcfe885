//! fbminer configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MinerError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MinerConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl MinerConfig {
    /// Load config from the default path (~/.fbminer/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MinerError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| MinerError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break the dispatcher at run time.
    pub fn validate(&self) -> Result<()> {
        if let Some(rate_limit) = &self.dispatch.rate_limit {
            rate_limit.validate()?;
        }
        Ok(())
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| MinerError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the fbminer home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".fbminer")
    }
}

/// Where the backend lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String { "http://localhost:8000".into() }
fn default_timeout_secs() -> u64 { 30 }

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

impl BackendConfig {
    /// Base URL without a trailing slash.
    pub fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// Read-cache freshness windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Conversations and set messages.
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    /// Listings of message sets and groups.
    #[serde(default = "default_listing_ttl")]
    pub listing_ttl_secs: u64,
}

fn default_cache_ttl() -> u64 { 300 }
fn default_listing_ttl() -> u64 { 60 }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            listing_ttl_secs: default_listing_ttl(),
        }
    }
}

/// Bulk dispatch pacing and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Pause after every message send.
    #[serde(default = "default_message_delay")]
    pub message_delay_ms: u64,
    /// Pause after every finished set.
    #[serde(default = "default_set_delay")]
    pub set_delay_ms: u64,
    /// Conversations that may be mined per day.
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    /// Status written to the backend for mined customers.
    #[serde(default = "default_mined_status")]
    pub mined_status: String,
    /// Optional token bucket on top of the fixed delays.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

fn default_message_delay() -> u64 { 500 }
fn default_set_delay() -> u64 { 1000 }
fn default_daily_limit() -> u32 { 100 }
fn default_mined_status() -> String { "mined".into() }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            message_delay_ms: default_message_delay(),
            set_delay_ms: default_set_delay(),
            daily_limit: default_daily_limit(),
            mined_status: default_mined_status(),
            rate_limit: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Tokens refilled per second.
    pub per_second: f64,
    /// Bucket capacity.
    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_burst() -> u32 { 1 }

impl RateLimitConfig {
    /// The refill rate must be a positive, finite number.
    pub fn validate(&self) -> Result<()> {
        if !self.per_second.is_finite() || self.per_second <= 0.0 {
            return Err(MinerError::Config(format!(
                "dispatch.rate_limit.per_second must be a positive number, got {}",
                self.per_second
            )));
        }
        Ok(())
    }
}

/// How new customer activity is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// Socket.IO push events.
    #[default]
    Push,
    /// Periodic re-fetch and diff.
    Poll,
}

/// Which timestamp is compared when diffing polled conversations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareBy {
    #[default]
    LastUserMessage,
    Updated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default)]
    pub mode: WatchMode,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub compare_by: CompareBy,
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
}

fn default_poll_interval() -> u64 { 10 }
fn default_socket_path() -> String { "/ws/socket.io/".into() }
fn default_reconnect_attempts() -> u32 { 5 }
fn default_reconnect_delay() -> u64 { 1000 }

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            mode: WatchMode::default(),
            poll_interval_secs: default_poll_interval(),
            compare_by: CompareBy::default(),
            socket_path: default_socket_path(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay(),
        }
    }
}

/// Client-side state file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String { "~/.fbminer/state.json".into() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}
