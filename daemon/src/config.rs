//! Daemon configuration with TOML file support.

use std::path::{Path, PathBuf};
use std::time::Duration;

use accord_utils::LogFormat;
use accord_workflow::{RetryPolicy, DEFAULT_EVENT_CAPACITY};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Directory holding the LMDB environment.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Maximum size of the LMDB memory map, in MiB.
    #[serde(default = "default_map_size_mb")]
    pub map_size_mb: u64,

    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,

    #[serde(default = "default_rpc_bind")]
    pub rpc_bind: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Address of a remote rights registry. When unset, rights live in this
    /// daemon's own ledger.
    #[serde(default)]
    pub rights_registry_url: Option<String>,

    /// Timeout for calls to the remote rights registry.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Request events buffered per `/events` subscriber before it lags.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_data_dir() -> PathBuf {
    PathBuf::from("./accord_data")
}

fn default_map_size_mb() -> u64 {
    1024
}

fn default_rpc_port() -> u16 {
    7077
}

fn default_rpc_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rpc_timeout_ms() -> u64 {
    5000
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

// ── Impl ───────────────────────────────────────────────────────────────

impl DaemonConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.map_size_mb == 0 {
            return Err(ConfigError::Invalid("map_size_mb must be positive".into()));
        }
        if self.rpc_timeout_ms == 0 {
            return Err(ConfigError::Invalid("rpc_timeout_ms must be positive".into()));
        }
        if self.retry_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry_max_attempts must be at least 1".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be positive".into()));
        }
        if matches!(&self.rights_registry_url, Some(url) if url.trim().is_empty()) {
            return Err(ConfigError::Invalid("rights_registry_url is empty".into()));
        }
        Ok(())
    }

    pub fn map_size_bytes(&self) -> usize {
        usize::try_from(self.map_size_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            map_size_mb: default_map_size_mb(),
            rpc_port: default_rpc_port(),
            rpc_bind: default_rpc_bind(),
            log_format: LogFormat::default(),
            log_level: default_log_level(),
            rights_registry_url: None,
            rpc_timeout_ms: default_rpc_timeout_ms(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}
