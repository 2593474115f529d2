//! Service configuration, loaded from a JSON file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::{
    FailMode, InMemoryRateLimiter, InProcessCounterStore, RateLimiter, SharedRateLimiter,
};
use crate::sandbox::ResourceLimits;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {message}")]
    Validation { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// SQLite database location.
    pub database_path: PathBuf,
    /// Directory result files are written to.
    pub results_dir: PathBuf,
    /// Worker poll interval in seconds.
    pub poll_interval_secs: u64,
    /// Cap on source document size in megabytes.
    pub max_source_size_mb: u64,
    pub sandbox: SandboxConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    pub memory_limit_mb: u64,
    pub timeout_secs: u64,
    pub cpu_limit_secs: Option<u64>,
}

/// Which rate limiter implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackend {
    /// Per-process timestamp windows.
    Memory,
    /// Window counters in a shared store, for multi-process quotas.
    Counter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    pub backend: RateLimitBackend,
    /// What to do with requests when a shared counter backend is
    /// unreachable. Ignored by the in-memory limiter.
    pub fail_mode: FailMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: crate::db::default_database_path()
                .unwrap_or_else(|| PathBuf::from("docmill.db")),
            results_dir: PathBuf::from("results"),
            poll_interval_secs: 2,
            max_source_size_mb: 100,
            sandbox: SandboxConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: 512,
            timeout_secs: 120,
            cpu_limit_secs: None,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend: RateLimitBackend::Memory,
            fail_mode: FailMode::Open,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::load_from_str(&content)
    }

    pub fn load_from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Validation {
                message: "poll_interval_secs must be at least 1".to_string(),
            });
        }
        if self.max_source_size_mb == 0 {
            return Err(ConfigError::Validation {
                message: "max_source_size_mb must be at least 1".to_string(),
            });
        }
        if !(128..=4096).contains(&self.sandbox.memory_limit_mb) {
            return Err(ConfigError::Validation {
                message: format!(
                    "sandbox.memory_limit_mb must be between 128 and 4096, got {}",
                    self.sandbox.memory_limit_mb
                ),
            });
        }
        if !(1..=600).contains(&self.sandbox.timeout_secs) {
            return Err(ConfigError::Validation {
                message: format!(
                    "sandbox.timeout_secs must be between 1 and 600, got {}",
                    self.sandbox.timeout_secs
                ),
            });
        }
        if let Some(cpu) = self.sandbox.cpu_limit_secs {
            if cpu == 0 {
                return Err(ConfigError::Validation {
                    message: "sandbox.cpu_limit_secs must be at least 1 when set".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn max_source_bytes(&self) -> u64 {
        self.max_source_size_mb * 1024 * 1024
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Builds the rate limiter this configuration asks for.
    ///
    /// The counter backend currently runs over the in-process store;
    /// swapping in a networked [`CounterBackend`](crate::auth::CounterBackend)
    /// is a composition change here, not a config format change.
    pub fn rate_limiter(&self) -> std::sync::Arc<dyn RateLimiter> {
        match self.rate_limit.backend {
            RateLimitBackend::Memory => std::sync::Arc::new(InMemoryRateLimiter::new()),
            RateLimitBackend::Counter => std::sync::Arc::new(SharedRateLimiter::new(
                InProcessCounterStore::new(),
                self.rate_limit.fail_mode,
            )),
        }
    }

    pub fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            memory_limit_mb: self.sandbox.memory_limit_mb,
            timeout: Duration::from_secs(self.sandbox.timeout_secs),
            cpu_limit_secs: self.sandbox.cpu_limit_secs,
        }
    }
}
