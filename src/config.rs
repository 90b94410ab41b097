//! In-memory configuration for a [`Downloader`](crate::Downloader).
//!
//! A [`FetchConfig`] is built once (from defaults, a JSON file, CLI flags, or
//! any combination) and turned into a downloader with
//! [`Downloader::from_config`](crate::Downloader::from_config). Nothing is
//! read from the environment.
//!
//! ```
//! use bulkfetch_core::{FetchConfig, PolicyKind};
//!
//! let config: FetchConfig =
//!     serde_json::from_str(r#"{ "concurrency_limit": 8, "policy": "backoff", "timeout": 15 }"#)
//!         .unwrap();
//! assert_eq!(config.concurrency_limit, 8);
//! assert_eq!(config.policy, PolicyKind::Backoff);
//! assert!(config.validate().is_ok());
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::download::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT, MAX_CONCURRENCY, MIN_CONCURRENCY,
};
use crate::download::{
    BACKOFF_MAX_ATTEMPTS, BackOff, DiskPersistence, LENIENT_MAX_ATTEMPTS, Lenient, RequestPolicy,
    RetryPolicy,
};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Concurrency limit outside the accepted range.
    #[error(
        "invalid config value for `concurrency_limit`: {0}. Expected range: {MIN_CONCURRENCY}..={MAX_CONCURRENCY}"
    )]
    Concurrency(usize),

    /// Chunk size of zero bytes.
    #[error("invalid config value for `chunk_size`: must be at least 1 byte")]
    ChunkSize,

    /// Timeout of zero.
    #[error("invalid config value for `timeout`: must be at least 1 second")]
    Timeout,

    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for [`FetchConfig`].
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// Which reference retry policy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// 0.25s, then 60s between attempts; 5 attempts.
    #[default]
    Lenient,
    /// Exponential back-off capped at 60s; 10 attempts.
    Backoff,
    /// One attempt, nothing retried.
    Request,
}

impl PolicyKind {
    /// Attempt limit used when the config does not set one.
    #[must_use]
    pub fn default_max_attempts(self) -> u32 {
        match self {
            Self::Lenient => LENIENT_MAX_ATTEMPTS,
            Self::Backoff => BACKOFF_MAX_ATTEMPTS,
            Self::Request => 0,
        }
    }
}

/// Recognized options for a batch fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// Bytes per disk write.
    pub chunk_size: usize,
    /// Base directory for all written files.
    pub home: PathBuf,
    /// Skip items whose destination already exists.
    pub skip_cached: bool,
    /// Items allowed inside network I/O at once.
    pub concurrency_limit: usize,
    /// Bound on each network attempt (whole seconds when serialized).
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Attempt limit; `None` uses the policy's default.
    pub max_attempts: Option<u32>,
    /// Retry policy selection.
    pub policy: PolicyKind,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            home: PathBuf::from("."),
            skip_cached: false,
            concurrency_limit: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT,
            max_attempts: None,
            policy: PolicyKind::default(),
        }
    }
}

impl FetchConfig {
    /// Loads a JSON config file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validates values against runtime constraints.
    ///
    /// # Errors
    ///
    /// Returns the first offending value as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.concurrency_limit) {
            return Err(ConfigError::Concurrency(self.concurrency_limit));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::ChunkSize);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Timeout);
        }
        Ok(())
    }

    /// Effective attempt limit.
    #[must_use]
    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts
            .unwrap_or_else(|| self.policy.default_max_attempts())
    }

    /// Builds the selected retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> Arc<dyn RetryPolicy> {
        let max_attempts = self.effective_max_attempts();
        match self.policy {
            PolicyKind::Lenient => {
                Arc::new(Lenient::with_max_attempts(max_attempts).with_timeout(self.timeout))
            }
            PolicyKind::Backoff => {
                Arc::new(BackOff::with_max_attempts(max_attempts).with_timeout(self.timeout))
            }
            PolicyKind::Request => Arc::new(RequestPolicy::default().with_timeout(self.timeout)),
        }
    }

    /// Builds the disk persistence strategy.
    #[must_use]
    pub fn persistence(&self) -> DiskPersistence {
        DiskPersistence::new(&self.home)
            .with_chunk_size(self.chunk_size)
            .with_skip_cached(self.skip_cached)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
