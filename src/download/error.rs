//! Error types for the download module.
//!
//! Two layers of errors exist:
//! - [`DownloadError`] describes what went wrong with a single attempt. These
//!   are absorbed into the item's terminal status and never abort a batch.
//! - [`EngineError`] describes failures outside any one item's control (the
//!   storage layer, a closed concurrency gate). These propagate to the caller.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while attempting to fetch a single item.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP response rejected by the retry policy's validity check.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error while persisting an item.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or cannot be fetched over HTTP.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Maps a reqwest error to [`DownloadError::Timeout`] or [`DownloadError::Network`].
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::timeout(url)
        } else {
            Self::network(url, source)
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Returns true for errors raised by the local filesystem.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

/// Errors that abort an orchestration rather than being absorbed into an item.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error("invalid concurrency value {value}: must be between {min} and {max}")]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
        /// Smallest accepted value.
        min: usize,
        /// Largest accepted value.
        max: usize,
    },

    /// The storage layer failed with something other than "already exists".
    #[error("storage error at {path}: {source}")]
    Storage {
        /// Path being created or written.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The supplied configuration was rejected.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,

    /// A spawned orchestration task panicked or was cancelled.
    #[error("download task failed: {0}")]
    TaskFailed(String),
}

impl From<DownloadError> for EngineError {
    fn from(error: DownloadError) -> Self {
        match error {
            DownloadError::Io { path, source } => Self::Storage { path, source },
            other => Self::TaskFailed(other.to_string()),
        }
    }
}
