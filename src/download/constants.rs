//! Constants for the download module (timeouts, chunking, concurrency).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default per-attempt request timeout (60 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of bytes written to disk per chunk (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 65_536;

/// Default number of items allowed inside network I/O at once.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 100;

/// Status codes at or above this value fail the default validity check.
pub const ERROR_STATUS_THRESHOLD: u16 = 400;

/// Status code that is never retried by the reference policies.
pub const NOT_FOUND_STATUS: u16 = 404;
