//! Bounded-concurrency HTTP fetching with retry and disk persistence.
//!
//! Each URL becomes a [`FetchItem`] that a [`Downloader`] drives to a terminal
//! status. The downloader delegates the two policy decisions it cannot make
//! itself:
//!
//! - [`RetryPolicy`]: which responses count as success, which failures are
//!   worth repeating, and how long to wait before each attempt.
//! - [`PersistenceStrategy`]: where an item is stored and how content (or a
//!   failure marker) is written.
//!
//! # Features
//!
//! - Streaming writes in bounded chunks (memory use does not grow with body size)
//! - Deterministic, filesystem-safe paths derived from the URL alone
//! - Lenient and exponential back-off reference policies
//! - Optional skipping of already-mirrored items
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bulkfetch_core::download::{BackOff, DiskPersistence, Downloader, FetchItem, batch};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = Downloader::new(
//!     4,
//!     Arc::new(BackOff::default()),
//!     Arc::new(DiskPersistence::new("./mirror").with_skip_cached(true)),
//! )?;
//! let urls = ["https://httpbin.org/get", "https://httpbin.org/status/404"];
//! let items: Vec<FetchItem> = batch::swarm(&downloader, urls.map(FetchItem::new)).await?;
//! for item in &items {
//!     println!("{item}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod batch;
mod client;
pub mod constants;
mod engine;
mod error;
mod item;
mod persistence;
mod retry;
pub mod sanitize;

pub use batch::{each, one, swarm, swarm_results};
pub use client::HttpClient;
pub use engine::{DownloadStats, Downloader};
pub use error::{DownloadError, EngineError};
pub use item::{Failure, FailureKind, FetchItem, ItemStatus};
pub use persistence::{ByteStream, DiskPersistence, PersistenceStrategy, make_dirs};
pub use retry::{
    AttemptOutcome, BACKOFF_MAX_ATTEMPTS, BackOff, LENIENT_MAX_ATTEMPTS, Lenient, RequestPolicy,
    RetryDecision, RetryPolicy, should_retry,
};
pub use sanitize::{clean_filename, replace_char, url_to_relative_path};
