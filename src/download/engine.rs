//! Per-item download orchestration with bounded concurrency.
//!
//! [`Downloader::run`] drives one [`FetchItem`] from `Init` to a terminal
//! status:
//!
//! ```text
//! Init ──(destination exists && skip_cached)──────────────▶ CacheHit
//!  │ └──(malformed URL)───────────────────────────────────▶ Failed (no marker)
//!  ▼
//! Attempting ◀──(retryable && attempts remain)──┐
//!  │  sleep(policy) → request → attempts += 1   │
//!  ├──(valid response, body persisted)──────────┼────────▶ Done
//!  └──(invalid response)────────────────────────┴────────▶ Failed (empty marker)
//! ```
//!
//! # Concurrency Model
//!
//! - A semaphore permit is acquired before the destination is resolved
//! - The permit is held until the item reaches a terminal status (RAII)
//! - Queued items wait on the semaphore without polling
//! - The HTTP client and its connection pool are shared by every item
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bulkfetch_core::download::{DiskPersistence, Downloader, FetchItem, Lenient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = Downloader::new(
//!     4,
//!     Arc::new(Lenient::default()),
//!     Arc::new(DiskPersistence::new("./mirror")),
//! )?;
//! let item = downloader.run(FetchItem::new("https://httpbin.org/get")).await?;
//! println!("{item}");
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::client::{HttpClient, body_stream};
use super::constants::{MAX_CONCURRENCY, MIN_CONCURRENCY};
use super::item::{Failure, FailureKind, FetchItem, ItemStatus};
use super::persistence::PersistenceStrategy;
use super::retry::{AttemptOutcome, RetryDecision, RetryPolicy, should_retry};
use super::{DownloadError, EngineError};
use crate::config::FetchConfig;

/// Counters accumulated across every item a [`Downloader`] has run.
///
/// Uses atomic counters so concurrent tasks can update them without locking.
#[derive(Debug, Default)]
pub struct DownloadStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
    cached: AtomicUsize,
    retried: AtomicUsize,
}

impl DownloadStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of items that reached `Done`.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Returns the number of items that reached `Failed`.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Returns the number of items that reached `CacheHit`.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cached.load(Ordering::SeqCst)
    }

    /// Returns the number of retries scheduled.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Returns the number of items that reached any terminal status.
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed() + self.failed() + self.cached()
    }

    fn record_terminal(&self, status: ItemStatus) {
        let counter = match status {
            ItemStatus::Done => &self.completed,
            ItemStatus::Failed => &self.failed,
            ItemStatus::CacheHit => &self.cached,
            ItemStatus::Init | ItemStatus::Attempting => return,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }
}

/// Drives items through fetch, retry and persistence.
///
/// Cheap to clone: clones share the concurrency gate, policies, HTTP client
/// and statistics.
#[derive(Debug, Clone)]
pub struct Downloader {
    /// Semaphore for concurrency control.
    semaphore: Arc<Semaphore>,
    /// Configured concurrency limit.
    concurrency: usize,
    client: HttpClient,
    retry_policy: Arc<dyn RetryPolicy>,
    persistence: Arc<dyn PersistenceStrategy>,
    stats: Arc<DownloadStats>,
}

impl Downloader {
    /// Creates a downloader with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if `concurrency` is outside
    /// 1-100, or [`EngineError::ClientBuild`] if the HTTP client fails to build.
    #[instrument(level = "debug", skip(retry_policy, persistence))]
    pub fn new(
        concurrency: usize,
        retry_policy: Arc<dyn RetryPolicy>,
        persistence: Arc<dyn PersistenceStrategy>,
    ) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency {
                value: concurrency,
                min: MIN_CONCURRENCY,
                max: MAX_CONCURRENCY,
            });
        }

        debug!(
            concurrency,
            max_attempts = retry_policy.max_attempts(),
            timeout_ms = retry_policy.timeout().as_millis(),
            skip_cached = persistence.skip_cached(),
            "creating downloader"
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            client: HttpClient::try_new()?,
            retry_policy,
            persistence,
            stats: Arc::new(DownloadStats::new()),
        })
    }

    /// Creates a downloader from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] for invalid values, otherwise the same
    /// errors as [`new`](Self::new).
    pub fn from_config(config: &FetchConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Self::new(
            config.concurrency_limit,
            config.retry_policy(),
            Arc::new(config.persistence()),
        )
    }

    /// Replaces the HTTP client, e.g. to share a preconfigured reqwest client.
    #[must_use]
    pub fn with_client(mut self, client: HttpClient) -> Self {
        self.client = client;
        self
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the configured retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &dyn RetryPolicy {
        self.retry_policy.as_ref()
    }

    /// Returns the configured persistence strategy.
    #[must_use]
    pub fn persistence(&self) -> &dyn PersistenceStrategy {
        self.persistence.as_ref()
    }

    /// Returns counters for every item run so far.
    #[must_use]
    pub fn stats(&self) -> &DownloadStats {
        &self.stats
    }

    /// Runs one item to a terminal status.
    ///
    /// Per-item failures (bad URL, HTTP errors, timeouts) are recorded on the
    /// returned item, never returned as errors.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] if the filesystem fails for a reason
    /// other than a directory already existing, and
    /// [`EngineError::SemaphoreClosed`] if the gate was closed.
    #[instrument(skip(self, item), fields(url = %item.url()))]
    pub async fn run<T>(&self, mut item: FetchItem<T>) -> Result<FetchItem<T>, EngineError> {
        // Permit is dropped when this function returns (RAII)
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| EngineError::SemaphoreClosed)?;

        let path = match self.persistence.resolve_path(item.url()) {
            Ok(path) => path,
            Err(error) => {
                warn!(error = %error, "malformed request");
                item.fail(Failure {
                    kind: FailureKind::MalformedRequest,
                    message: error.to_string(),
                    last_outcome: None,
                });
                return Ok(self.finish(item));
            }
        };
        item.assign_destination(path.clone());

        if self.persistence.skip_cached() && self.persistence.is_cached(&path).await {
            item.transition(ItemStatus::CacheHit);
            return Ok(self.finish(item));
        }

        item.transition(ItemStatus::Attempting);
        self.retry_loop(&mut item, &path).await?;
        Ok(self.finish(item))
    }

    /// Attempts the item until it succeeds or the policy gives up.
    async fn retry_loop<T>(&self, item: &mut FetchItem<T>, path: &Path) -> Result<(), EngineError> {
        let policy = self.retry_policy.as_ref();
        let mut last_outcome = None;

        loop {
            let Some(delay) = policy.sleep_duration(item.attempts()) else {
                debug!(attempts = item.attempts(), "policy returned no further delay");
                self.persistence.on_failure(path).await?;
                item.fail(Failure {
                    kind: FailureKind::Exhausted,
                    message: format!("stopped after {} attempts", item.attempts()),
                    last_outcome,
                });
                return Ok(());
            };

            if item.attempts() > 0 {
                info!("{item}");
            }
            debug!(delay_ms = delay.as_millis(), "sleeping between requests");
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let (url, body) = (item.url(), item.body());
            let result = self.attempt(url, body, path).await;
            // A request reqwest refused to build never reached the network.
            if !matches!(result, Err(DownloadError::InvalidUrl { .. })) {
                item.record_attempt();
            }
            let error = match result {
                Ok(bytes) => {
                    debug!(bytes, attempts = item.attempts(), "content persisted");
                    item.transition(ItemStatus::Done);
                    return Ok(());
                }
                Err(error) if error.is_storage() => return Err(error.into()),
                Err(error) => error,
            };

            let Some(outcome) = AttemptOutcome::from_error(&error) else {
                warn!(error = %error, "request could not be built");
                item.fail(Failure {
                    kind: FailureKind::MalformedRequest,
                    message: error.to_string(),
                    last_outcome: None,
                });
                return Ok(());
            };

            last_outcome = Some(outcome);
            match should_retry(policy, outcome, item.attempts()) {
                RetryDecision::Retry => {
                    debug!(attempts = item.attempts(), error = %error, "will retry");
                    self.stats.increment_retried();
                    item.transition(ItemStatus::Attempting);
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(%reason, "not retrying");
                    self.persistence.on_failure(path).await?;
                    let kind = if policy.is_retryable(outcome) {
                        FailureKind::Exhausted
                    } else {
                        FailureKind::Rejected
                    };
                    item.fail(Failure {
                        kind,
                        message: format!("{error} ({reason})"),
                        last_outcome: Some(outcome),
                    });
                    return Ok(());
                }
            }
        }
    }

    /// One network attempt: request, validate, persist.
    async fn attempt(
        &self,
        url: &str,
        body: Option<&[u8]>,
        path: &Path,
    ) -> Result<u64, DownloadError> {
        let response = self
            .client
            .send(url, body, self.retry_policy.timeout())
            .await?;

        let status = response.status().as_u16();
        if !self
            .retry_policy
            .is_valid(AttemptOutcome::Status(status))
        {
            return Err(DownloadError::http_status(url, status));
        }

        self.persistence
            .on_success(body_stream(response, url), path)
            .await
    }

    fn finish<T>(&self, item: FetchItem<T>) -> FetchItem<T> {
        self.stats.record_terminal(item.status());
        match item.status() {
            ItemStatus::Failed => warn!(
                failure = ?item.failure().map(|f| f.kind),
                "{item}"
            ),
            _ => info!("{item}"),
        }
        item
    }
}
