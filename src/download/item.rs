//! The unit of work: one URL to fetch and persist.
//!
//! A [`FetchItem`] is created by the caller, moved into the orchestrator for
//! the whole of its run, and handed back once it reaches a terminal
//! [`ItemStatus`]. Only the orchestrator mutates it, so it needs no locking.

use std::fmt;
use std::path::{Path, PathBuf};

use super::retry::AttemptOutcome;

/// Where an item is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemStatus {
    /// Created, not yet looked at by the orchestrator.
    Init,
    /// A network attempt is about to be, or has been, made this cycle.
    Attempting,
    /// Content persisted successfully.
    Done,
    /// Gave up; a zero-length marker was written unless the request was malformed.
    Failed,
    /// Destination already existed and caching is enabled; nothing was fetched.
    CacheHit,
}

impl ItemStatus {
    /// Returns true for `Done`, `Failed` and `CacheHit`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::CacheHit)
    }

    /// Human-readable label used in status lines.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Init => "Initialized",
            Self::Attempting => "Download attempted",
            Self::Done => "File written",
            Self::Failed => "Download failed",
            Self::CacheHit => "Cache hit",
        }
    }

    pub(crate) fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Init, Self::Attempting | Self::CacheHit | Self::Failed)
                | (Self::Attempting, Self::Attempting | Self::Done | Self::Failed)
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why an item ended up [`ItemStatus::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The request could not be built (bad URL); the origin was never asked
    /// and no marker file exists.
    MalformedRequest,
    /// The policy refused to retry the outcome (e.g. 404).
    Rejected,
    /// Every allowed attempt failed.
    Exhausted,
}

/// Details recorded alongside a failed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Failure class.
    pub kind: FailureKind,
    /// Description of the last error.
    pub message: String,
    /// Outcome of the last network attempt, if one was made.
    pub last_outcome: Option<AttemptOutcome>,
}

/// One URL to fetch, plus everything the orchestrator learns about it.
///
/// `T` is caller-owned correlation data that is carried through untouched.
#[derive(Debug, Clone)]
pub struct FetchItem<T = ()> {
    url: String,
    destination: Option<PathBuf>,
    attempts: u32,
    status: ItemStatus,
    info: Option<T>,
    body: Option<Vec<u8>>,
    failure: Option<Failure>,
}

impl FetchItem<()> {
    /// Creates a GET item for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            destination: None,
            attempts: 0,
            status: ItemStatus::Init,
            info: None,
            body: None,
            failure: None,
        }
    }
}

impl From<&str> for FetchItem<()> {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for FetchItem<()> {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}

impl<T> FetchItem<T> {
    /// Attaches correlation data, replacing any previous value.
    #[must_use]
    pub fn with_info<U>(self, info: U) -> FetchItem<U> {
        FetchItem {
            url: self.url,
            destination: self.destination,
            attempts: self.attempts,
            status: self.status,
            info: Some(info),
            body: self.body,
            failure: self.failure,
        }
    }

    /// Attaches a request body; the item will be submitted with POST.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// The URL to fetch.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Where the content is (or would be) persisted, once resolved.
    #[must_use]
    pub fn destination_path(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    /// Number of network attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> ItemStatus {
        self.status
    }

    /// Caller correlation data.
    #[must_use]
    pub fn info(&self) -> Option<&T> {
        self.info.as_ref()
    }

    /// Consumes the item, returning the correlation data.
    #[must_use]
    pub fn into_info(self) -> Option<T> {
        self.info
    }

    /// Request body, present for POST submissions.
    #[must_use]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Failure details, present only when the status is `Failed`.
    #[must_use]
    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// HTTP verb the item will be submitted with.
    #[must_use]
    pub fn method(&self) -> &'static str {
        if self.body.is_some() { "POST" } else { "GET" }
    }

    /// Records the destination. Later calls are ignored so the path is fixed
    /// after the first resolution.
    pub(crate) fn assign_destination(&mut self, path: PathBuf) {
        if self.destination.is_none() {
            self.destination = Some(path);
        }
    }

    pub(crate) fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    pub(crate) fn transition(&mut self, next: ItemStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal transition {:?} -> {next:?}",
            self.status
        );
        self.status = next;
    }

    pub(crate) fn fail(&mut self, failure: Failure) {
        self.transition(ItemStatus::Failed);
        self.failure = Some(failure);
    }
}

impl<T> fmt::Display for FetchItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self
            .destination
            .as_deref()
            .map_or_else(|| "None".to_string(), |p| p.display().to_string());
        write!(
            f,
            "[URL: {}, File Path: {}, Attempts: {}, Status: {}]",
            self.url, path, self.attempts, self.status
        )
    }
}
