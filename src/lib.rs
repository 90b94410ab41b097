//! Bulkfetch Core Library
//!
//! This library retrieves batches of URLs over HTTP under a bounded
//! concurrency limit and mirrors each one to a deterministic path below a
//! home directory, retrying transient failures according to a pluggable
//! policy.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - per-item orchestration, retry policies, persistence and
//!   URL-to-path sanitizing
//! - [`config`] - the in-memory configuration a [`Downloader`] is built from

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod download;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use config::{ConfigError, FetchConfig, PolicyKind};
pub use download::{
    BackOff, DiskPersistence, DownloadError, DownloadStats, Downloader, EngineError, FetchItem,
    ItemStatus, Lenient, PersistenceStrategy, RequestPolicy, RetryPolicy, url_to_relative_path,
};
