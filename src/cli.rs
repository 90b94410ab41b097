//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use bulkfetch_core::{FetchConfig, PolicyKind};
use clap::{Parser, ValueEnum};

/// Mirror a batch of URLs to disk with bounded concurrency.
///
/// Each URL is stored below the home directory at a path derived from the
/// URL itself. Failed items leave a zero-length file behind.
#[derive(Parser, Debug)]
#[command(name = "bulkfetch")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to fetch (reads one per line from stdin when omitted)
    pub urls: Vec<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// JSON config file; flags given on the command line take precedence
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory that mirrored files are written below
    #[arg(short = 'o', long, value_name = "DIR")]
    pub home: Option<PathBuf>,

    /// Maximum items inside network I/O at once (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Maximum attempts per item (defaults to the policy's own limit)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(0..=100))]
    pub max_attempts: Option<u32>,

    /// Per-attempt timeout in seconds
    #[arg(short = 't', long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Bytes per disk write
    #[arg(long, value_name = "BYTES", value_parser = clap::value_parser!(u64).range(1..))]
    pub chunk_size: Option<u64>,

    /// Skip URLs whose destination file already exists
    #[arg(long)]
    pub skip_cached: bool,

    /// Retry policy
    #[arg(short = 'p', long, value_enum)]
    pub policy: Option<PolicyArg>,
}

/// Retry policy names accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    /// 0.25s then 60s between attempts
    Lenient,
    /// Exponential back-off capped at 60s
    Backoff,
    /// Single attempt, no retries
    Request,
}

impl From<PolicyArg> for PolicyKind {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::Lenient => Self::Lenient,
            PolicyArg::Backoff => Self::Backoff,
            PolicyArg::Request => Self::Request,
        }
    }
}

impl Args {
    /// Overlays flags that were given onto `config`.
    pub fn apply_to(&self, config: &mut FetchConfig) {
        if let Some(home) = &self.home {
            config.home.clone_from(home);
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency_limit = usize::from(concurrency);
        }
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = Some(max_attempts);
        }
        if let Some(timeout) = self.timeout {
            config.timeout = Duration::from_secs(timeout);
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = usize::try_from(chunk_size).unwrap_or(usize::MAX);
        }
        if self.skip_cached {
            config.skip_cached = true;
        }
        if let Some(policy) = self.policy {
            config.policy = policy.into();
        }
    }
}
