//! Writing fetched content (or failure markers) to disk.
//!
//! The orchestrator never touches the filesystem itself; it goes through a
//! [`PersistenceStrategy`]. [`DiskPersistence`] is the default: it mirrors
//! every URL to `home/<url_to_relative_path(url)>`.
//!
//! On success the body is streamed to the destination in bounded chunks,
//! replacing whatever was there. On failure a zero-length file is written, so
//! "attempted and failed" can be told apart from "never attempted".

use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

use super::DownloadError;
use super::constants::DEFAULT_CHUNK_SIZE;
use super::sanitize::url_to_relative_path;

/// Response body as handed to [`PersistenceStrategy::on_success`].
pub type ByteStream = BoxStream<'static, Result<Bytes, DownloadError>>;

/// Storage side of an orchestration.
///
/// Implementations must keep every side effect below their own root
/// directory and must tolerate sibling tasks creating the same directories
/// concurrently.
#[async_trait]
pub trait PersistenceStrategy: Send + Sync + Debug {
    /// Computes the destination for `url`. Called once per item, before any
    /// network attempt.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] if no path can be derived.
    fn resolve_path(&self, url: &str) -> Result<PathBuf, DownloadError>;

    /// Whether an existing destination short-circuits the fetch.
    fn skip_cached(&self) -> bool;

    /// Whether content already exists at `path`.
    async fn is_cached(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .is_ok_and(|meta| meta.is_file())
    }

    /// Streams `body` to `path`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns the stream's own error if the body fails mid-transfer (the
    /// partial file is removed), or [`DownloadError::Io`] if storage fails.
    async fn on_success(&self, body: ByteStream, path: &Path) -> Result<u64, DownloadError>;

    /// Leaves a zero-length marker at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] if storage fails.
    async fn on_failure(&self, path: &Path) -> Result<(), DownloadError>;
}

/// Default strategy: mirror URLs below a home directory.
#[derive(Debug, Clone)]
pub struct DiskPersistence {
    home: PathBuf,
    chunk_size: usize,
    skip_cached: bool,
}

impl Default for DiskPersistence {
    fn default() -> Self {
        Self::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

impl DiskPersistence {
    /// Creates a strategy rooted at `home` with the default chunk size and
    /// caching disabled.
    #[must_use]
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            skip_cached: false,
        }
    }

    /// Sets the largest number of bytes written per disk write. Zero is
    /// treated as one.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Enables or disables skipping items whose destination already exists.
    #[must_use]
    pub fn with_skip_cached(mut self, skip_cached: bool) -> Self {
        self.skip_cached = skip_cached;
        self
    }

    /// Root directory for all written files.
    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Bytes per disk write.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

#[async_trait]
impl PersistenceStrategy for DiskPersistence {
    fn resolve_path(&self, url: &str) -> Result<PathBuf, DownloadError> {
        Ok(self.home.join(url_to_relative_path(url)?))
    }

    fn skip_cached(&self) -> bool {
        self.skip_cached
    }

    #[instrument(skip(self, body), fields(path = %path.display()))]
    async fn on_success(&self, body: ByteStream, path: &Path) -> Result<u64, DownloadError> {
        make_dirs(path).await?;

        let mut file = File::create(path)
            .await
            .map_err(|e| DownloadError::io(path, e))?;

        let result = stream_to_file(&mut file, body, path, self.chunk_size).await;
        if result.is_err() {
            debug!("cleaning up partial file after error");
            drop(file);
            let _ = tokio::fs::remove_file(path).await;
        }
        let bytes = result?;

        debug!(bytes, "content written");
        Ok(bytes)
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn on_failure(&self, path: &Path) -> Result<(), DownloadError> {
        make_dirs(path).await?;
        File::create(path)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        debug!("failure marker written");
        Ok(())
    }
}

/// Streams the body to `file` in writes of at most `chunk_size` bytes.
async fn stream_to_file(
    file: &mut File,
    mut body: ByteStream,
    path: &Path,
    chunk_size: usize,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::with_capacity(chunk_size, file);
    let mut bytes_written: u64 = 0;

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        for piece in chunk.chunks(chunk_size) {
            writer
                .write_all(piece)
                .await
                .map_err(|e| DownloadError::io(path, e))?;
            bytes_written += piece.len() as u64;
        }
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(path, e))?;

    Ok(bytes_written)
}

/// Creates the parent directories of `file_path`.
///
/// Safe to race: a directory that appears between the check and the create
/// counts as success. Any other failure is returned.
///
/// # Errors
///
/// Returns [`DownloadError::Io`] when a directory cannot be created.
pub async fn make_dirs(file_path: &Path) -> Result<(), DownloadError> {
    let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };

    match tokio::fs::create_dir_all(parent).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists && parent.is_dir() => Ok(()),
        Err(e) => Err(DownloadError::io(parent, e)),
    }
}
