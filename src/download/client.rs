//! HTTP client wrapper shared by all orchestration tasks.
//!
//! One [`HttpClient`] is built per [`Downloader`](super::Downloader) and cloned
//! into each task; clones share reqwest's connection pool. The client does not
//! judge responses: any status code is handed back so the retry policy can
//! decide what counts as success.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use tracing::{debug, instrument};

use super::constants::CONNECT_TIMEOUT_SECS;
use super::error::{DownloadError, EngineError};
use super::persistence::ByteStream;
use crate::user_agent;

/// HTTP client for fetching items.
///
/// This client is designed to be created once and reused for every item,
/// taking advantage of connection pooling.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a client with the default connect timeout and User-Agent.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. Use [`try_new`](Self::try_new) to handle that case.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::try_new().expect("failed to build HTTP client with static configuration")
    }

    /// Creates a client with the default connect timeout and User-Agent.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ClientBuild`] if reqwest cannot initialize
    /// (for example, no TLS backend is available).
    pub fn try_new() -> Result<Self, EngineError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .gzip(true)
            .user_agent(user_agent::default_fetch_user_agent())
            .build()
            .map_err(EngineError::ClientBuild)?;
        Ok(Self { client })
    }

    /// Wraps an already configured reqwest client.
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Sends one request: POST when `body` is present, GET otherwise.
    ///
    /// `timeout` bounds the whole attempt, including reading the body.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Timeout`] or [`DownloadError::Network`] when no
    /// response arrives, and [`DownloadError::InvalidUrl`] when reqwest cannot
    /// build the request. HTTP error statuses are *not* errors here.
    #[instrument(skip(self, body), fields(url = %url, post = body.is_some()))]
    pub async fn send(
        &self,
        url: &str,
        body: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<reqwest::Response, DownloadError> {
        let request = match body {
            Some(body) => self.client.post(url).body(body.to_vec()),
            None => self.client.get(url),
        };

        let response = request.timeout(timeout).send().await.map_err(|e| {
            if e.is_builder() {
                DownloadError::invalid_url(url)
            } else {
                DownloadError::from_reqwest(url, e)
            }
        })?;

        debug!(status = response.status().as_u16(), "response received");
        Ok(response)
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Turns a response body into the stream handed to persistence.
pub(crate) fn body_stream(response: reqwest::Response, url: &str) -> ByteStream {
    let url = url.to_string();
    response
        .bytes_stream()
        .map(move |chunk| chunk.map_err(|e| DownloadError::from_reqwest(url.clone(), e)))
        .boxed()
}
