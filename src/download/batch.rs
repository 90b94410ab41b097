//! Fan-out helpers that run many items through one [`Downloader`].
//!
//! - [`one`] runs a single item.
//! - [`swarm`] spawns a task per item and returns every terminal item, in
//!   input order, once all of them have settled.
//! - [`swarm_results`] does the same but keeps a result per item, so one
//!   fatal error does not hide the items that finished.
//! - [`each`] yields terminal items as they complete, tagging each with the
//!   input element it came from.
//!
//! Per-item failures live on the returned items. Only [`EngineError`]s (a
//! fatal storage failure, a panicked task) surface as `Err`, and never before
//! sibling items have finished.

use futures_util::StreamExt;
use futures_util::stream::{BoxStream, FuturesUnordered};
use tracing::{debug, info, instrument, warn};

use super::EngineError;
use super::engine::Downloader;
use super::item::FetchItem;

/// Runs a single URL or item to a terminal status.
///
/// # Errors
///
/// Returns the same fatal errors as [`Downloader::run`].
pub async fn one<T>(
    downloader: &Downloader,
    item: impl Into<FetchItem<T>>,
) -> Result<FetchItem<T>, EngineError> {
    downloader.run(item.into()).await
}

/// Runs every item concurrently and collects the terminal items.
///
/// Each item gets its own tokio task; the downloader's gate bounds how many
/// are inside network I/O at once. Results keep the input order.
///
/// # Errors
///
/// Returns the first fatal error (in input order) after every task has
/// finished. A panicked task is reported as [`EngineError::TaskFailed`].
/// Items that did finish are dropped along with the error; use
/// [`swarm_results`] to keep them.
pub async fn swarm<I, T>(downloader: &Downloader, items: I) -> Result<Vec<FetchItem<T>>, EngineError>
where
    I: IntoIterator,
    I::Item: Into<FetchItem<T>>,
    T: Send + 'static,
{
    let results = swarm_results(downloader, items).await;
    let finished = results.into_iter().collect::<Result<Vec<_>, _>>()?;

    let stats = downloader.stats();
    info!(
        completed = stats.completed(),
        failed = stats.failed(),
        cached = stats.cached(),
        retried = stats.retried(),
        "swarm complete"
    );
    Ok(finished)
}

/// Like [`swarm`], but returns one result per input, in input order.
///
/// A fatal error on one item leaves the other items' results intact.
#[instrument(skip(downloader, items), fields(concurrency = downloader.concurrency()))]
pub async fn swarm_results<I, T>(
    downloader: &Downloader,
    items: I,
) -> Vec<Result<FetchItem<T>, EngineError>>
where
    I: IntoIterator,
    I::Item: Into<FetchItem<T>>,
    T: Send + 'static,
{
    let mut handles = Vec::new();
    for item in items {
        let downloader = downloader.clone();
        let item = item.into();
        handles.push(tokio::spawn(async move { downloader.run(item).await }));
    }

    debug!(task_count = handles.len(), "waiting for items to settle");

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        let result = match handle.await {
            Ok(Err(error)) => {
                warn!(error = %error, "fatal error while running item");
                Err(error)
            }
            Ok(result) => result,
            Err(join_error) => {
                warn!(error = %join_error, "download task panicked");
                Err(EngineError::TaskFailed(join_error.to_string()))
            }
        };
        results.push(result);
    }
    results
}

/// Streams terminal items in completion order.
///
/// `url_map` derives the request from each input element, either a plain URL
/// or a [`FetchItem`] carrying a POST body. The element itself is attached to
/// the item as `info`, so results can be matched back to inputs whatever
/// order they finish in. The stream is lazy: nothing is fetched
/// until it is polled, and all items are then driven concurrently from the
/// polling task.
///
/// ```no_run
/// use futures_util::StreamExt;
/// use bulkfetch_core::download::{Downloader, batch};
///
/// # async fn example(downloader: Downloader) -> Result<(), Box<dyn std::error::Error>> {
/// let ids = vec![1_u32, 2, 3];
/// let mut results = batch::each(&downloader, ids, |id| format!("https://httpbin.org/anything/{id}"));
/// while let Some(item) = results.next().await {
///     let item = item?;
///     println!("{:?} -> {}", item.info(), item.status());
/// }
/// # Ok(())
/// # }
/// ```
pub fn each<I, F, R>(
    downloader: &Downloader,
    inputs: I,
    mut url_map: F,
) -> BoxStream<'static, Result<FetchItem<I::Item>, EngineError>>
where
    I: IntoIterator,
    I::Item: Send + 'static,
    F: FnMut(&I::Item) -> R,
    R: Into<FetchItem>,
{
    let pending = FuturesUnordered::new();
    for input in inputs {
        let item: FetchItem = url_map(&input).into();
        let item = item.with_info(input);
        let downloader = downloader.clone();
        pending.push(async move { downloader.run(item).await });
    }
    pending.boxed()
}
