//! Integration tests for the download orchestrator.
//!
//! These tests drive `Downloader` against a mock HTTP server and a temporary
//! home directory, covering the state machine, retry pacing, persistence
//! artifacts and the concurrency gate.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bulkfetch_core::download::{
    AttemptOutcome, BackOff, DiskPersistence, Downloader, EngineError, FailureKind, FetchItem,
    ItemStatus, RequestPolicy, RetryPolicy, batch, url_to_relative_path,
};
use futures_util::StreamExt;
use tempfile::TempDir;
use wiremock::matchers::{body_string, method, path};
use wiremock::{Mock, Respond, ResponseTemplate};

#[macro_use]
mod support;

// ==================== Helper Functions ====================

/// Retries like the reference policies but without pacing, so tests stay fast.
#[derive(Debug)]
struct ImmediatePolicy {
    max_attempts: u32,
    timeout: Duration,
}

impl ImmediatePolicy {
    fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            timeout: Duration::from_secs(5),
        }
    }

    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl RetryPolicy for ImmediatePolicy {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay_for(&self, _attempts: u32) -> Duration {
        Duration::ZERO
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn create_engine(
    concurrency: usize,
    policy: impl RetryPolicy + 'static,
    home: &TempDir,
) -> Result<Downloader, EngineError> {
    Downloader::new(
        concurrency,
        Arc::new(policy),
        Arc::new(DiskPersistence::new(home.path())),
    )
}

fn destination(home: &TempDir, url: &str) -> std::path::PathBuf {
    home.path()
        .join(url_to_relative_path(url).expect("test URL should be valid"))
}

// ==================== Success Path Tests ====================

#[tokio::test]
async fn test_success_writes_body_to_sanitized_path() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/drip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"*****"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let home = TempDir::new()?;
    let engine = create_engine(2, ImmediatePolicy::new(3), &home)?;
    let url = format!("{}/drip?duration=5&numbytes=5&code=200", mock_server.uri());

    let item = engine.run(FetchItem::new(url.as_str())).await?;

    assert_eq!(item.status(), ItemStatus::Done);
    assert_eq!(item.attempts(), 1);
    let written = destination(&home, &url);
    assert!(written.ends_with("drip_duration_5-numbytes_5-code_200"));
    assert_eq!(item.destination_path(), Some(written.as_path()));
    assert_eq!(std::fs::read(&written)?, b"*****");
    assert_eq!(engine.stats().completed(), 1);
    Ok(())
}

#[tokio::test]
async fn test_success_overwrites_previous_content() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/file.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fresh"))
        .mount(&mock_server)
        .await;

    let home = TempDir::new()?;
    let url = format!("{}/file.txt", mock_server.uri());
    let target = destination(&home, &url);
    std::fs::create_dir_all(target.parent().expect("has parent"))?;
    std::fs::write(&target, b"stale and much longer")?;

    let engine = create_engine(1, ImmediatePolicy::new(1), &home)?;
    let item = engine.run(FetchItem::new(url)).await?;

    assert_eq!(item.status(), ItemStatus::Done);
    assert_eq!(std::fs::read(&target)?, b"fresh");
    Ok(())
}

#[tokio::test]
async fn test_large_body_streams_intact() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    let body: Vec<u8> = (0..300_000_u32).map(|i| (i % 251) as u8).collect();
    Mock::given(method("GET"))
        .and(path("/large.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&mock_server)
        .await;

    let home = TempDir::new()?;
    let engine = Downloader::new(
        1,
        Arc::new(ImmediatePolicy::new(1)),
        Arc::new(DiskPersistence::new(home.path()).with_chunk_size(1024)),
    )?;
    let url = format!("{}/large.bin", mock_server.uri());

    let item = engine.run(FetchItem::new(url.as_str())).await?;

    assert_eq!(item.status(), ItemStatus::Done);
    assert_eq!(std::fs::read(destination(&home, &url))?, body);
    Ok(())
}

#[tokio::test]
async fn test_item_with_body_is_posted() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("POST"))
        .and(path("/submit"))
        .and(body_string("name=value"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"accepted"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let home = TempDir::new()?;
    let engine = create_engine(1, ImmediatePolicy::new(1), &home)?;
    let url = format!("{}/submit", mock_server.uri());

    let item = engine
        .run(FetchItem::new(url.as_str()).with_body("name=value"))
        .await?;

    assert_eq!(item.status(), ItemStatus::Done);
    assert_eq!(std::fs::read(destination(&home, &url))?, b"accepted");
    Ok(())
}

// ==================== Failure Path Tests ====================

#[tokio::test]
async fn test_not_found_is_not_retried() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let home = TempDir::new()?;
    let engine = create_engine(1, ImmediatePolicy::new(5), &home)?;
    let url = format!("{}/missing", mock_server.uri());

    let item = engine.run(FetchItem::new(url.as_str())).await?;

    assert_eq!(item.status(), ItemStatus::Failed);
    assert_eq!(item.attempts(), 1);
    let failure = item.failure().expect("failed item carries a failure");
    assert_eq!(failure.kind, FailureKind::Rejected);
    assert_eq!(failure.last_outcome, Some(AttemptOutcome::Status(404)));

    let marker = destination(&home, &url);
    assert!(marker.is_file());
    assert_eq!(std::fs::metadata(&marker)?.len(), 0);
    assert_eq!(engine.stats().retried(), 0);
    Ok(())
}

#[tokio::test]
async fn test_server_error_exhausts_attempts() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;

    let home = TempDir::new()?;
    let engine = create_engine(1, ImmediatePolicy::new(3), &home)?;
    let url = format!("{}/flaky", mock_server.uri());

    let item = engine.run(FetchItem::new(url.as_str())).await?;

    assert_eq!(item.status(), ItemStatus::Failed);
    assert_eq!(item.attempts(), 3);
    assert_eq!(
        item.failure().map(|f| f.kind),
        Some(FailureKind::Exhausted)
    );
    assert_eq!(std::fs::metadata(destination(&home, &url))?.len(), 0);
    assert_eq!(engine.stats().retried(), 2);
    Ok(())
}

#[tokio::test]
async fn test_transient_error_then_success() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/recovering"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/recovering"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"finally"))
        .with_priority(u8::MAX)
        .mount(&mock_server)
        .await;

    let home = TempDir::new()?;
    let engine = create_engine(1, ImmediatePolicy::new(5), &home)?;
    let url = format!("{}/recovering", mock_server.uri());

    let item = engine.run(FetchItem::new(url.as_str())).await?;

    assert_eq!(item.status(), ItemStatus::Done);
    assert_eq!(item.attempts(), 3);
    assert_eq!(std::fs::read(destination(&home, &url))?, b"finally");
    Ok(())
}

#[tokio::test]
async fn test_timeout_is_retryable_outcome() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"too late")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&mock_server)
        .await;

    let home = TempDir::new()?;
    let policy = ImmediatePolicy::new(2).with_timeout(Duration::from_millis(200));
    let engine = create_engine(1, policy, &home)?;
    let url = format!("{}/slow", mock_server.uri());

    let item = engine.run(FetchItem::new(url.as_str())).await?;

    assert_eq!(item.status(), ItemStatus::Failed);
    assert_eq!(item.attempts(), 2);
    let failure = item.failure().expect("failed item carries a failure");
    assert_eq!(failure.kind, FailureKind::Exhausted);
    assert_eq!(failure.last_outcome, Some(AttemptOutcome::TimedOut));
    assert_eq!(std::fs::metadata(destination(&home, &url))?.len(), 0);
    Ok(())
}

#[tokio::test]
async fn test_request_policy_makes_single_attempt() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&mock_server)
        .await;

    let home = TempDir::new()?;
    let engine = create_engine(1, RequestPolicy::default(), &home)?;

    let item = engine
        .run(FetchItem::new(format!("{}/once", mock_server.uri())))
        .await?;

    assert_eq!(item.status(), ItemStatus::Failed);
    assert_eq!(item.attempts(), 1);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_host_fails_without_aborting() -> Result<(), Box<dyn std::error::Error>> {
    let home = TempDir::new()?;
    let engine = create_engine(1, ImmediatePolicy::new(2), &home)?;
    // Port 9 (discard) on localhost is closed in test environments
    let url = "http://127.0.0.1:9/nothing-here";

    let item = engine.run(FetchItem::new(url)).await?;

    assert_eq!(item.status(), ItemStatus::Failed);
    assert_eq!(item.attempts(), 2);
    assert_eq!(
        item.failure().and_then(|f| f.last_outcome),
        Some(AttemptOutcome::ConnectionFailed)
    );
    Ok(())
}

/// Allows several attempts on paper but stops pacing after the first one.
#[derive(Debug)]
struct StopsAfterFirstAttempt;

impl RetryPolicy for StopsAfterFirstAttempt {
    fn max_attempts(&self) -> u32 {
        5
    }

    fn delay_for(&self, _attempts: u32) -> Duration {
        Duration::ZERO
    }

    fn sleep_duration(&self, attempts: u32) -> Option<Duration> {
        (attempts == 0).then_some(Duration::ZERO)
    }
}

#[tokio::test]
async fn test_policy_stop_keeps_last_outcome() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/unavailable"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    let home = TempDir::new()?;
    let engine = create_engine(1, StopsAfterFirstAttempt, &home)?;
    let url = format!("{}/unavailable", mock_server.uri());

    let item = engine.run(FetchItem::new(url.as_str())).await?;

    assert_eq!(item.status(), ItemStatus::Failed);
    assert_eq!(item.attempts(), 1);
    let failure = item.failure().expect("failed item carries a failure");
    assert_eq!(failure.kind, FailureKind::Exhausted);
    assert_eq!(failure.last_outcome, Some(AttemptOutcome::Status(503)));
    assert_eq!(std::fs::metadata(destination(&home, &url))?.len(), 0);
    Ok(())
}

// ==================== Pacing Tests ====================

#[tokio::test]
async fn test_backoff_paces_attempts() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;

    let home = TempDir::new()?;
    let engine = create_engine(1, BackOff::with_max_attempts(3), &home)?;
    let url = format!("{}/busy", mock_server.uri());

    let started = Instant::now();
    let item = engine.run(FetchItem::new(url.as_str())).await?;
    let elapsed = started.elapsed();

    assert_eq!(item.status(), ItemStatus::Failed);
    assert_eq!(item.attempts(), 3);
    assert_eq!(
        item.failure().map(|f| f.kind),
        Some(FailureKind::Exhausted)
    );
    // 0.25 s + 0.5 s + 1 s of sleeps before the three attempts
    assert!(
        elapsed >= Duration::from_millis(1700),
        "three backoff attempts finished too quickly: {elapsed:?}"
    );
    Ok(())
}

// ==================== Cache Tests ====================

#[tokio::test]
async fn test_skip_cached_makes_no_request() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"new"))
        .expect(0)
        .mount(&mock_server)
        .await;

    let home = TempDir::new()?;
    let url = format!("{}/cached.txt", mock_server.uri());
    let target = destination(&home, &url);
    std::fs::create_dir_all(target.parent().expect("has parent"))?;
    std::fs::write(&target, b"old")?;

    let engine = Downloader::new(
        1,
        Arc::new(ImmediatePolicy::new(3)),
        Arc::new(DiskPersistence::new(home.path()).with_skip_cached(true)),
    )?;
    let item = engine.run(FetchItem::new(url)).await?;

    assert_eq!(item.status(), ItemStatus::CacheHit);
    assert_eq!(item.attempts(), 0);
    assert_eq!(std::fs::read(&target)?, b"old");
    Ok(())
}

#[tokio::test]
async fn test_failure_marker_counts_as_cached() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let home = TempDir::new()?;
    let engine = Downloader::new(
        1,
        Arc::new(ImmediatePolicy::new(3)),
        Arc::new(DiskPersistence::new(home.path()).with_skip_cached(true)),
    )?;
    let url = format!("{}/gone", mock_server.uri());

    let first = engine.run(FetchItem::new(url.as_str())).await?;
    let second = engine.run(FetchItem::new(url.as_str())).await?;

    assert_eq!(first.status(), ItemStatus::Failed);
    assert_eq!(second.status(), ItemStatus::CacheHit);
    Ok(())
}

// ==================== Storage Error Tests ====================

#[tokio::test]
async fn test_storage_error_propagates() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"content"))
        .mount(&mock_server)
        .await;

    let scratch = TempDir::new()?;
    let blocked_home = scratch.path().join("not-a-directory");
    std::fs::write(&blocked_home, b"file in the way")?;

    let engine = Downloader::new(
        1,
        Arc::new(ImmediatePolicy::new(3)),
        Arc::new(DiskPersistence::new(&blocked_home)),
    )?;

    let result = engine
        .run(FetchItem::new(format!("{}/file.txt", mock_server.uri())))
        .await;

    assert!(
        matches!(result, Err(EngineError::Storage { .. })),
        "expected storage error, got {result:?}"
    );
    Ok(())
}

#[tokio::test]
async fn test_swarm_results_keeps_finished_items() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"content"))
        .mount(&mock_server)
        .await;

    let home = TempDir::new()?;
    let base = mock_server.uri();
    // A file where `/docs/page` needs a directory
    let blocker = destination(&home, &format!("{base}/docs"));
    std::fs::create_dir_all(blocker.parent().expect("has parent"))?;
    std::fs::write(&blocker, b"docs index")?;

    let engine = create_engine(2, ImmediatePolicy::new(1), &home)?;
    let urls = [format!("{base}/docs/page"), format!("{base}/other")];

    let results: Vec<Result<FetchItem, EngineError>> =
        batch::swarm_results(&engine, urls.clone().map(FetchItem::new)).await;

    assert_eq!(results.len(), 2);
    assert!(
        matches!(results[0], Err(EngineError::Storage { .. })),
        "expected storage error, got {:?}",
        results[0]
    );
    let other = results[1].as_ref().expect("sibling item settles normally");
    assert_eq!(other.status(), ItemStatus::Done);
    assert_eq!(std::fs::read(destination(&home, &urls[1]))?, b"content");

    let swarmed: Result<Vec<FetchItem>, EngineError> =
        batch::swarm(&engine, urls.map(FetchItem::new)).await;
    assert!(matches!(swarmed, Err(EngineError::Storage { .. })));
    Ok(())
}

// ==================== Concurrency Tests ====================

/// Counts how many requests the server is handling at once.
///
/// Uses a blocking sleep so that the in-flight counter stays raised while
/// other requests arrive.
struct ConcurrencyTrackingResponder {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    delay_ms: u64,
}

impl Respond for ConcurrencyTrackingResponder {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let current_count = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current_count, Ordering::SeqCst);

        std::thread::sleep(Duration::from_millis(self.delay_ms));

        self.current.fetch_sub(1, Ordering::SeqCst);
        ResponseTemplate::new(200).set_body_bytes(b"content")
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_limit_is_respected() -> Result<(), Box<dyn std::error::Error>> {
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ConcurrencyTrackingResponder {
            current: Arc::clone(&current),
            peak: Arc::clone(&peak),
            delay_ms: 100,
        })
        .mount(&mock_server)
        .await;

    let home = TempDir::new()?;
    let engine = create_engine(3, ImmediatePolicy::new(1), &home)?;
    let urls: Vec<String> = (0..10)
        .map(|i| format!("{}/file{i}.txt", mock_server.uri()))
        .collect();

    let items: Vec<FetchItem> =
        batch::swarm(&engine, urls.into_iter().map(FetchItem::new)).await?;

    assert_eq!(items.len(), 10);
    assert!(items.iter().all(|item| item.status() == ItemStatus::Done));
    let observed_peak = peak.load(Ordering::SeqCst);
    assert!(
        observed_peak <= 3,
        "Peak concurrency {observed_peak} should not exceed limit of 3"
    );
    assert_eq!(engine.stats().total(), 10);
    Ok(())
}

// ==================== Fan-out Tests ====================

#[tokio::test]
async fn test_swarm_isolates_failures() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let home = TempDir::new()?;
    let engine = create_engine(2, ImmediatePolicy::new(2), &home)?;
    let urls = [
        format!("{}/ok", mock_server.uri()),
        format!("{}/missing", mock_server.uri()),
        "not a url".to_string(),
    ];

    let items: Vec<FetchItem> = batch::swarm(&engine, urls.map(FetchItem::new)).await?;

    let statuses: Vec<_> = items.iter().map(FetchItem::status).collect();
    assert_eq!(
        statuses,
        vec![ItemStatus::Done, ItemStatus::Failed, ItemStatus::Failed]
    );
    assert_eq!(
        items[2].failure().map(|f| f.kind),
        Some(FailureKind::MalformedRequest)
    );
    Ok(())
}

#[tokio::test]
async fn test_each_correlates_results_with_inputs() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"row"))
        .mount(&mock_server)
        .await;

    let home = TempDir::new()?;
    let engine = create_engine(2, ImmediatePolicy::new(1), &home)?;
    let base = mock_server.uri();

    let mut rows: Vec<(u32, ItemStatus)> = Vec::new();
    let mut results = batch::each(&engine, [3_u32, 1, 2], |id| format!("{base}/rows/{id}"));
    while let Some(item) = results.next().await {
        let item = item?;
        let id = *item.info().expect("each attaches the input");
        assert!(item.url().ends_with(&format!("/rows/{id}")));
        rows.push((id, item.status()));
    }
    rows.sort_by_key(|(id, _)| *id);

    assert_eq!(
        rows,
        vec![
            (1, ItemStatus::Done),
            (2, ItemStatus::Done),
            (3, ItemStatus::Done)
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_each_posts_items_built_by_mapper() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    for name in ["alpha", "beta"] {
        Mock::given(method("POST"))
            .and(path(format!("/submit/{name}")))
            .and(body_string(format!("name={name}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("saved {name}")))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let home = TempDir::new()?;
    let engine = create_engine(2, ImmediatePolicy::new(1), &home)?;
    let base = mock_server.uri();

    let mut saved = Vec::new();
    let mut results = batch::each(&engine, ["alpha", "beta"], |name| {
        FetchItem::new(format!("{base}/submit/{name}")).with_body(format!("name={name}"))
    });
    while let Some(item) = results.next().await {
        let item = item?;
        let name = *item.info().expect("each attaches the input");
        assert_eq!(item.status(), ItemStatus::Done);
        assert_eq!(
            std::fs::read_to_string(destination(&home, item.url()))?,
            format!("saved {name}")
        );
        saved.push(name);
    }
    saved.sort_unstable();

    assert_eq!(saved, vec!["alpha", "beta"]);
    Ok(())
}
