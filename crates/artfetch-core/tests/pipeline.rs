//! End-to-end pipeline runs against an in-memory page source

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use artfetch_core::{
    read_records, Article, ExportFormat, ExtractionFailure, Extractor, FetchOutcome, PageId,
    PageSource, PipelineController, PipelineState, RecordStatus, RunConfig, ShutdownFlag,
};
use async_trait::async_trait;
use tempfile::TempDir;

/// Scripted source: each id maps to a fixed outcome (default 200).
#[derive(Default)]
struct FakeSite {
    outcomes: HashMap<PageId, FetchOutcome>,
    attempts: Mutex<HashMap<PageId, usize>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    latency: Duration,
}

impl FakeSite {
    fn with(mut self, page_id: PageId, outcome: FetchOutcome) -> Self {
        self.outcomes.insert(page_id, outcome);
        self
    }

    fn attempts_for(&self, page_id: PageId) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .get(&page_id)
            .copied()
            .unwrap_or(0)
    }

    fn total_attempts(&self) -> usize {
        self.attempts.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl PageSource for FakeSite {
    async fn attempt(&self, page_id: PageId) -> FetchOutcome {
        *self.attempts.lock().unwrap().entry(page_id).or_default() += 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.outcomes
            .get(&page_id)
            .cloned()
            .unwrap_or_else(|| FetchOutcome::Success {
                status: 200,
                body: format!("<h1>Article {page_id}</h1>"),
            })
    }
}

/// Shared handle so the test can inspect the source after the run.
struct Shared(Arc<FakeSite>);

#[async_trait]
impl PageSource for Shared {
    async fn attempt(&self, page_id: PageId) -> FetchOutcome {
        self.0.attempt(page_id).await
    }
}

struct TitleExtractor;

impl Extractor for TitleExtractor {
    fn extract(&self, _page_id: PageId, body: &str) -> Result<Article, ExtractionFailure> {
        let title = body
            .strip_prefix("<h1>")
            .and_then(|rest| rest.strip_suffix("</h1>"))
            .ok_or(ExtractionFailure::MissingContent)?;
        Ok(Article {
            title: title.to_string(),
            text: "body".to_string(),
            keywords: vec!["test".to_string()],
            ..Default::default()
        })
    }
}

fn config(dir: &Path, first: PageId, last: PageId, extension: &str) -> RunConfig {
    let mut config = RunConfig::default();
    config.pages.first = first;
    config.pages.last = last;
    config.save.path = dir.to_path_buf();
    config.save.file = "articles".to_string();
    config.save.extension = extension.to_string();
    config.request.min_delay = 0.0;
    config.request.max_delay = 0.001;
    config
}

#[tokio::test]
async fn not_found_skipped_end_to_end() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path(), 1, 3, "csv");
    config.save.skip = true;
    config.request.buffer_size = 10;

    let site = FakeSite::default().with(2, FetchOutcome::ClientError { status: 404 });
    let mut controller = PipelineController::new(config, site, TitleExtractor).unwrap();
    let summary = controller.run().await.unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.failures.client, 1);
    assert!(!summary.is_partial_failure());

    let mut ids: Vec<PageId> = read_records(controller.target(), ExportFormat::Csv)
        .unwrap()
        .iter()
        .map(|r| r.page_id())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 3]);
}

#[tokio::test]
async fn not_found_kept_as_marker() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path(), 1, 3, "json");
    config.save.skip = false;

    let site = FakeSite::default().with(2, FetchOutcome::ClientError { status: 404 });
    let mut controller = PipelineController::new(config, site, TitleExtractor).unwrap();
    let summary = controller.run().await.unwrap();
    assert_eq!(summary.failed, 1);

    let records = read_records(controller.target(), ExportFormat::Json).unwrap();
    let markers: Vec<_> = records.iter().filter(|r| r.page_id() == 2).collect();
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].status(), RecordStatus::NotFound);
    assert!(markers[0].is_marker());
}

#[tokio::test]
async fn transport_failure_retried_then_marked() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path(), 1, 1, "parquet");
    config.save.skip = false;
    config.request.retry_attempts = 2;

    let site = Arc::new(FakeSite::default().with(
        1,
        FetchOutcome::TransportError {
            cause: "connection reset".to_string(),
        },
    ));
    let mut controller =
        PipelineController::new(config, Shared(site.clone()), TitleExtractor).unwrap();
    let summary = controller.run().await.unwrap();

    assert_eq!(site.attempts_for(1), 3);
    assert_eq!(summary.fetch_attempts, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures.transport, 1);

    let records = read_records(controller.target(), ExportFormat::Parquet).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status(), RecordStatus::FetchError);
    assert_eq!(records[0].error(), Some("transport error: connection reset"));
}

#[tokio::test]
async fn extraction_failure_counted_by_class() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), 1, 2, "json");

    let site = FakeSite::default().with(
        2,
        FetchOutcome::Success {
            status: 200,
            body: "<p>no heading</p>".to_string(),
        },
    );
    let mut controller = PipelineController::new(config, site, TitleExtractor).unwrap();
    let summary = controller.run().await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failures.extraction, 1);
}

#[tokio::test]
async fn every_page_attempted_once_under_concurrency_ceiling() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path(), 100, 260, "parquet");
    config.request.max_concurrent_requests = 6;
    config.request.batch_size = 40;
    config.request.buffer_size = 17;
    config.request.max_workers = 3;

    let site = Arc::new(FakeSite {
        latency: Duration::from_millis(2),
        ..Default::default()
    });
    let mut controller =
        PipelineController::new(config, Shared(site.clone()), TitleExtractor).unwrap();
    let summary = controller.run().await.unwrap();

    assert_eq!(summary.attempted, 161);
    assert_eq!(site.total_attempts(), 161);
    assert!((100..=260).all(|id| site.attempts_for(id) == 1));
    let peak = site.peak.load(Ordering::SeqCst);
    assert!(peak <= 6, "peak in-flight {peak}");

    // Batches: 9 full of 17, one drained remainder of 8
    assert_eq!(summary.batches_written, 10);
    let mut ids: Vec<PageId> = read_records(controller.target(), ExportFormat::Parquet)
        .unwrap()
        .iter()
        .map(|r| r.page_id())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (100..=260).collect::<Vec<_>>());
}

#[tokio::test]
async fn sorted_output_within_single_batch() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path(), 1, 30, "json");
    config.save.sort_by_id = true;
    config.request.buffer_size = 100;

    let site = FakeSite {
        latency: Duration::from_millis(1),
        ..Default::default()
    };
    let mut controller = PipelineController::new(config, site, TitleExtractor).unwrap();
    controller.run().await.unwrap();

    let ids: Vec<PageId> = read_records(controller.target(), ExportFormat::Json)
        .unwrap()
        .iter()
        .map(|r| r.page_id())
        .collect();
    assert_eq!(ids, (1..=30).collect::<Vec<_>>());
}

/// Requests shutdown from inside its `stop_after`-th attempt.
struct StopsMidRun {
    shutdown: ShutdownFlag,
    stop_after: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl PageSource for StopsMidRun {
    async fn attempt(&self, page_id: PageId) -> FetchOutcome {
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.stop_after {
            self.shutdown.request();
        }
        FetchOutcome::Success {
            status: 200,
            body: format!("<h1>Article {page_id}</h1>"),
        }
    }
}

#[tokio::test]
async fn shutdown_mid_run_keeps_fetched_records() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path(), 1, 50, "json");
    config.request.max_concurrent_requests = 1;
    config.request.buffer_size = 100;

    let shutdown = ShutdownFlag::new();
    let source = StopsMidRun {
        shutdown: shutdown.clone(),
        stop_after: 3,
        calls: AtomicUsize::new(0),
    };
    let mut controller = PipelineController::new(config, source, TitleExtractor)
        .unwrap()
        .with_shutdown(shutdown);
    let summary = controller.run().await.unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.pages, 50);
    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.records_written, 3);
    assert_eq!(controller.state(), PipelineState::Terminated);

    let mut ids: Vec<PageId> = read_records(controller.target(), ExportFormat::Json)
        .unwrap()
        .iter()
        .map(|r| r.page_id())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3]);
}
