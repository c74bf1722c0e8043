//! Pipeline orchestration: `Idle -> Running -> Draining -> Terminated`
//!
//! Running: the scheduler yields terminal fetches, the buffer turns them
//! into records and full batches go to the export pool. Draining: the
//! partial batch is flushed, outstanding exports are awaited and the output
//! file is finalized. A shutdown request only stops admission of new pages,
//! so every record already fetched still reaches the file.
//!
//! Extraction runs on the blocking pool; fetch tasks keep running while a
//! page is parsed or a batch waits for an export worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;

use crate::buffer::ResultBuffer;
use crate::config::{ExportFormat, PageRange, RunConfig};
use crate::error::{ExportError, PipelineError};
use crate::export::ExportWorkerPool;
use crate::fetcher::{PageFetcher, PageSource};
use crate::progress::{page_message, ProgressContext, SharedProgress};
use crate::rate_limit::RateLimiter;
use crate::record::Extractor;
use crate::retry::RetryPolicy;
use crate::scheduler::Scheduler;
use crate::shutdown::ShutdownFlag;
use crate::sink::OutputSink;
use crate::stats::RunSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Draining,
    Terminated,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

pub struct PipelineController<S, E> {
    config: RunConfig,
    range: PageRange,
    format: ExportFormat,
    target: PathBuf,
    fetcher: Arc<PageFetcher<S>>,
    buffer: Arc<ResultBuffer<E>>,
    shutdown: ShutdownFlag,
    progress: SharedProgress,
    state: PipelineState,
}

impl<S: PageSource + 'static, E: Extractor + 'static> PipelineController<S, E> {
    /// Validate `config` and wire the components. Any configuration error
    /// is returned here, before anything runs.
    pub fn new(config: RunConfig, source: S, extractor: E) -> Result<Self, PipelineError> {
        config.validate()?;
        let range = config.pages.range()?;
        let format = config.save.format()?;
        let target = config.save.target_path()?;

        let fetcher = Arc::new(PageFetcher::new(
            source,
            RateLimiter::from_config(&config.request),
            RetryPolicy::from_config(&config.request),
        ));
        let buffer = Arc::new(ResultBuffer::new(
            extractor,
            config.request.buffer_size,
            config.save.skip,
        ));

        Ok(Self {
            config,
            range,
            format,
            target,
            fetcher,
            buffer,
            shutdown: ShutdownFlag::new(),
            progress: Arc::new(ProgressContext::hidden()),
            state: PipelineState::Idle,
        })
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownFlag) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = progress;
        self
    }

    pub const fn state(&self) -> PipelineState {
        self.state
    }

    pub fn shutdown_flag(&self) -> &ShutdownFlag {
        &self.shutdown
    }

    /// `<path>/<file>.<extension>`
    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn fetcher(&self) -> &PageFetcher<S> {
        &self.fetcher
    }

    fn transition(&mut self, next: PipelineState) {
        log::info!("Pipeline {} -> {next}", self.state);
        self.state = next;
    }

    /// Run the pipeline to completion.
    ///
    /// Per-page and per-batch failures end up in the summary; only output
    /// setup failures are returned as errors.
    pub async fn run(&mut self) -> Result<RunSummary, PipelineError> {
        if self.state != PipelineState::Idle {
            return Err(PipelineError::AlreadyStarted);
        }
        let started = Instant::now();
        let request = &self.config.request;
        let (concurrency, batch_size) = (request.max_concurrent_requests, request.batch_size);

        if let Some(dir) = self.target.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(ExportError::from)?;
        }
        let sink = Arc::new(OutputSink::create(
            &self.target,
            self.format,
            self.config.save.zstd_level,
        )?);
        let mut exporter = ExportWorkerPool::new(
            sink.clone(),
            self.config.request.max_workers,
            self.config.save.sort_by_id,
        )
        .map_err(PipelineError::WorkerPool)?;

        let mut summary = RunSummary {
            pages: self.range.len(),
            output: self.target.clone(),
            ..Default::default()
        };

        log::info!(
            "Fetching pages {}..={} ({} pages, {} concurrent) -> {}",
            self.range.first(),
            self.range.last(),
            self.range.len(),
            concurrency,
            self.target.display()
        );
        self.transition(PipelineState::Running);

        let pb = self.progress.page_bar(self.range.len());
        {
            let scheduler = Scheduler::new(
                self.fetcher.clone(),
                concurrency,
                batch_size,
                self.shutdown.clone(),
            );
            let mut outcomes = std::pin::pin!(scheduler.run(self.range));
            while let Some(fetched) = outcomes.next().await {
                let fetched = fetched.map_err(PipelineError::Task)?;
                let attempts = fetched.attempts;
                let buffer = self.buffer.clone();
                let offer = tokio::task::spawn_blocking(move || buffer.offer(fetched))
                    .await
                    .map_err(PipelineError::Task)?;
                summary.record(offer.disposition, attempts);
                pb.inc(1);
                pb.set_message(page_message(
                    summary.succeeded,
                    summary.skipped,
                    summary.failed,
                ));
                if let Some(batch) = offer.batch {
                    exporter.submit(batch).await;
                }
            }
        }
        if self.shutdown.is_requested() {
            log::warn!(
                "Shutdown requested: stopped after {} of {} pages",
                summary.attempted,
                summary.pages
            );
        }

        self.transition(PipelineState::Draining);
        if let Some(batch) = self.buffer.drain() {
            log::debug!("Flushing final batch {} ({} records)", batch.seq(), batch.len());
            exporter.submit(batch).await;
        }
        for report in exporter.join().await {
            match report.result {
                Ok(rows) => {
                    summary.records_written += rows;
                    summary.batches_written += 1;
                }
                Err(e) => {
                    summary.batches_failed += 1;
                    summary
                        .export_errors
                        .push(format!("batch {} ({} records): {e}", report.seq, report.records));
                }
            }
        }
        if let Err(e) = sink.finalize() {
            log::error!("Failed to finalize {}: {e}", self.target.display());
            summary.export_errors.push(format!("finalize: {e}"));
        }
        pb.finish_and_clear();

        summary.interrupted = self.shutdown.is_requested();
        summary.elapsed = started.elapsed();
        self.transition(PipelineState::Terminated);
        Ok(summary)
    }
}
