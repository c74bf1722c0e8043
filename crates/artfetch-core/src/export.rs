//! Parallel batch export on a dedicated rayon pool
//!
//! Batches are handed over from async code through a bounded number of
//! slots; a full queue makes `submit` wait, which in turn stops the fetch
//! stream from being polled. Workers encode concurrently and append through
//! the sink's lock, then report back over a channel.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};

use crate::buffer::Batch;
use crate::error::ExportError;
use crate::record::Record;
use crate::sink::OutputSink;

/// Result of exporting one batch.
#[derive(Debug)]
pub struct BatchReport {
    pub seq: u64,
    pub records: usize,
    /// Rows appended, or why nothing was
    pub result: Result<usize, ExportError>,
}

pub struct ExportWorkerPool {
    pool: rayon::ThreadPool,
    sink: Arc<OutputSink>,
    slots: Arc<Semaphore>,
    sort_by_id: bool,
    reports_tx: mpsc::UnboundedSender<BatchReport>,
    reports_rx: mpsc::UnboundedReceiver<BatchReport>,
    submitted: usize,
    received: usize,
}

impl std::fmt::Debug for ExportWorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportWorkerPool")
            .field("workers", &self.pool.current_num_threads())
            .field("submitted", &self.submitted)
            .field("received", &self.received)
            .finish_non_exhaustive()
    }
}

impl ExportWorkerPool {
    /// `max_workers` threads; at most `2 * max_workers` batches queued or running.
    pub fn new(
        sink: Arc<OutputSink>,
        max_workers: usize,
        sort_by_id: bool,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        let workers = max_workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("export-{i}"))
            .build()?;
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        Ok(Self {
            pool,
            sink,
            slots: Arc::new(Semaphore::new(workers * 2)),
            sort_by_id,
            reports_tx,
            reports_rx,
            submitted: 0,
            received: 0,
        })
    }

    /// Queue `batch` for export, waiting for a free slot.
    pub async fn submit(&mut self, batch: Batch) {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .expect("export slots are never closed");
        let sink = self.sink.clone();
        let tx = self.reports_tx.clone();
        let sort_by_id = self.sort_by_id;
        self.submitted += 1;

        self.pool.spawn(move || {
            let report = export_batch(&sink, batch, sort_by_id);
            drop(permit);
            // Receiver lives as long as the pool
            let _ = tx.send(report);
        });
    }

    /// Batches submitted so far
    pub const fn submitted(&self) -> usize {
        self.submitted
    }

    /// Wait for every submitted batch and return the reports not yet collected.
    pub async fn join(&mut self) -> Vec<BatchReport> {
        let mut reports = Vec::with_capacity(self.submitted - self.received);
        while self.received < self.submitted {
            match self.reports_rx.recv().await {
                Some(report) => {
                    self.received += 1;
                    reports.push(report);
                }
                None => break,
            }
        }
        reports
    }
}

fn export_batch(sink: &OutputSink, batch: Batch, sort_by_id: bool) -> BatchReport {
    let seq = batch.seq();
    let mut records = batch.into_records();
    if sort_by_id {
        records.sort_unstable_by_key(Record::page_id);
    }
    let result = sink
        .encode(&records)
        .and_then(|encoded| sink.append(encoded));
    match &result {
        Ok(rows) => log::debug!("batch {seq}: wrote {rows} records"),
        Err(e) => log::error!("batch {seq}: export failed: {e}"),
    }
    BatchReport {
        seq,
        records: records.len(),
        result,
    }
}
