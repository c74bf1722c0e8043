//! artfetch core - concurrent fetch, retry and export pipeline
//!
//! Retrieves a contiguous range of numbered pages over HTTP with bounded
//! concurrency and jittered retries, hands each page to an [`Extractor`],
//! and exports the resulting records to CSV, Parquet or JSON.

pub mod accumulator;
pub mod buffer;
pub mod config;
pub mod controller;
pub mod error;
pub mod export;
pub mod fetcher;
pub mod logging;
pub mod outcome;
pub mod pool;
pub mod progress;
pub mod rate_limit;
pub mod record;
pub mod retry;
pub mod scheduler;
pub mod schema;
pub mod shutdown;
pub mod sink;
pub mod stats;

// Re-exports for convenience
pub use buffer::{Batch, Disposition, ResultBuffer};
pub use config::{ExportFormat, PageId, PageRange, RunConfig};
pub use controller::{PipelineController, PipelineState};
pub use error::{ConfigError, ExportError, PipelineError};
pub use export::{BatchReport, ExportWorkerPool};
pub use fetcher::{HttpPageSource, PageFetcher, PageSource};
pub use logging::{init_logging, LogOutput, LoggingConfig};
pub use outcome::{FailureClass, FetchOutcome, Fetched};
pub use pool::ConnectionPool;
pub use progress::{fmt_num, ProgressContext, SharedProgress};
pub use rate_limit::RateLimiter;
pub use record::{Article, ExtractionFailure, Extractor, Record, RecordStatus};
pub use retry::{Backoff, RetryPolicy, RetryState};
pub use scheduler::Scheduler;
pub use shutdown::ShutdownFlag;
pub use sink::{read_records, OutputSink};
pub use stats::{FailureCounts, RunSummary};
