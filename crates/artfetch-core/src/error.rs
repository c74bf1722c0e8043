//! Error types for configuration, export and pipeline setup

use std::io;

use arrow::error::ArrowError;
use parquet::errors::ParquetError;

use crate::config::PageId;

/// Invalid run configuration. Fatal: the pipeline never enters `Running`.
#[derive(Debug)]
pub enum ConfigError {
    InvalidRange { first: PageId, last: PageId },
    /// The id count does not fit in a u64
    RangeTooLarge { first: PageId, last: PageId },
    UnknownExtension(String),
    /// A count that must be positive was zero
    ZeroLimit(&'static str),
    InvalidDelay { min: f64, max: f64 },
    InvalidTimeout(f64),
    /// `max_concurrent_requests` above the pool's global connection limit
    ConcurrencyExceedsPool { concurrent: usize, limit: usize },
    InvalidHeader { name: &'static str, message: String },
    InvalidBaseUrl(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRange { first, last } => {
                write!(f, "'last' ({last}) cannot be less than 'first' ({first})")
            }
            Self::RangeTooLarge { first, last } => {
                write!(f, "page range {first}..={last} is too large")
            }
            Self::UnknownExtension(ext) => {
                write!(f, "extension must be one of csv, parquet, json; got '{ext}'")
            }
            Self::ZeroLimit(name) => write!(f, "{name} must be greater than zero"),
            Self::InvalidDelay { min, max } => {
                write!(f, "invalid delay bounds: min_delay={min}, max_delay={max}")
            }
            Self::InvalidTimeout(t) => write!(f, "timeout must be positive, got {t}"),
            Self::ConcurrencyExceedsPool { concurrent, limit } => write!(
                f,
                "max_concurrent_requests ({concurrent}) exceeds session.limit ({limit})"
            ),
            Self::InvalidHeader { name, message } => {
                write!(f, "invalid value for header '{name}': {message}")
            }
            Self::InvalidBaseUrl(url) => write!(f, "invalid base URL: {url}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Failure to serialize, write, finalize or read back exported records.
#[derive(Debug)]
pub enum ExportError {
    Io(io::Error),
    Arrow(ArrowError),
    Parquet(ParquetError),
    Json(serde_json::Error),
    /// Sink already finalized
    Closed,
    /// Exported data could not be mapped back to records
    Decode(String),
    /// An earlier append left the writer unusable; holds its error
    Poisoned(String),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO: {e}"),
            Self::Arrow(e) => write!(f, "Arrow: {e}"),
            Self::Parquet(e) => write!(f, "Parquet: {e}"),
            Self::Json(e) => write!(f, "JSON: {e}"),
            Self::Closed => write!(f, "output sink already finalized"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
            Self::Poisoned(msg) => write!(f, "output abandoned after failed write: {msg}"),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Arrow(e) => Some(e),
            Self::Parquet(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Closed | Self::Decode(_) | Self::Poisoned(_) => None,
        }
    }
}

impl From<io::Error> for ExportError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ArrowError> for ExportError {
    fn from(e: ArrowError) -> Self {
        Self::Arrow(e)
    }
}

impl From<ParquetError> for ExportError {
    fn from(e: ParquetError) -> Self {
        Self::Parquet(e)
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// Fatal pipeline error: raised before `Running` or when the output
/// target cannot be set up at all, or when a pipeline task panics.
#[derive(Debug)]
pub enum PipelineError {
    Config(ConfigError),
    /// HTTP client construction failed
    Client(reqwest::Error),
    WorkerPool(rayon::ThreadPoolBuildError),
    Output(ExportError),
    /// A fetch or extraction task panicked
    Task(tokio::task::JoinError),
    /// `run` called on a controller that already left `Idle`
    AlreadyStarted,
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Client(e) => write!(f, "HTTP client: {e}"),
            Self::WorkerPool(e) => write!(f, "export worker pool: {e}"),
            Self::Output(e) => write!(f, "output: {e}"),
            Self::Task(e) => write!(f, "pipeline task: {e}"),
            Self::AlreadyStarted => write!(f, "pipeline already started"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Client(e) => Some(e),
            Self::WorkerPool(e) => Some(e),
            Self::Output(e) => Some(e),
            Self::Task(e) => Some(e),
            Self::AlreadyStarted => None,
        }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<ExportError> for PipelineError {
    fn from(e: ExportError) -> Self {
        Self::Output(e)
    }
}
