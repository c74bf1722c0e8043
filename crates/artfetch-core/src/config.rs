//! Run configuration snapshot
//!
//! Deserialized once (by the CLI) and validated before the pipeline starts.
//! Components receive the pieces they need at construction; nothing mutates
//! the snapshot during a run.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;

use crate::error::ConfigError;

/// Sequential identifier of one article page.
pub type PageId = u64;

/// Immutable configuration for one pipeline run.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub pages: PagesConfig,
    pub save: SaveConfig,
    pub request: RequestConfig,
    pub headers: HeadersConfig,
}

impl RunConfig {
    /// Check every constraint the pipeline relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pages.range()?;
        self.save.format()?;
        self.request.validate()?;
        self.headers.to_header_map()?;
        Ok(())
    }
}

/// Inclusive page range to retrieve.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PagesConfig {
    pub first: PageId,
    pub last: PageId,
}

impl Default for PagesConfig {
    fn default() -> Self {
        Self { first: 1, last: 1 }
    }
}

impl PagesConfig {
    pub fn range(&self) -> Result<PageRange, ConfigError> {
        PageRange::new(self.first, self.last)
    }
}

/// Validated `[first, last]` range (`first <= last`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    first: PageId,
    last: PageId,
}

impl PageRange {
    pub fn new(first: PageId, last: PageId) -> Result<Self, ConfigError> {
        if first > last {
            return Err(ConfigError::InvalidRange { first, last });
        }
        // len() must fit in u64
        if (last - first).checked_add(1).is_none() {
            return Err(ConfigError::RangeTooLarge { first, last });
        }
        Ok(Self { first, last })
    }

    pub const fn first(&self) -> PageId {
        self.first
    }

    pub const fn last(&self) -> PageId {
        self.last
    }

    /// Number of ids in the range
    pub const fn len(&self) -> u64 {
        self.last - self.first + 1
    }

    pub const fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> std::ops::RangeInclusive<PageId> {
        self.first..=self.last
    }

    /// Split into consecutive chunks of at most `size` ids.
    pub fn chunks(&self, size: usize) -> impl Iterator<Item = std::ops::RangeInclusive<PageId>> {
        let size = size.max(1) as u64;
        let last = self.last;
        let mut next = Some(self.first);
        std::iter::from_fn(move || {
            let start = next?;
            let end = start.saturating_add(size - 1).min(last);
            next = if end == last { None } else { Some(end + 1) };
            Some(start..=end)
        })
    }
}

/// Output file format, selected by the configured extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Delimited text with a header row
    Csv,
    /// Columnar binary (zstd-compressed Parquet)
    Parquet,
    /// A single JSON array of record objects
    Json,
}

impl ExportFormat {
    pub fn from_extension(ext: &str) -> Result<Self, ConfigError> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "parquet" => Ok(Self::Parquet),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::UnknownExtension(ext.to_string())),
        }
    }

    pub const fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Parquet => "parquet",
            Self::Json => "json",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Where and how records are saved
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    pub path: PathBuf,
    pub file: String,
    pub extension: String,
    /// Drop failed pages entirely instead of writing a marker record
    pub skip: bool,
    /// Sort each batch by page id before it is written
    pub sort_by_id: bool,
    /// Zstd level for Parquet output
    pub zstd_level: i32,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data"),
            file: "articles".to_string(),
            extension: "csv".to_string(),
            skip: true,
            sort_by_id: false,
            zstd_level: 3,
        }
    }
}

impl SaveConfig {
    pub fn format(&self) -> Result<ExportFormat, ConfigError> {
        ExportFormat::from_extension(&self.extension)
    }

    /// `<path>/<file>.<extension>`
    pub fn target_path(&self) -> Result<PathBuf, ConfigError> {
        let format = self.format()?;
        Ok(self
            .path
            .join(format!("{}.{}", self.file, format.extension())))
    }
}

/// Concurrency, retry and buffering knobs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    pub max_concurrent_requests: usize,
    /// Retries after the initial attempt
    pub retry_attempts: u32,
    /// Seconds
    pub min_delay: f64,
    /// Seconds
    pub max_delay: f64,
    /// Scheduler chunk size
    pub batch_size: usize,
    /// Export worker threads
    pub max_workers: usize,
    /// Records per flushed batch
    pub buffer_size: usize,
    /// Per-request timeout in seconds
    pub timeout: f64,
    pub session: SessionConfig,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 10,
            retry_attempts: 3,
            min_delay: 0.5,
            max_delay: 2.0,
            batch_size: 100,
            max_workers: 4,
            buffer_size: 100,
            timeout: 30.0,
            session: SessionConfig::default(),
        }
    }
}

impl RequestConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("max_concurrent_requests", self.max_concurrent_requests),
            ("batch_size", self.batch_size),
            ("max_workers", self.max_workers),
            ("buffer_size", self.buffer_size),
            ("session.limit", self.session.limit),
            ("session.limit_per_host", self.session.limit_per_host),
        ];
        if let Some((name, _)) = counts.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::ZeroLimit(name));
        }
        let delays_ok = self.min_delay.is_finite()
            && self.max_delay.is_finite()
            && self.min_delay >= 0.0
            && self.min_delay <= self.max_delay;
        if !delays_ok {
            return Err(ConfigError::InvalidDelay {
                min: self.min_delay,
                max: self.max_delay,
            });
        }
        if !(self.timeout.is_finite() && self.timeout > 0.0) {
            return Err(ConfigError::InvalidTimeout(self.timeout));
        }
        if self.max_concurrent_requests > self.session.limit {
            return Err(ConfigError::ConcurrencyExceedsPool {
                concurrent: self.max_concurrent_requests,
                limit: self.session.limit,
            });
        }
        Ok(())
    }

    /// `(min_delay, max_delay)` as durations
    pub fn delay_bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_secs_f64(self.min_delay),
            Duration::from_secs_f64(self.max_delay),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }
}

/// Connection pool settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Tear down each connection after one request
    pub force_close: bool,
    pub limit: usize,
    pub limit_per_host: usize,
    /// DNS cache TTL in seconds; 0 disables caching
    pub ttl_dns_cache: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            force_close: false,
            limit: 100,
            limit_per_host: 10,
            ttl_dns_cache: 300,
        }
    }
}

/// Request headers; unset values are not sent
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HeadersConfig {
    pub user_agent: Option<String>,
    pub accept: Option<String>,
    pub accept_language: Option<String>,
    pub accept_encoding: Option<String>,
    pub connection: Option<String>,
    pub referer: Option<String>,
}

impl HeadersConfig {
    pub fn to_header_map(&self) -> Result<HeaderMap, ConfigError> {
        let pairs: [(HeaderName, &'static str, &Option<String>); 6] = [
            (header::USER_AGENT, "user_agent", &self.user_agent),
            (header::ACCEPT, "accept", &self.accept),
            (header::ACCEPT_LANGUAGE, "accept_language", &self.accept_language),
            (header::ACCEPT_ENCODING, "accept_encoding", &self.accept_encoding),
            (header::CONNECTION, "connection", &self.connection),
            (header::REFERER, "referer", &self.referer),
        ];
        let mut map = HeaderMap::new();
        for (name, key, value) in pairs {
            let Some(value) = value else { continue };
            let value = HeaderValue::from_str(value).map_err(|e| ConfigError::InvalidHeader {
                name: key,
                message: e.to_string(),
            })?;
            map.insert(name, value);
        }
        Ok(map)
    }
}
