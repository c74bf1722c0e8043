//! Exported record model and the extraction seam
//!
//! A [`Record`] is either an extracted article (`status = ok`) or a failure
//! marker carrying the status and error text. Constructors keep the two
//! shapes apart: an article is present exactly when the status is `ok`.

use serde::{Deserialize, Serialize};

use crate::config::PageId;

/// Fields extracted from one article page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub text: String,
    pub keywords: Vec<String>,
    pub username: Option<String>,
    pub hubs: Vec<String>,
    /// `YYYY-MM-DD HH:MM:SS`
    pub published_at: Option<String>,
    /// Minutes
    pub reading_time: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Ok,
    NotFound,
    FetchError,
    ExtractionError,
}

impl RecordStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NotFound => "not_found",
            Self::FetchError => "fetch_error",
            Self::ExtractionError => "extraction_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(Self::Ok),
            "not_found" => Some(Self::NotFound),
            "fetch_error" => Some(Self::FetchError),
            "extraction_error" => Some(Self::ExtractionError),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One output row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "id")]
    page_id: PageId,
    status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(flatten)]
    article: Option<Article>,
}

impl Record {
    pub fn article(page_id: PageId, article: Article) -> Self {
        Self {
            page_id,
            status: RecordStatus::Ok,
            error: None,
            article: Some(article),
        }
    }

    /// Failure marker. A marker never carries article fields; passing
    /// [`RecordStatus::Ok`] is coerced to `extraction_error`.
    pub fn marker(page_id: PageId, status: RecordStatus, error: impl Into<String>) -> Self {
        let status = match status {
            RecordStatus::Ok => RecordStatus::ExtractionError,
            other => other,
        };
        Self {
            page_id,
            status,
            error: Some(error.into()),
            article: None,
        }
    }

    pub const fn page_id(&self) -> PageId {
        self.page_id
    }

    pub const fn status(&self) -> RecordStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn article_fields(&self) -> Option<&Article> {
        self.article.as_ref()
    }

    pub const fn is_marker(&self) -> bool {
        self.article.is_none()
    }
}

/// Why a fetched page produced no article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionFailure {
    /// The page has no article body (deleted, hidden, or not an article)
    MissingContent,
    Malformed(String),
}

impl ExtractionFailure {
    pub const fn status(&self) -> RecordStatus {
        match self {
            Self::MissingContent => RecordStatus::NotFound,
            Self::Malformed(_) => RecordStatus::ExtractionError,
        }
    }
}

impl std::fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingContent => write!(f, "article content not found"),
            Self::Malformed(msg) => write!(f, "malformed page: {msg}"),
        }
    }
}

impl std::error::Error for ExtractionFailure {}

/// Turns a fetched page body into an [`Article`].
pub trait Extractor: Send + Sync {
    fn extract(&self, page_id: PageId, body: &str) -> Result<Article, ExtractionFailure>;
}
