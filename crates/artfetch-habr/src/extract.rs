//! Article page → [`Article`]

use std::sync::LazyLock;

use artfetch_core::{Article, ExtractionFailure, Extractor, PageId};
use chrono::DateTime;
use scraper::{ElementRef, Html, Selector};

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("invalid selector")
}

static CONTENT_BODY: LazyLock<Selector> = LazyLock::new(|| selector("div#post-content-body"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("title"));
static BODY: LazyLock<Selector> = LazyLock::new(|| selector("div.article-formatted-body"));
static KEYWORDS: LazyLock<Selector> = LazyLock::new(|| selector(r#"meta[name="keywords"]"#));
static USERNAME: LazyLock<Selector> = LazyLock::new(|| selector("a.tm-user-info__username"));
static HUBS: LazyLock<Selector> = LazyLock::new(|| selector("a.tm-hubs-list__link"));
static TIME: LazyLock<Selector> = LazyLock::new(|| selector("time[datetime]"));
static READING_TIME: LazyLock<Selector> =
    LazyLock::new(|| selector("span.tm-article-reading-time__label"));

/// Output format of `published_at`
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Extracts article fields from a Habr article page.
#[derive(Debug, Clone, Copy, Default)]
pub struct HabrExtractor;

impl HabrExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for HabrExtractor {
    fn extract(&self, page_id: PageId, body: &str) -> Result<Article, ExtractionFailure> {
        let document = Html::parse_document(body);
        if document.select(&CONTENT_BODY).next().is_none() {
            log::debug!("page {page_id}: no article body");
            return Err(ExtractionFailure::MissingContent);
        }

        let title = first_text(&document, &TITLE).unwrap_or_default();
        let text = first_text(&document, &BODY).unwrap_or_default();
        let keywords = document
            .select(&KEYWORDS)
            .next()
            .and_then(|meta| meta.value().attr("content"))
            .map(split_keywords)
            .unwrap_or_default();
        let username = first_text(&document, &USERNAME);
        let hubs = document
            .select(&HUBS)
            .map(element_text)
            .filter(|hub| !hub.is_empty())
            .collect();
        let published_at = match document
            .select(&TIME)
            .next()
            .and_then(|time| time.value().attr("datetime"))
        {
            Some(raw) => Some(format_time(raw)?),
            None => None,
        };
        let reading_time = first_text(&document, &READING_TIME)
            .as_deref()
            .and_then(parse_minutes);

        Ok(Article {
            title,
            text,
            keywords,
            username,
            hubs,
            published_at,
            reading_time,
        })
    }
}

/// All descendant text with whitespace runs collapsed to one space
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text of the first match; empty text counts as absent
fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .map(element_text)
        .filter(|s| !s.is_empty())
}

fn split_keywords(content: &str) -> Vec<String> {
    content
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// ISO-8601 (`2023-05-10T12:34:56.000Z`) → `YYYY-MM-DD HH:MM:SS`
fn format_time(raw: &str) -> Result<String, ExtractionFailure> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.format(TIME_FORMAT).to_string())
        .map_err(|e| ExtractionFailure::Malformed(format!("publication time '{raw}': {e}")))
}

/// `"7 мин"` → 7
fn parse_minutes(label: &str) -> Option<u32> {
    let digits: String = label.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>Async Rust in practice / Habr</title>
  <meta name="keywords" content="rust, tokio, async">
</head>
<body>
  <div class="tm-article-presenter">
    <a class="tm-user-info__username" href="/ru/users/ferris/"> ferris </a>
    <time datetime="2023-05-10T12:34:56.000Z" title="2023-05-10, 15:34">10 May</time>
    <span class="tm-article-reading-time__label">7 мин</span>
    <div id="post-content-body">
      <div class="article-formatted-body">
        <p>First paragraph.</p>
        <p>Second <b>bold</b> paragraph.</p>
      </div>
    </div>
    <div class="tm-hubs-list">
      <a class="tm-hubs-list__link" href="/ru/hubs/rust/"><span>Rust</span><span title="Profile hub">*</span></a>
      <a class="tm-hubs-list__link" href="/ru/hubs/programming/"><span>Programming</span></a>
    </div>
  </div>
</body>
</html>"#;

    #[test]
    fn extracts_all_fields() {
        let article = HabrExtractor.extract(1, ARTICLE).unwrap();
        assert_eq!(article.title, "Async Rust in practice / Habr");
        assert_eq!(article.text, "First paragraph. Second bold paragraph.");
        assert_eq!(article.keywords, vec!["rust", "tokio", "async"]);
        assert_eq!(article.username.as_deref(), Some("ferris"));
        assert_eq!(article.hubs, vec!["Rust*", "Programming"]);
        assert_eq!(article.published_at.as_deref(), Some("2023-05-10 12:34:56"));
        assert_eq!(article.reading_time, Some(7));
    }

    #[test]
    fn missing_content_body_is_not_found() {
        let page = "<html><head><title>Not found</title></head><body><h1>404</h1></body></html>";
        assert_eq!(
            HabrExtractor.extract(2, page),
            Err(ExtractionFailure::MissingContent)
        );
    }

    #[test]
    fn optional_fields_absent() {
        let page = r#"<html><body><div id="post-content-body"><div class="article-formatted-body">x</div></div></body></html>"#;
        let article = HabrExtractor.extract(3, page).unwrap();
        assert_eq!(article.text, "x");
        assert!(article.title.is_empty());
        assert!(article.keywords.is_empty());
        assert!(article.hubs.is_empty());
        assert_eq!(article.username, None);
        assert_eq!(article.published_at, None);
        assert_eq!(article.reading_time, None);
    }

    #[test]
    fn malformed_time_rejected() {
        let page = r#"<html><body><div id="post-content-body"></div><time datetime="yesterday"></time></body></html>"#;
        assert!(matches!(
            HabrExtractor.extract(4, page),
            Err(ExtractionFailure::Malformed(_))
        ));
    }

    #[test]
    fn time_with_offset_kept_in_local_wall_clock() {
        assert_eq!(
            format_time("2021-01-02T03:04:05+03:00").unwrap(),
            "2021-01-02 03:04:05"
        );
    }

    #[test]
    fn reading_time_label() {
        assert_eq!(parse_minutes("12 мин"), Some(12));
        assert_eq!(parse_minutes("мин"), None);
    }

    #[test]
    fn keywords_trimmed() {
        assert_eq!(split_keywords("a, b,c ,"), vec!["a", "b", "c"]);
    }
}
