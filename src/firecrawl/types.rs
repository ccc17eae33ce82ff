//! Type definitions and defaults for the scrape service client.

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::Duration;

use crate::types::Metadata;

// Constants
pub const DEFAULT_ENDPOINT: &str = "http://localhost:3002/v1/crawl";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const POLL_INTERVAL: Duration = Duration::from_millis(2000);
pub const POLL_REQUEST_TIMEOUT: Duration = Duration::from_millis(8000);
pub const MAX_WAIT: Duration = Duration::from_millis(90_000);
pub const MAX_RETRIES: u32 = 2;
pub const BACKOFF_BASE: Duration = Duration::from_millis(1000);
/// Raw response bodies kept for diagnostics are cut to this many characters.
pub const MAX_ERROR_BODY_CHARS: usize = 2000;

/// Connection and timing settings for [`super::FirecrawlClient`].
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub endpoint: String,
    /// Timeout for the initial submit request.
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    /// Timeout for one poll request; expiry only costs budget, it does not end polling.
    pub poll_request_timeout: Duration,
    /// Overall polling budget for one job.
    pub max_wait: Duration,
    /// Additional submit attempts after the first one.
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout: REQUEST_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            poll_request_timeout: POLL_REQUEST_TIMEOUT,
            max_wait: MAX_WAIT,
            max_retries: MAX_RETRIES,
            backoff_base: BACKOFF_BASE,
        }
    }
}

impl ScrapeConfig {
    /// `backoff_base * 2^attempt`, where `attempt` counts from zero.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Per-call options forwarded to the scrape service.
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    pub limit: u32,
    pub scrape_options: Map<String, Value>,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            limit: 1,
            scrape_options: Map::new(),
        }
    }
}

/// Body of `POST /crawl`.
#[derive(Debug, Serialize)]
pub struct CrawlRequest<'a> {
    pub url: &'a str,
    pub limit: u32,
    #[serde(rename = "scrapeOptions")]
    pub scrape_options: &'a Map<String, Value>,
}

/// Content pulled out of a scrape response, whatever its shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedContent {
    pub markdown: String,
    pub html: Option<String>,
    pub metadata: Metadata,
}

/// Successful scrape result.
#[derive(Debug, Clone)]
pub struct ScrapedPage {
    pub url: String,
    pub markdown: String,
    pub html: Option<String>,
    pub metadata: Metadata,
    pub title: Option<String>,
    /// Set when the content came from an asynchronous job.
    pub job_id: Option<String>,
    pub status_code: u16,
    pub content_length: usize,
}

impl ScrapedPage {
    pub(crate) fn from_content(
        url: &str,
        content: ExtractedContent,
        job_id: Option<String>,
        status_code: u16,
    ) -> Self {
        let title = content
            .metadata
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string);
        let content_length = content.markdown.len();
        Self {
            url: url.to_string(),
            markdown: content.markdown,
            html: content.html,
            metadata: content.metadata,
            title,
            job_id,
            status_code,
            content_length,
        }
    }
}

/// Handle returned by the service when the crawl runs asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
    pub poll_url: String,
}

impl JobHandle {
    /// Reads `{id, url}` from a submit response. Without a usable `url` the poll URL is
    /// `<endpoint>/<id>`.
    pub fn from_response(payload: &Value, endpoint: &str) -> Option<Self> {
        let id = match payload.get("id")? {
            Value::String(id) if !id.trim().is_empty() => id.clone(),
            Value::Number(id) => id.to_string(),
            _ => return None,
        };

        let poll_url = payload
            .get("url")
            .and_then(Value::as_str)
            .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}/{}", endpoint.trim_end_matches('/'), id));

        Some(Self { id, poll_url })
    }
}

/// Status reported by one poll of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Completed,
    Failed,
    InProgress(String),
}

impl JobStatus {
    pub fn from_response(payload: &Value) -> Self {
        match payload.get("status").and_then(Value::as_str) {
            Some("completed") | Some("done") => JobStatus::Completed,
            Some("failed") => JobStatus::Failed,
            Some(other) => JobStatus::InProgress(other.to_string()),
            None => JobStatus::InProgress("unknown".to_string()),
        }
    }
}

/// Cuts `text` to at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let config = ScrapeConfig::default();
        assert_eq!(config.backoff_for(0), Duration::from_millis(1000));
        assert_eq!(config.backoff_for(1), Duration::from_millis(2000));
        assert_eq!(config.backoff_for(2), Duration::from_millis(4000));
    }

    #[test]
    fn test_job_handle_prefers_poll_url() {
        let handle = JobHandle::from_response(
            &json!({"success": true, "id": "abc", "url": "http://svc/v1/crawl/abc"}),
            DEFAULT_ENDPOINT,
        )
        .unwrap();
        assert_eq!(handle.id, "abc");
        assert_eq!(handle.poll_url, "http://svc/v1/crawl/abc");
    }

    #[test]
    fn test_job_handle_falls_back_to_endpoint() {
        let handle = JobHandle::from_response(&json!({"id": 17}), "http://svc/v1/crawl/").unwrap();
        assert_eq!(handle.poll_url, "http://svc/v1/crawl/17");
        assert!(JobHandle::from_response(&json!({"success": true}), DEFAULT_ENDPOINT).is_none());
        assert!(JobHandle::from_response(&json!({"id": ""}), DEFAULT_ENDPOINT).is_none());
    }

    #[test]
    fn test_job_status() {
        assert_eq!(JobStatus::from_response(&json!({"status": "done"})), JobStatus::Completed);
        assert_eq!(JobStatus::from_response(&json!({"status": "completed"})), JobStatus::Completed);
        assert_eq!(JobStatus::from_response(&json!({"status": "failed"})), JobStatus::Failed);
        assert_eq!(
            JobStatus::from_response(&json!({"status": "scraping"})),
            JobStatus::InProgress("scraping".to_string())
        );
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
