//! HTTP client for the scrape service: submit, poll, retry.

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, warn};

use super::error::{is_transient_message, ScrapeError, ScrapeFailure};
use super::normalize::{extract_content, has_content_fields};
use super::types::{
    truncate_chars, CrawlRequest, JobHandle, JobStatus, ScrapeConfig, ScrapeOptions, ScrapedPage,
    MAX_ERROR_BODY_CHARS,
};
use crate::TARGET_WEB_REQUEST;

/// Error raised by a single attempt, before retry bookkeeping.
struct AttemptError {
    error: ScrapeError,
    status_code: u16,
    response_body: Option<String>,
}

impl AttemptError {
    fn new(error: ScrapeError) -> Self {
        let status_code = error.status_code();
        Self {
            error,
            status_code,
            response_body: None,
        }
    }

    fn with_body(mut self, body: &str) -> Self {
        if !body.is_empty() {
            self.response_body = Some(truncate_chars(body, MAX_ERROR_BODY_CHARS));
        }
        self
    }
}

/// Result of one poll request.
enum PollOutcome {
    Completed(Value, u16),
    Failed(String, String),
    InProgress(String),
    /// The poll request itself timed out or hiccuped; polling carries on.
    Skipped(String),
}

pub struct FirecrawlClient {
    client: reqwest::Client,
    config: ScrapeConfig,
}

impl FirecrawlClient {
    pub fn new(config: ScrapeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    /// Scrape one URL, retrying transport failures and 5xx responses with exponential backoff.
    pub async fn scrape(
        &self,
        url: &str,
        options: &ScrapeOptions,
    ) -> std::result::Result<ScrapedPage, ScrapeFailure> {
        info!(target: TARGET_WEB_REQUEST, "Scraping: {}", url);
        let mut attempt: u32 = 0;

        loop {
            match self.scrape_once(url, options).await {
                Ok(page) => {
                    info!(target: TARGET_WEB_REQUEST, "Scraped: {} ({} bytes of markdown)", url, page.content_length);
                    return Ok(page);
                }
                Err(failure) => {
                    if failure.error.is_retryable() && attempt < self.config.max_retries {
                        let delay = self.config.backoff_for(attempt);
                        warn!(
                            target: TARGET_WEB_REQUEST,
                            "Scrape attempt {}/{} for {} failed: {}; retrying in {:?}",
                            attempt + 1,
                            self.config.max_retries + 1,
                            url,
                            failure.error,
                            delay
                        );
                        sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    error!(target: TARGET_WEB_REQUEST, "Scrape failed for {} after {} attempt(s): {}", url, attempt + 1, failure.error);
                    return Err(ScrapeFailure {
                        url: url.to_string(),
                        error: failure.error,
                        status_code: failure.status_code,
                        response_body: failure.response_body,
                        attempts: attempt + 1,
                    });
                }
            }
        }
    }

    /// Scrape URLs one after another with `delay` between requests.
    pub async fn scrape_many(
        &self,
        urls: &[String],
        options: &ScrapeOptions,
        delay: Duration,
    ) -> Vec<std::result::Result<ScrapedPage, ScrapeFailure>> {
        let mut results = Vec::with_capacity(urls.len());
        for (idx, url) in urls.iter().enumerate() {
            results.push(self.scrape(url, options).await);
            if idx + 1 < urls.len() {
                sleep(delay).await;
            }
        }
        results
    }

    async fn scrape_once(
        &self,
        url: &str,
        options: &ScrapeOptions,
    ) -> std::result::Result<ScrapedPage, AttemptError> {
        let request = CrawlRequest {
            url,
            limit: options.limit,
            scrape_options: &options.scrape_options,
        };

        debug!(target: TARGET_WEB_REQUEST, "Submitting crawl for {} to {}", url, self.config.endpoint);
        let response = self
            .client
            .post(&self.config.endpoint)
            .timeout(self.config.request_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| AttemptError::new(ScrapeError::Transport(e.to_string())))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AttemptError::new(ScrapeError::Transport(e.to_string())))?;

        check_status(status, &body)?;

        let payload: Value = serde_json::from_str(&body).map_err(|e| {
            AttemptError::new(ScrapeError::Client {
                status: status.as_u16(),
                message: format!("Malformed scrape response: {}", e),
            })
            .with_body(&body)
        })?;

        if let Some(content) = extract_content(&payload) {
            debug!(target: TARGET_WEB_REQUEST, "Synchronous scrape result for {}", url);
            return Ok(ScrapedPage::from_content(url, content, None, status.as_u16()));
        }

        if let Some(handle) = JobHandle::from_response(&payload, &self.config.endpoint) {
            return self.poll_job(url, &handle).await;
        }

        if payload.get("success").and_then(Value::as_bool) == Some(false) {
            let message = payload
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("Scrape service reported failure")
                .to_string();
            return Err(AttemptError::new(ScrapeError::Client {
                status: status.as_u16(),
                message,
            })
            .with_body(&body));
        }

        if has_content_fields(&payload) {
            return Err(AttemptError::new(ScrapeError::EmptyContent).with_body(&body));
        }

        Err(AttemptError::new(ScrapeError::Client {
            status: status.as_u16(),
            message: "Unrecognised scrape response".to_string(),
        })
        .with_body(&body))
    }

    /// Poll a job until it completes, fails, or the wait budget runs out.
    async fn poll_job(
        &self,
        url: &str,
        handle: &JobHandle,
    ) -> std::result::Result<ScrapedPage, AttemptError> {
        info!(target: TARGET_WEB_REQUEST, "Crawl job {} started for {}, polling {}", handle.id, url, handle.poll_url);
        let started = Instant::now();
        let mut polls: u32 = 0;

        loop {
            let elapsed = started.elapsed();
            if elapsed >= self.config.max_wait {
                warn!(target: TARGET_WEB_REQUEST, "Crawl job {} timed out after {} polls", handle.id, polls);
                return Err(AttemptError::new(ScrapeError::JobTimeout {
                    job_id: handle.id.clone(),
                    waited_ms: elapsed.as_millis() as u64,
                }));
            }

            polls += 1;
            let poll_timeout = self
                .config
                .poll_request_timeout
                .min(self.config.max_wait - elapsed);
            match self.poll_once(handle, poll_timeout).await? {
                PollOutcome::Completed(payload, status) => {
                    debug!(target: TARGET_WEB_REQUEST, "Crawl job {} completed after {} polls", handle.id, polls);
                    return match extract_content(&payload) {
                        Some(content) => Ok(ScrapedPage::from_content(
                            url,
                            content,
                            Some(handle.id.clone()),
                            status,
                        )),
                        None => {
                            let body = payload.to_string();
                            Err(AttemptError::new(ScrapeError::EmptyContent).with_body(&body))
                        }
                    };
                }
                PollOutcome::Failed(message, body) => {
                    return Err(AttemptError::new(ScrapeError::JobFailed(message)).with_body(&body));
                }
                PollOutcome::InProgress(status) => {
                    debug!(target: TARGET_WEB_REQUEST, "Crawl job {} still {} (poll {})", handle.id, status, polls);
                }
                PollOutcome::Skipped(reason) => {
                    warn!(target: TARGET_WEB_REQUEST, "Poll {} for crawl job {} failed: {}", polls, handle.id, reason);
                }
            }

            let remaining = self.config.max_wait.saturating_sub(started.elapsed());
            sleep(self.config.poll_interval.min(remaining)).await;
        }
    }

    /// One poll request, bounded by `timeout` (never more than the budget left).
    async fn poll_once(
        &self,
        handle: &JobHandle,
        timeout: Duration,
    ) -> std::result::Result<PollOutcome, AttemptError> {
        let response = match self
            .client
            .get(&handle.poll_url)
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                return Ok(PollOutcome::Skipped(format!(
                    "poll request timed out after {:?}",
                    timeout
                )));
            }
            Err(err) => {
                let message = err.to_string();
                if err.is_connect() || is_transient_message(&message) {
                    return Err(AttemptError::new(ScrapeError::Transport(message)));
                }
                return Ok(PollOutcome::Skipped(message));
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) if err.is_timeout() => {
                return Ok(PollOutcome::Skipped("poll response body timed out".to_string()));
            }
            Err(err) => return Err(AttemptError::new(ScrapeError::Transport(err.to_string()))),
        };

        check_status(status, &body)?;

        let payload: Value = serde_json::from_str(&body).map_err(|e| {
            AttemptError::new(ScrapeError::Client {
                status: status.as_u16(),
                message: format!("Malformed job response: {}", e),
            })
            .with_body(&body)
        })?;

        Ok(match JobStatus::from_response(&payload) {
            JobStatus::Completed => PollOutcome::Completed(payload, status.as_u16()),
            JobStatus::Failed => {
                let message = payload
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("Crawl job failed")
                    .to_string();
                PollOutcome::Failed(message, body)
            }
            JobStatus::InProgress(status) => PollOutcome::InProgress(status),
        })
    }
}

fn check_status(status: StatusCode, body: &str) -> std::result::Result<(), AttemptError> {
    if status.is_server_error() {
        return Err(AttemptError::new(ScrapeError::Server {
            status: status.as_u16(),
            message: truncate_chars(body, 200),
        })
        .with_body(body));
    }
    if status.is_client_error() {
        return Err(AttemptError::new(ScrapeError::Client {
            status: status.as_u16(),
            message: truncate_chars(body, 200),
        })
        .with_body(body));
    }
    Ok(())
}
