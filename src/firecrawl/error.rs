use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScrapeError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Client error (status {status}): {message}")]
    Client { status: u16, message: String },

    #[error("Scrape job failed: {0}")]
    JobFailed(String),

    #[error("Scrape job {job_id} timed out after {waited_ms} ms")]
    JobTimeout { job_id: String, waited_ms: u64 },

    #[error("Scrape completed without content (possibly blocked)")]
    EmptyContent,
}

impl ScrapeError {
    /// Transport problems and 5xx responses are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScrapeError::Transport(_) | ScrapeError::Server { .. })
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ScrapeError::Server { status, .. } | ScrapeError::Client { status, .. } => *status,
            _ => 0,
        }
    }
}

/// Terminal outcome of a failed scrape, after retries.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct ScrapeFailure {
    pub url: String,
    pub error: ScrapeError,
    /// HTTP status of the failing response, 0 when there was none.
    pub status_code: u16,
    /// Raw response body (truncated) when one was received.
    pub response_body: Option<String>,
    pub attempts: u32,
}

/// Heuristic for error text that points at a dropped or refused connection.
pub fn is_transient_message(message: &str) -> bool {
    const MARKERS: &[&str] = &[
        "connection refused",
        "connection reset",
        "connection closed",
        "broken pipe",
        "econnreset",
        "econnrefused",
        "etimedout",
        "socket hang up",
        "dns error",
        "error sending request",
        "temporarily unavailable",
    ];
    let lower = message.to_lowercase();
    MARKERS.iter().any(|marker| lower.contains(marker))
}
