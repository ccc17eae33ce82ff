mod client;
mod error;
mod normalize;
mod types;

pub use client::FirecrawlClient;
pub use error::{is_transient_message, ScrapeError, ScrapeFailure};
pub use normalize::{extract_content, has_content_fields};
pub use types::{
    truncate_chars, ExtractedContent, JobHandle, JobStatus, ScrapeConfig, ScrapeOptions,
    ScrapedPage, DEFAULT_ENDPOINT, MAX_ERROR_BODY_CHARS,
};
