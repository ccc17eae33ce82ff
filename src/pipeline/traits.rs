// Seams between the pipeline and the network. The orchestrator only talks to these traits,
// so tests can drive a full sync with in-process fakes.

use anyhow::Result;
use async_trait::async_trait;

use crate::firecrawl::{FirecrawlClient, ScrapeFailure, ScrapeOptions, ScrapedPage};
use crate::types::{Competitor, DiscoveredUrl};

#[async_trait]
pub trait Scraper: Send + Sync {
    /// Fetch one URL as markdown. Failures carry their classified reason.
    async fn scrape(&self, url: &str) -> std::result::Result<ScrapedPage, ScrapeFailure>;
}

#[async_trait]
impl Scraper for FirecrawlClient {
    async fn scrape(&self, url: &str) -> std::result::Result<ScrapedPage, ScrapeFailure> {
        FirecrawlClient::scrape(self, url, &ScrapeOptions::default()).await
    }
}

#[async_trait]
pub trait Discoverer: Send + Sync {
    /// Enumerate candidate URLs for a competitor. Individual feed failures are skipped, not
    /// returned.
    async fn discover(&self, competitor: &Competitor) -> Result<Vec<DiscoveredUrl>>;
}
