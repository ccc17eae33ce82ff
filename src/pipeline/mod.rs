//! The ingestion-to-score pipeline.
//!
//! Each stage lives in its own module as an `impl Pipeline` block and reads what the previous
//! stage persisted: discovery writes news items, scraping fills them in, change detection
//! compares versions, signal extraction classifies, threat scoring rolls everything up.

mod changes;
mod discovery;
mod scraping;
mod signals;
mod sync;
mod threat;
mod traits;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::config::{Config, PipelineSettings};
use crate::db::Database;
use crate::error::PipelineError;
use crate::firecrawl::FirecrawlClient;
use crate::types::{Competitor, NewCompetitor};
use crate::TARGET_PIPELINE;

pub use changes::{change_confidence, detect_change_type};
pub use discovery::{
    direct_paths, feed_entries, google_news_url, sitemap_urls, DiscoveryReport, FeedDiscoverer,
    SITEMAP_PATH_FILTERS,
};
pub use scraping::{ScrapeOutcome, ScrapeReport};
pub use signals::{
    change_severity, content_severity, detect_signal, extract_locations, SignalBatch,
    CITY_GAZETTEER, DEFAULT_LOCATION,
};
pub use sync::{SyncOutcome, SyncReport, SyncStats};
pub use threat::{tally_signals, threat_score, top_locations};
pub use traits::{Discoverer, Scraper};

pub struct Pipeline {
    db: Database,
    scraper: Arc<dyn Scraper>,
    discoverer: Arc<dyn Discoverer>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        db: Database,
        scraper: Arc<dyn Scraper>,
        discoverer: Arc<dyn Discoverer>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            db,
            scraper,
            discoverer,
            settings,
        }
    }

    /// Wires the HTTP scrape client and feed discoverer from configuration.
    pub fn from_config(db: Database, config: &Config) -> Result<Self> {
        let scraper = FirecrawlClient::new(config.scrape.clone())?;
        let discoverer = FeedDiscoverer::new(config.industry_feeds.clone())?;
        Ok(Self::new(
            db,
            Arc::new(scraper),
            Arc::new(discoverer),
            config.pipeline.clone(),
        ))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Registers a competitor; names are unique.
    pub async fn add_competitor(&self, competitor: NewCompetitor) -> Result<Competitor> {
        if self.db.find_competitor_by_name(&competitor.name).await?.is_some() {
            return Err(PipelineError::CompetitorExists(competitor.name).into());
        }
        let created = self.db.create_competitor(&competitor).await?;
        info!(target: TARGET_PIPELINE, "Tracking competitor {} ({})", created.name, created.website);
        Ok(created)
    }

    async fn require_competitor(&self, competitor_id: i64) -> Result<Competitor, PipelineError> {
        self.db
            .get_competitor(competitor_id)
            .await?
            .ok_or(PipelineError::CompetitorNotFound(competitor_id))
    }
}
