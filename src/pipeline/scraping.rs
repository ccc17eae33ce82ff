use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::Pipeline;
use crate::error::PipelineError;
use crate::fingerprint::{hash_content, markdown_to_plain_text};
use crate::types::{NewPage, NewsItem, NewsStatus, ScrapedContent, ScrapingStats};
use crate::TARGET_PIPELINE;

/// Items scraped within this window are not fetched again.
const RECENT_SCRAPE_HOURS: i64 = 24;

/// What happened to one pending news item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScrapeOutcome {
    Scraped { news_id: i64, page_id: i64 },
    Duplicate { news_id: i64, duplicate_of: i64 },
    RecentlyScraped { news_id: i64 },
    Failed { news_id: i64, error: String },
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeReport {
    pub attempted: usize,
    pub scraped: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<ScrapeOutcome>,
}

impl ScrapeReport {
    fn record(&mut self, outcome: ScrapeOutcome) {
        self.attempted += 1;
        match outcome {
            ScrapeOutcome::Scraped { .. } => self.scraped += 1,
            ScrapeOutcome::Duplicate { .. } => self.duplicates += 1,
            ScrapeOutcome::RecentlyScraped { .. } => self.skipped += 1,
            ScrapeOutcome::Failed { .. } => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }
}

impl Pipeline {
    /// Scrapes up to `limit` DISCOVERED items of a competitor, oldest first.
    ///
    /// A failing item is marked FAILED and the batch carries on.
    pub async fn scrape_pending(&self, competitor_id: i64, limit: i64) -> Result<ScrapeReport> {
        let competitor = self.require_competitor(competitor_id).await?;
        let pending = self.db.list_pending_news(competitor.id, limit).await?;
        info!(target: TARGET_PIPELINE, "Found {} pending URLs for {}", pending.len(), competitor.name);

        let mut report = ScrapeReport::default();
        for (idx, item) in pending.iter().enumerate() {
            let outcome = match self.scrape_item(item).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(target: TARGET_PIPELINE, "Error scraping news item {} ({}): {:#}", item.id, item.url, err);
                    let reason = format!("{:#}", err);
                    if let Err(mark_err) = self.db.mark_news_failed(item.id, &reason).await {
                        error!(target: TARGET_PIPELINE, "Could not mark news item {} failed: {}", item.id, mark_err);
                    }
                    ScrapeOutcome::Failed {
                        news_id: item.id,
                        error: reason,
                    }
                }
            };
            report.record(outcome);

            if idx + 1 < pending.len() {
                sleep(self.settings.request_delay).await;
            }
        }

        info!(
            target: TARGET_PIPELINE,
            "Scraped {} of {} URLs for {} ({} duplicates, {} skipped, {} failed)",
            report.scraped, report.attempted, competitor.name, report.duplicates, report.skipped, report.failed
        );
        Ok(report)
    }

    /// Scrapes a single news item by id, regardless of its competitor's batch.
    pub async fn scrape_news(&self, news_id: i64) -> Result<ScrapeOutcome> {
        let item = self
            .db
            .get_news(news_id)
            .await?
            .ok_or(PipelineError::NewsNotFound(news_id))?;
        self.scrape_item(&item).await
    }

    async fn scrape_item(&self, item: &NewsItem) -> Result<ScrapeOutcome> {
        let now = Utc::now();
        if self
            .db
            .was_recently_scraped(
                item.competitor_id,
                &item.url_canonical,
                now - ChronoDuration::hours(RECENT_SCRAPE_HOURS),
            )
            .await?
        {
            debug!(target: TARGET_PIPELINE, "Skipping recently scraped URL: {}", item.url);
            self.db.set_news_status(item.id, NewsStatus::Skipped).await?;
            return Ok(ScrapeOutcome::RecentlyScraped { news_id: item.id });
        }

        self.db.set_news_status(item.id, NewsStatus::Scraping).await?;

        let page = match self.scraper.scrape(&item.url).await {
            Ok(page) => page,
            Err(failure) => {
                warn!(
                    target: TARGET_PIPELINE,
                    "Scraping failed for {} after {} attempt(s) (status {}): {}",
                    item.url, failure.attempts, failure.status_code, failure.error
                );
                if let Some(body) = &failure.response_body {
                    debug!(target: TARGET_PIPELINE, "Response body for {}: {}", item.url, body);
                }
                let reason = failure.to_string();
                self.db.mark_news_failed(item.id, &reason).await?;
                return Ok(ScrapeOutcome::Failed {
                    news_id: item.id,
                    error: reason,
                });
            }
        };

        let plain_text = markdown_to_plain_text(&page.markdown);
        let content_hash = hash_content(&page.markdown);

        if let Some(hash) = &content_hash {
            if let Some(original) = self
                .db
                .find_content_duplicate(item.competitor_id, hash, item.id)
                .await?
            {
                info!(target: TARGET_PIPELINE, "Duplicate content at {}, linking to news item {}", item.url, original);
                self.db.mark_news_duplicate(item.id, original).await?;
                return Ok(ScrapeOutcome::Duplicate {
                    news_id: item.id,
                    duplicate_of: original,
                });
            }
        }

        let scraped_at = Utc::now();
        let page_id = self
            .db
            .insert_page(&NewPage {
                news_id: item.id,
                competitor_id: item.competitor_id,
                url: item.url.clone(),
                title: page.title.clone().or_else(|| item.title.clone()),
                markdown: page.markdown.clone(),
                plain_text: plain_text.clone(),
                html: page.html.clone(),
                metadata: page.metadata.clone(),
                scraped_at,
                job_id: page.job_id.clone(),
            })
            .await?;

        self.db
            .mark_news_scraped(
                item.id,
                &ScrapedContent {
                    markdown: page.markdown,
                    plain_text,
                    content_hash,
                    metadata: page.metadata,
                    scraped_at,
                },
            )
            .await?;

        info!(target: TARGET_PIPELINE, "Scraped and saved: {}", item.url);
        Ok(ScrapeOutcome::Scraped {
            news_id: item.id,
            page_id,
        })
    }

    /// News counts by status for a competitor.
    pub async fn scraping_stats(&self, competitor_id: i64) -> Result<ScrapingStats> {
        let competitor = self.require_competitor(competitor_id).await?;
        Ok(self.db.news_status_counts(competitor.id).await?)
    }
}
