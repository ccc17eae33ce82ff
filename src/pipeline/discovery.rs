//! URL discovery: Google News search, the competitor's sitemap, and industry feeds.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use feed_rs::model::Feed;
use feed_rs::parser;
use regex::Regex;
use reqwest::header;
use serde::Serialize;
use std::io::Cursor;
use tokio::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::traits::Discoverer;
use super::Pipeline;
use crate::config::IndustryFeed;
use crate::fingerprint::source_domain;
use crate::types::{Competitor, DiscoveredUrl, DiscoverySource, NewsItem, NewsStatus, SourceType};
use crate::{TARGET_PIPELINE, TARGET_WEB_REQUEST};

const GOOGLE_NEWS_SEARCH: &str = "https://news.google.com/rss/search";
const GOOGLE_NEWS_FEED_ID: &str = "google-news";
const GOOGLE_NEWS_LIMIT: usize = 10;
const INDUSTRY_FEED_LIMIT: usize = 5;
const SITEMAP_FEED_ID: &str = "sitemap";
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = "Mozilla/5.0 (compatible; rivalwatch/0.1)";

/// Path fragments that mark a sitemap URL as worth tracking; also the direct-path fallback.
pub const SITEMAP_PATH_FILTERS: &[&str] = &[
    "blog", "news", "press", "media", "investor", "careers", "locations",
];

/// Settled versions older than this get a fresh DISCOVERED version on rediscovery.
const REVERSION_AFTER_HOURS: i64 = 24;

/// Discovers URLs over HTTP using `reqwest` and `feed-rs`.
pub struct FeedDiscoverer {
    client: reqwest::Client,
    industry_feeds: Vec<IndustryFeed>,
}

impl FeedDiscoverer {
    pub fn new(industry_feeds: Vec<IndustryFeed>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .timeout(FETCH_TIMEOUT)
            .redirect(reqwest::redirect::Policy::default())
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            industry_feeds,
        })
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        debug!(target: TARGET_WEB_REQUEST, "Fetching {}", url);
        let response = self
            .client
            .get(url)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::ACCEPT, "application/rss+xml, application/atom+xml, application/xml, text/xml, */*;q=0.9")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("HTTP {} from {}", status.as_u16(), url));
        }
        Ok(response.text().await?)
    }

    async fn fetch_feed(&self, url: &str) -> Result<Feed> {
        let body = self.fetch_text(url).await?;
        parser::parse(Cursor::new(body.into_bytes())).map_err(|e| anyhow!("Failed to parse feed {}: {}", url, e))
    }

    async fn google_news(&self, competitor: &Competitor) -> Vec<DiscoveredUrl> {
        let feed_url = match google_news_url(&competitor.name) {
            Ok(url) => url,
            Err(err) => {
                warn!(target: TARGET_WEB_REQUEST, "Cannot build Google News query for {}: {}", competitor.name, err);
                return Vec::new();
            }
        };

        match self.fetch_feed(&feed_url).await {
            Ok(feed) => {
                let urls = feed_entries(&feed, GOOGLE_NEWS_FEED_ID, &feed_url, None, GOOGLE_NEWS_LIMIT);
                info!(target: TARGET_WEB_REQUEST, "Found {} Google News articles for {}", urls.len(), competitor.name);
                urls
            }
            Err(err) => {
                warn!(target: TARGET_WEB_REQUEST, "Google News fetch failed for {}: {}", competitor.name, err);
                Vec::new()
            }
        }
    }

    async fn website(&self, competitor: &Competitor) -> Vec<DiscoveredUrl> {
        let origin = match Url::parse(&competitor.website) {
            Ok(parsed) => parsed.origin().ascii_serialization(),
            Err(err) => {
                warn!(target: TARGET_WEB_REQUEST, "Invalid website for {} ({}): {}", competitor.name, competitor.website, err);
                return Vec::new();
            }
        };
        let sitemap_url = format!("{}/sitemap.xml", origin);

        match self.fetch_text(&sitemap_url).await {
            Ok(body) => {
                let urls = sitemap_urls(&body, &sitemap_url);
                info!(target: TARGET_WEB_REQUEST, "Found {} relevant URLs in {}", urls.len(), sitemap_url);
                urls
            }
            Err(err) => {
                warn!(target: TARGET_WEB_REQUEST, "Sitemap unavailable at {} ({}), trying direct paths", sitemap_url, err);
                direct_paths(&origin)
            }
        }
    }

    async fn industry_news(&self, competitor: &Competitor) -> Vec<DiscoveredUrl> {
        let mut urls = Vec::new();
        for feed in &self.industry_feeds {
            match self.fetch_feed(&feed.url).await {
                Ok(parsed) => {
                    let matches = feed_entries(
                        &parsed,
                        &feed.name,
                        &feed.url,
                        Some(&competitor.name),
                        INDUSTRY_FEED_LIMIT,
                    );
                    debug!(target: TARGET_WEB_REQUEST, "{} mentions {} in {} entries", feed.name, competitor.name, matches.len());
                    urls.extend(matches);
                }
                Err(err) => {
                    warn!(target: TARGET_WEB_REQUEST, "Skipping industry feed {}: {}", feed.name, err);
                }
            }
        }
        urls
    }
}

#[async_trait]
impl Discoverer for FeedDiscoverer {
    async fn discover(&self, competitor: &Competitor) -> Result<Vec<DiscoveredUrl>> {
        let mut urls = self.google_news(competitor).await;
        urls.extend(self.website(competitor).await);
        urls.extend(self.industry_news(competitor).await);
        Ok(urls)
    }
}

/// Google News RSS search URL for a query, scoped to the Indian English edition.
pub fn google_news_url(query: &str) -> Result<String> {
    let url = Url::parse_with_params(
        GOOGLE_NEWS_SEARCH,
        &[("q", query), ("hl", "en-IN"), ("gl", "IN"), ("ceid", "IN:en")],
    )?;
    Ok(url.to_string())
}

/// Turns feed entries into discovered URLs. With `mention`, only entries whose title or body
/// contains it (case-insensitive) are kept. At most `limit` entries are returned.
pub fn feed_entries(
    feed: &Feed,
    feed_id: &str,
    feed_url: &str,
    mention: Option<&str>,
    limit: usize,
) -> Vec<DiscoveredUrl> {
    let mention = mention.map(str::to_lowercase);
    let discovered_at = Utc::now();

    feed.entries
        .iter()
        .filter(|entry| match &mention {
            None => true,
            Some(needle) => {
                let title = entry.title.as_ref().map(|t| t.content.to_lowercase());
                let body = entry
                    .content
                    .as_ref()
                    .and_then(|c| c.body.as_ref())
                    .or(entry.summary.as_ref().map(|s| &s.content))
                    .map(|b| b.to_lowercase());
                title.map_or(false, |t| t.contains(needle.as_str()))
                    || body.map_or(false, |b| b.contains(needle.as_str()))
            }
        })
        .filter_map(|entry| {
            let link = entry.links.first()?.href.clone();
            Some(DiscoveredUrl {
                source_domain: source_domain(&link),
                title: entry.title.as_ref().map(|t| t.content.clone()),
                published_at: entry.published.or(entry.updated),
                source_type: SourceType::Rss,
                source: Some(DiscoverySource {
                    feed_id: feed_id.to_string(),
                    feed_url: feed_url.to_string(),
                    discovered_at,
                }),
                url: link,
            })
        })
        .take(limit)
        .collect()
}

/// `<loc>` entries of a sitemap whose URL contains one of [`SITEMAP_PATH_FILTERS`].
pub fn sitemap_urls(body: &str, sitemap_url: &str) -> Vec<DiscoveredUrl> {
    let Ok(loc) = Regex::new(r"<loc>([^<]+)</loc>") else {
        return Vec::new();
    };
    let discovered_at = Utc::now();

    loc.captures_iter(body)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .filter(|href| SITEMAP_PATH_FILTERS.iter().any(|path| href.contains(path)))
        .map(|href| DiscoveredUrl {
            source_domain: source_domain(&href),
            title: None,
            published_at: None,
            source_type: SourceType::Sitemap,
            source: Some(DiscoverySource {
                feed_id: SITEMAP_FEED_ID.to_string(),
                feed_url: sitemap_url.to_string(),
                discovered_at,
            }),
            url: href,
        })
        .collect()
}

/// Well-known section pages under `origin`, used when there is no sitemap.
pub fn direct_paths(origin: &str) -> Vec<DiscoveredUrl> {
    SITEMAP_PATH_FILTERS
        .iter()
        .map(|path| {
            let url = format!("{}/{}", origin.trim_end_matches('/'), path);
            DiscoveredUrl {
                source_domain: source_domain(&url),
                title: None,
                published_at: None,
                source_type: SourceType::SiteSearch,
                source: None,
                url,
            }
        })
        .collect()
}

/// What saving a discovery batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryReport {
    /// URLs returned by the discoverer.
    pub found: usize,
    /// New news rows written, including fresh versions of known URLs.
    pub saved: usize,
    /// Known URLs that got a fresh version.
    pub reversioned: usize,
    /// Known URLs that only gained a discovery source.
    pub sources_added: usize,
}

/// A settled version (scraped, skipped or failed) that is old enough gets a new version.
fn needs_new_version(latest: &NewsItem, now: chrono::DateTime<Utc>) -> bool {
    let settled = matches!(
        latest.status,
        NewsStatus::Scraped | NewsStatus::Skipped | NewsStatus::Failed
    );
    let last_touched = latest.scraped_at.unwrap_or(latest.created_at);
    settled && now - last_touched > ChronoDuration::hours(REVERSION_AFTER_HOURS)
}

impl Pipeline {
    /// Runs discovery for one competitor and saves the results.
    pub async fn discover(&self, competitor_id: i64) -> Result<DiscoveryReport> {
        let competitor = self.require_competitor(competitor_id).await?;
        info!(target: TARGET_PIPELINE, "Discovering URLs for {}", competitor.name);

        let urls = self.discoverer.discover(&competitor).await?;
        let report = self.save_discovered_urls(competitor.id, &urls).await?;
        info!(
            target: TARGET_PIPELINE,
            "Discovered {} URLs for {}, saved {} ({} new versions), {} known URLs gained a source",
            report.found, competitor.name, report.saved, report.reversioned, report.sources_added
        );
        Ok(report)
    }

    /// Persists discovered URLs, deduplicating by URL within the competitor.
    pub async fn save_discovered_urls(
        &self,
        competitor_id: i64,
        urls: &[DiscoveredUrl],
    ) -> Result<DiscoveryReport> {
        let mut report = DiscoveryReport {
            found: urls.len(),
            ..Default::default()
        };
        let now = Utc::now();

        for discovered in urls {
            match self.db.find_latest_news_by_url(competitor_id, &discovered.url).await? {
                None => {
                    self.db.insert_news(competitor_id, discovered, now).await?;
                    report.saved += 1;
                }
                Some(latest) if needs_new_version(&latest, now) => {
                    let id = self.db.insert_news(competitor_id, discovered, now).await?;
                    debug!(target: TARGET_PIPELINE, "New version {} of {} (previous {})", id, discovered.url, latest.id);
                    report.saved += 1;
                    report.reversioned += 1;
                }
                Some(latest) => {
                    if let Some(source) = &discovered.source {
                        if self.db.append_news_source(latest.id, source).await? {
                            report.sources_added += 1;
                        }
                    }
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Logistics</title>
    <link>https://feed.example</link>
    <description>Industry news</description>
    <item>
      <title>Acme Logistics opens new warehouse in Pune</title>
      <link>https://feed.example/acme-pune</link>
      <pubDate>Mon, 04 Mar 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Freight rates climb</title>
      <link>https://feed.example/rates</link>
      <description>Carriers including ACME LOGISTICS raised prices.</description>
    </item>
    <item>
      <title>Unrelated story</title>
      <link>https://feed.example/other</link>
    </item>
  </channel>
</rss>"#;

    fn parse(rss: &str) -> Feed {
        parser::parse(Cursor::new(rss.as_bytes().to_vec())).unwrap()
    }

    #[test]
    fn test_google_news_url() {
        let url = google_news_url("Acme Logistics").unwrap();
        assert!(url.starts_with("https://news.google.com/rss/search?q=Acme+Logistics"));
        assert!(url.contains("hl=en-IN"));
        assert!(url.contains("gl=IN"));
    }

    #[test]
    fn test_feed_entries_without_filter_respect_limit() {
        let urls = feed_entries(&parse(RSS), "google-news", "https://news.google.com/rss", None, 2);
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0].url, "https://feed.example/acme-pune");
        assert_eq!(urls[0].source_domain.as_deref(), Some("feed.example"));
        assert!(urls[0].published_at.is_some());
        assert_eq!(urls[0].source_type, SourceType::Rss);
        assert_eq!(urls[0].source.as_ref().unwrap().feed_id, "google-news");
    }

    #[test]
    fn test_feed_entries_filter_on_title_or_body() {
        let urls = feed_entries(&parse(RSS), "Inc42", "https://inc42.com/feed", Some("Acme Logistics"), 5);
        let links: Vec<_> = urls.iter().map(|u| u.url.as_str()).collect();
        assert_eq!(links, vec!["https://feed.example/acme-pune", "https://feed.example/rates"]);
    }

    #[test]
    fn test_sitemap_filtering() {
        let body = r#"<urlset>
            <url><loc>https://acme.example/blog/launch</loc></url>
            <url><loc>https://acme.example/pricing</loc></url>
            <url><loc> https://acme.example/careers </loc></url>
        </urlset>"#;
        let urls = sitemap_urls(body, "https://acme.example/sitemap.xml");
        let links: Vec<_> = urls.iter().map(|u| u.url.as_str()).collect();
        assert_eq!(links, vec!["https://acme.example/blog/launch", "https://acme.example/careers"]);
        assert!(urls.iter().all(|u| u.source_type == SourceType::Sitemap));
    }

    #[test]
    fn test_direct_paths() {
        let urls = direct_paths("https://acme.example/");
        assert_eq!(urls.len(), SITEMAP_PATH_FILTERS.len());
        assert_eq!(urls[0].url, "https://acme.example/blog");
        assert_eq!(urls[0].source_type, SourceType::SiteSearch);
    }
}
