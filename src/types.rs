//! Data model shared by the persistence layer and the pipeline stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Schemaless payload attached to signals and pages.
pub type Metadata = Map<String, Value>;

/// Returned when a stored enum string does not name a known variant.
#[derive(Debug, Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// Lifecycle of a discovered URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NewsStatus {
    Discovered,
    Scraping,
    Scraped,
    Failed,
    Skipped,
}

string_enum!(NewsStatus, "news status", {
    Discovered => "DISCOVERED",
    Scraping => "SCRAPING",
    Scraped => "SCRAPED",
    Failed => "FAILED",
    Skipped => "SKIPPED",
});

/// Where a URL was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    Rss,
    Sitemap,
    SiteSearch,
    Manual,
}

string_enum!(SourceType, "source type", {
    Rss => "RSS",
    Sitemap => "SITEMAP",
    SiteSearch => "SITE_SEARCH",
    Manual => "MANUAL",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    Expansion,
    Hiring,
    ServiceLaunch,
    ClientWin,
    Financial,
    Regulatory,
    Media,
    Other,
}

string_enum!(SignalType, "signal type", {
    Expansion => "EXPANSION",
    Hiring => "HIRING",
    ServiceLaunch => "SERVICE_LAUNCH",
    ClientWin => "CLIENT_WIN",
    Financial => "FINANCIAL",
    Regulatory => "REGULATORY",
    Media => "MEDIA",
    Other => "OTHER",
});

impl SignalType {
    /// Contribution of one signal of this type to the raw threat score.
    pub fn weight(&self) -> u32 {
        match self {
            SignalType::Expansion => 25,
            SignalType::Hiring => 20,
            SignalType::ServiceLaunch => 15,
            SignalType::ClientWin => 15,
            SignalType::Financial => 20,
            SignalType::Regulatory => 15,
            SignalType::Media => 5,
            SignalType::Other => 5,
        }
    }
}

/// Heuristic classification of a content change. CLIENT_WIN has no change counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Hiring,
    Expansion,
    ServiceLaunch,
    Financial,
    Regulatory,
    Media,
    Other,
}

string_enum!(ChangeType, "change type", {
    Hiring => "HIRING",
    Expansion => "EXPANSION",
    ServiceLaunch => "SERVICE_LAUNCH",
    Financial => "FINANCIAL",
    Regulatory => "REGULATORY",
    Media => "MEDIA",
    Other => "OTHER",
});

impl From<ChangeType> for SignalType {
    fn from(change: ChangeType) -> Self {
        match change {
            ChangeType::Hiring => SignalType::Hiring,
            ChangeType::Expansion => SignalType::Expansion,
            ChangeType::ServiceLaunch => SignalType::ServiceLaunch,
            ChangeType::Financial => SignalType::Financial,
            ChangeType::Regulatory => SignalType::Regulatory,
            ChangeType::Media => SignalType::Media,
            ChangeType::Other => SignalType::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

string_enum!(Severity, "severity", {
    Low => "LOW",
    Medium => "MEDIUM",
    High => "HIGH",
    Critical => "CRITICAL",
});

/// Scoring window for a threat rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreatPeriod {
    #[serde(rename = "7D")]
    SevenDays,
    #[serde(rename = "30D")]
    ThirtyDays,
    #[serde(rename = "OVERALL")]
    Overall,
}

impl ThreatPeriod {
    /// Lenient parse: anything that is not `7D` or `OVERALL` means the 30 day window.
    pub fn parse(period: &str) -> Self {
        match period {
            "7D" => ThreatPeriod::SevenDays,
            "OVERALL" => ThreatPeriod::Overall,
            _ => ThreatPeriod::ThirtyDays,
        }
    }

    pub fn days(&self) -> i64 {
        match self {
            ThreatPeriod::SevenDays => 7,
            ThreatPeriod::ThirtyDays => 30,
            ThreatPeriod::Overall => 365,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatPeriod::SevenDays => "7D",
            ThreatPeriod::ThirtyDays => "30D",
            ThreatPeriod::Overall => "OVERALL",
        }
    }
}

impl Default for ThreatPeriod {
    fn default() -> Self {
        ThreatPeriod::ThirtyDays
    }
}

impl fmt::Display for ThreatPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked competitor.
#[derive(Debug, Clone, Serialize)]
pub struct Competitor {
    pub id: i64,
    pub name: String,
    pub website: String,
    pub industry: Option<String>,
    pub description: Option<String>,
    pub locations: Vec<String>,
    pub active: bool,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub last_threat_computed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewCompetitor {
    pub name: String,
    pub website: String,
    pub industry: Option<String>,
    pub description: Option<String>,
    pub locations: Vec<String>,
}

/// One feed or sitemap that reported a URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverySource {
    pub feed_id: String,
    pub feed_url: String,
    pub discovered_at: DateTime<Utc>,
}

/// A URL reported by discovery, before it is persisted.
#[derive(Debug, Clone)]
pub struct DiscoveredUrl {
    pub url: String,
    pub title: Option<String>,
    pub source_type: SourceType,
    pub source_domain: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub source: Option<DiscoverySource>,
}

/// A discovered URL for one competitor ("news" record).
#[derive(Debug, Clone, Serialize)]
pub struct NewsItem {
    pub id: i64,
    pub competitor_id: i64,
    pub title: Option<String>,
    pub url: String,
    pub url_canonical: String,
    pub source_type: SourceType,
    pub source_domain: Option<String>,
    pub sources: Vec<DiscoverySource>,
    pub published_at: Option<DateTime<Utc>>,
    pub scraped_at: Option<DateTime<Utc>>,
    pub markdown: Option<String>,
    pub plain_text: Option<String>,
    pub content_hash: Option<String>,
    pub metadata: Metadata,
    pub status: NewsStatus,
    pub scrape_error: Option<String>,
    pub is_duplicate: bool,
    pub duplicate_of: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Content written onto a news item when its scrape succeeds.
#[derive(Debug, Clone)]
pub struct ScrapedContent {
    pub markdown: String,
    pub plain_text: String,
    pub content_hash: Option<String>,
    pub metadata: Metadata,
    pub scraped_at: DateTime<Utc>,
}

/// Snapshot of one scrape.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub id: i64,
    pub news_id: i64,
    pub competitor_id: i64,
    pub url: String,
    pub title: Option<String>,
    pub markdown: String,
    pub plain_text: String,
    pub html: Option<String>,
    pub metadata: Metadata,
    pub scraped_at: DateTime<Utc>,
    pub job_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPage {
    pub news_id: i64,
    pub competitor_id: i64,
    pub url: String,
    pub title: Option<String>,
    pub markdown: String,
    pub plain_text: String,
    pub html: Option<String>,
    pub metadata: Metadata,
    pub scraped_at: DateTime<Utc>,
    pub job_id: Option<String>,
}

/// Immutable record of a content change between two scrapes of the same URL.
#[derive(Debug, Clone, Serialize)]
pub struct Change {
    pub id: i64,
    pub competitor_id: i64,
    pub news_id: i64,
    pub url: String,
    pub previous_hash: String,
    pub current_hash: String,
    pub change_type: ChangeType,
    pub confidence: u8,
    pub description: String,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewChange {
    pub competitor_id: i64,
    pub news_id: i64,
    pub url: String,
    pub previous_hash: String,
    pub current_hash: String,
    pub change_type: ChangeType,
    pub confidence: u8,
    pub description: String,
}

/// What a signal was derived from; part of its dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOrigin {
    News(i64),
    Change(i64),
}

/// Immutable business signal.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub id: i64,
    pub competitor_id: i64,
    pub news_id: Option<i64>,
    pub change_id: Option<i64>,
    pub signal_type: SignalType,
    pub title: String,
    pub description: Option<String>,
    pub confidence: u8,
    pub severity: Severity,
    pub locations: Vec<String>,
    pub source_ids: Vec<i64>,
    pub source_count: i64,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSignal {
    pub competitor_id: i64,
    pub news_id: Option<i64>,
    pub change_id: Option<i64>,
    pub signal_type: SignalType,
    pub title: String,
    pub description: Option<String>,
    pub confidence: u8,
    pub severity: Severity,
    pub locations: Vec<String>,
    pub source_ids: Vec<i64>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationCount {
    pub location: String,
    pub signal_count: i64,
}

/// The single mutable threat rollup kept per competitor.
#[derive(Debug, Clone, Serialize)]
pub struct Threat {
    pub id: i64,
    pub competitor_id: i64,
    pub threat_score: u8,
    pub signal_count: i64,
    pub signal_by_type: std::collections::BTreeMap<SignalType, i64>,
    pub top_locations: Vec<LocationCount>,
    pub recent_signals: Vec<i64>,
    pub last_updated: DateTime<Utc>,
    pub period: ThreatPeriod,
}

#[derive(Debug, Clone)]
pub struct NewThreat {
    pub competitor_id: i64,
    pub threat_score: u8,
    pub signal_count: i64,
    pub signal_by_type: std::collections::BTreeMap<SignalType, i64>,
    pub top_locations: Vec<LocationCount>,
    pub recent_signals: Vec<i64>,
    pub period: ThreatPeriod,
}

/// Row of the threat leaderboard.
#[derive(Debug, Clone, Serialize)]
pub struct ThreatRanking {
    pub rank: usize,
    pub competitor_id: i64,
    pub competitor_name: String,
    pub website: String,
    pub threat_score: u8,
    pub signal_count: i64,
    pub signal_by_type: std::collections::BTreeMap<SignalType, i64>,
    pub top_locations: Vec<LocationCount>,
    pub last_updated: DateTime<Utc>,
}

/// News item counts by lifecycle status for one competitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScrapingStats {
    pub total: i64,
    pub discovered: i64,
    pub scraping: i64,
    pub scraped: i64,
    pub failed: i64,
    pub skipped: i64,
    pub duplicates: i64,
}

impl ScrapingStats {
    pub fn add(&mut self, status: NewsStatus, count: i64) {
        self.total += count;
        match status {
            NewsStatus::Discovered => self.discovered += count,
            NewsStatus::Scraping => self.scraping += count,
            NewsStatus::Scraped => self.scraped += count,
            NewsStatus::Failed => self.failed += count,
            NewsStatus::Skipped => self.skipped += count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scraping_stats_accumulate() {
        let mut stats = ScrapingStats::default();
        stats.add(NewsStatus::Scraped, 3);
        stats.add(NewsStatus::Failed, 1);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.scraped, 3);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn test_enum_round_trip_through_strings() {
        assert_eq!("SERVICE_LAUNCH".parse::<SignalType>().unwrap(), SignalType::ServiceLaunch);
        assert_eq!(NewsStatus::Skipped.as_str(), "SKIPPED");
        assert!("SOMETHING".parse::<Severity>().is_err());
    }

    #[test]
    fn test_threat_period_parse_is_lenient() {
        assert_eq!(ThreatPeriod::parse("7D").days(), 7);
        assert_eq!(ThreatPeriod::parse("OVERALL").days(), 365);
        assert_eq!(ThreatPeriod::parse("30D").days(), 30);
        assert_eq!(ThreatPeriod::parse("90D"), ThreatPeriod::ThirtyDays);
        assert_eq!(ThreatPeriod::parse(""), ThreatPeriod::ThirtyDays);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_change_type_maps_onto_signal_type() {
        assert_eq!(SignalType::from(ChangeType::Hiring), SignalType::Hiring);
        assert_eq!(SignalType::from(ChangeType::Other), SignalType::Other);
    }
}
