use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::Pipeline;
use crate::types::{
    Change, Metadata, NewSignal, NewsItem, Severity, Signal, SignalOrigin, SignalType,
};
use crate::TARGET_PIPELINE;

/// Major Indian cities recognised in signal text.
pub const CITY_GAZETTEER: &[&str] = &[
    "Delhi",
    "Mumbai",
    "Bangalore",
    "Hyderabad",
    "Chennai",
    "Kolkata",
    "Pune",
    "Ahmedabad",
    "Jaipur",
    "Lucknow",
    "Kanpur",
    "Nagpur",
    "Indore",
    "Thane",
    "Bhopal",
    "Visakhapatnam",
    "Patna",
    "Vadodara",
    "Ghaziabad",
    "Ludhiana",
    "Surat",
    "Chandigarh",
    "Kota",
    "Agra",
];

/// Used when no gazetteer city is mentioned.
pub const DEFAULT_LOCATION: &str = "India";

/// Keyword groups in priority order, with the fixed confidence of each type.
const SIGNAL_KEYWORDS: &[(SignalType, u8, &[&str])] = &[
    (SignalType::Expansion, 75, &["expand", "new office", "new location", "new warehouse"]),
    (SignalType::Hiring, 85, &["hiring", "recruit", "job opening", "careers"]),
    (SignalType::ServiceLaunch, 70, &["launch", "introduce", "announce", "new service"]),
    (SignalType::ClientWin, 65, &["partnership", "collaborate", "client", "won"]),
    (SignalType::Financial, 80, &["fund", "investment", "revenue", "profit", "ipo"]),
    (SignalType::Regulatory, 70, &["regulation", "compliance", "license", "permit"]),
    (SignalType::Media, 50, &["featured", "mention", "award"]),
];

const OTHER_CONFIDENCE: u8 = 30;

/// Signals per run drawn from scraped content and from recent changes.
const SIGNAL_SOURCE_LIMIT: i64 = 20;
const CHANGE_WINDOW_HOURS: i64 = 24;
const DESCRIPTION_CHARS: usize = 500;

const DETECTED_FROM_NEWS: &str = "NEWS_CONTENT";
const DETECTED_FROM_CHANGE: &str = "CHANGE_DETECTION";

/// Classifies `title + " " + content`; the first keyword group with a hit wins.
pub fn detect_signal(title: &str, content: &str) -> (SignalType, u8) {
    let text = format!("{} {}", title, content).to_lowercase();
    SIGNAL_KEYWORDS
        .iter()
        .find(|(_, _, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(signal_type, confidence, _)| (*signal_type, *confidence))
        .unwrap_or((SignalType::Other, OTHER_CONFIDENCE))
}

/// Gazetteer cities mentioned in `text`, or the country default when there are none.
pub fn extract_locations(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut locations: Vec<String> = CITY_GAZETTEER
        .iter()
        .filter(|city| lower.contains(&city.to_lowercase()))
        .map(|city| city.to_string())
        .collect();

    if locations.is_empty() {
        locations.push(DEFAULT_LOCATION.to_string());
    }
    locations
}

/// Severity of a signal derived from scraped content.
pub fn content_severity(signal_type: SignalType, confidence: u8) -> Severity {
    let critical_type = matches!(
        signal_type,
        SignalType::Expansion | SignalType::Hiring | SignalType::Financial
    );
    if confidence >= 80 && critical_type {
        Severity::Critical
    } else if confidence >= 60 {
        Severity::High
    } else if confidence >= 40 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Severity of a signal derived from a change record; fixed per type.
pub fn change_severity(signal_type: SignalType) -> Severity {
    match signal_type {
        SignalType::Hiring | SignalType::Expansion | SignalType::Financial => Severity::High,
        SignalType::ServiceLaunch | SignalType::Regulatory => Severity::Medium,
        SignalType::Media | SignalType::Other => Severity::Low,
        // Changes are never classified as client wins.
        SignalType::ClientWin => Severity::Medium,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Result of one signal pass over a competitor.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalBatch {
    /// Signals written by this pass.
    pub created: Vec<Signal>,
    /// Sources that already had their signal.
    pub existing: usize,
    /// Sources that could not be processed.
    pub failed: usize,
}

impl SignalBatch {
    fn record(&mut self, signal: Signal, created: bool) {
        if created {
            self.created.push(signal);
        } else {
            self.existing += 1;
        }
    }
}

impl Pipeline {
    /// Creates signals from scraped content and from changes of the last 24 hours.
    ///
    /// A news item whose signal cannot be written is marked FAILED; a failing change is only
    /// logged. Neither stops the pass.
    pub async fn create_signals_for_pending(&self, competitor_id: i64) -> Result<SignalBatch> {
        let competitor = self.require_competitor(competitor_id).await?;
        let mut batch = SignalBatch::default();

        let candidates = self
            .db
            .list_signal_candidates(competitor.id, SIGNAL_SOURCE_LIMIT)
            .await?;
        debug!(target: TARGET_PIPELINE, "Found {} news items for signal creation", candidates.len());
        for item in &candidates {
            match self.create_signal_from_news(item).await {
                Ok((signal, created)) => batch.record(signal, created),
                Err(err) => {
                    warn!(target: TARGET_PIPELINE, "Could not create signal for news item {}: {:#}", item.id, err);
                    let reason = format!("Signal extraction failed: {:#}", err);
                    if let Err(mark_err) = self.db.mark_news_failed(item.id, &reason).await {
                        error!(target: TARGET_PIPELINE, "Could not mark news item {} failed: {}", item.id, mark_err);
                    }
                    batch.failed += 1;
                }
            }
        }

        let since = Utc::now() - ChronoDuration::hours(CHANGE_WINDOW_HOURS);
        let changes = self
            .db
            .list_changes_since(competitor.id, since, SIGNAL_SOURCE_LIMIT)
            .await?;
        debug!(target: TARGET_PIPELINE, "Found {} change records for signal creation", changes.len());
        for change in &changes {
            match self.create_signal_from_change(change).await {
                Ok((signal, created)) => batch.record(signal, created),
                Err(err) => {
                    warn!(target: TARGET_PIPELINE, "Could not create signal for change {}: {:#}", change.id, err);
                    batch.failed += 1;
                }
            }
        }

        info!(
            target: TARGET_PIPELINE,
            "Created {} signals for {} ({} already present, {} failed)",
            batch.created.len(), competitor.name, batch.existing, batch.failed
        );
        Ok(batch)
    }

    /// Returns the content signal of a news item, creating it if needed. The flag is true when
    /// the signal was created by this call.
    pub async fn create_signal_from_news(&self, item: &NewsItem) -> Result<(Signal, bool)> {
        let title = item.title.as_deref().unwrap_or_default();
        let text = item.plain_text.as_deref().unwrap_or_default();
        let (signal_type, confidence) = detect_signal(title, text);

        if let Some(existing) = self
            .db
            .find_signal_by_origin(item.competitor_id, SignalOrigin::News(item.id), signal_type)
            .await?
        {
            debug!(target: TARGET_PIPELINE, "Signal already exists for news item {}", item.id);
            return Ok((existing, false));
        }

        let mut metadata = Metadata::new();
        metadata.insert("detectedFrom".to_string(), json!(DETECTED_FROM_NEWS));
        metadata.insert("newsTitle".to_string(), json!(item.title));
        metadata.insert("newsUrl".to_string(), json!(item.url));

        let signal = NewSignal {
            competitor_id: item.competitor_id,
            news_id: Some(item.id),
            change_id: None,
            signal_type,
            title: format!("{}: {}", signal_type, item.title.as_deref().unwrap_or(&item.url)),
            description: Some(truncate(text, DESCRIPTION_CHARS)).filter(|d| !d.is_empty()),
            confidence,
            severity: content_severity(signal_type, confidence),
            locations: extract_locations(text),
            source_ids: vec![item.id],
            metadata,
        };

        let created = self.db.insert_signal(&signal, Utc::now()).await?;
        info!(target: TARGET_PIPELINE, "Created {} signal for {}", created.signal_type, item.url);
        Ok((created, true))
    }

    /// Returns the signal of a change record, creating it if needed.
    pub async fn create_signal_from_change(&self, change: &Change) -> Result<(Signal, bool)> {
        let signal_type = SignalType::from(change.change_type);

        if let Some(existing) = self
            .db
            .find_signal_by_origin(change.competitor_id, SignalOrigin::Change(change.id), signal_type)
            .await?
        {
            debug!(target: TARGET_PIPELINE, "Signal already exists for change {}", change.id);
            return Ok((existing, false));
        }

        let locations = match self.db.get_news(change.news_id).await? {
            Some(news) => extract_locations(news.plain_text.as_deref().unwrap_or_default()),
            None => vec![DEFAULT_LOCATION.to_string()],
        };

        let mut metadata = Metadata::new();
        metadata.insert("detectedFrom".to_string(), json!(DETECTED_FROM_CHANGE));
        metadata.insert("changeId".to_string(), json!(change.id));
        metadata.insert("url".to_string(), json!(change.url));

        let signal = NewSignal {
            competitor_id: change.competitor_id,
            news_id: Some(change.news_id),
            change_id: Some(change.id),
            signal_type,
            title: format!("{}: {}", signal_type, change.description),
            description: Some(change.description.clone()),
            confidence: change.confidence,
            severity: change_severity(signal_type),
            locations,
            source_ids: vec![change.news_id],
            metadata,
        };

        let created = self.db.insert_signal(&signal, Utc::now()).await?;
        info!(target: TARGET_PIPELINE, "Created {} signal from change {}", created.signal_type, change.id);
        Ok((created, true))
    }
}
