use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, info};

use super::Pipeline;
use crate::types::{Change, ChangeType, NewChange, NewsItem};
use crate::TARGET_PIPELINE;

/// Only items scraped within this many days are compared against earlier versions.
const CHANGE_LOOKBACK_DAYS: i64 = 7;

const BASE_CONFIDENCE: f64 = 30.0;
const KEY_PHRASE_BOOST: f64 = 15.0;

/// Keyword groups checked in order; the first group with a hit decides the change type.
const CHANGE_KEYWORDS: &[(ChangeType, &[&str])] = &[
    (ChangeType::Hiring, &["hiring", "recruiting", "job opening", "careers"]),
    (ChangeType::Expansion, &["expand", "new office", "new location", "warehouse"]),
    (ChangeType::ServiceLaunch, &["launch", "new service", "announcing", "introduce"]),
    (ChangeType::Financial, &["revenue", "funding", "investment", "ipo"]),
    (ChangeType::Regulatory, &["regulation", "compliance", "penalty"]),
    (ChangeType::Media, &["press", "media", "news"]),
];

const KEY_PHRASES: &[&str] = &[
    "announce",
    "launch",
    "expand",
    "hire",
    "hiring",
    "acquire",
    "partnership",
    "collaboration",
    "fund",
    "investment",
    "ipo",
];

/// Classifies changed content by keyword substring search; OTHER when nothing matches.
pub fn detect_change_type(text: &str) -> ChangeType {
    let lower = text.to_lowercase();
    CHANGE_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(change_type, _)| *change_type)
        .unwrap_or(ChangeType::Other)
}

/// `round(min(100, 30 + ln(len) * 10))`, plus 15 (capped at 100) when a key phrase appears.
pub fn change_confidence(text: &str) -> u8 {
    if text.is_empty() {
        return BASE_CONFIDENCE as u8;
    }

    let length = text.chars().count() as f64;
    let mut score = (BASE_CONFIDENCE + length.ln() * 10.0).min(100.0);

    let lower = text.to_lowercase();
    if KEY_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        score = (score + KEY_PHRASE_BOOST).min(100.0);
    }

    score.round() as u8
}

impl Pipeline {
    /// Compares recently scraped items with their previous versions and records changes.
    pub async fn detect_changes(&self, competitor_id: i64) -> Result<Vec<Change>> {
        let competitor = self.require_competitor(competitor_id).await?;
        let since = Utc::now() - ChronoDuration::days(CHANGE_LOOKBACK_DAYS);
        let recent = self.db.list_scraped_since(competitor.id, since).await?;
        debug!(target: TARGET_PIPELINE, "Checking {} recently scraped items of {} for changes", recent.len(), competitor.name);

        let mut changes = Vec::new();
        for item in &recent {
            if let Some(change) = self.detect_change_for(item).await? {
                changes.push(change);
            }
        }

        info!(target: TARGET_PIPELINE, "Detected {} changes for {}", changes.len(), competitor.name);
        Ok(changes)
    }

    /// Records a change for `item` if its content differs from the previous version of its URL.
    /// Returns `None` when there is nothing to record, including when a change already exists.
    pub async fn detect_change_for(&self, item: &NewsItem) -> Result<Option<Change>> {
        let Some(current_hash) = item.content_hash.as_deref() else {
            return Ok(None);
        };

        if self
            .db
            .change_exists_for_news(item.competitor_id, item.id)
            .await?
        {
            return Ok(None);
        }

        let Some(previous) = self.db.find_previous_version(item).await? else {
            return Ok(None);
        };
        let Some(previous_hash) = previous.content_hash.as_deref() else {
            return Ok(None);
        };
        if previous_hash == current_hash {
            return Ok(None);
        }

        let text = item.plain_text.as_deref().unwrap_or_default();
        let change = NewChange {
            competitor_id: item.competitor_id,
            news_id: item.id,
            url: item.url.clone(),
            previous_hash: previous_hash.to_string(),
            current_hash: current_hash.to_string(),
            change_type: detect_change_type(text),
            confidence: change_confidence(text),
            description: format!(
                "Content changed for {}",
                item.title.as_deref().unwrap_or(&item.url)
            ),
        };

        let change = self.db.insert_change(&change, Utc::now()).await?;
        info!(target: TARGET_PIPELINE, "Change detected: {} ({}, confidence {})", change.url, change.change_type, change.confidence);
        Ok(Some(change))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_type_priority() {
        assert_eq!(detect_change_type("We are HIRING drivers to expand"), ChangeType::Hiring);
        assert_eq!(detect_change_type("New warehouse opened"), ChangeType::Expansion);
        assert_eq!(detect_change_type("Introducing same-day delivery"), ChangeType::ServiceLaunch);
        assert_eq!(detect_change_type("Series B funding round"), ChangeType::Financial);
        assert_eq!(detect_change_type("Penalty imposed by the regulator"), ChangeType::Regulatory);
        assert_eq!(detect_change_type("Press kit updated"), ChangeType::Media);
        assert_eq!(detect_change_type("Pricing table edited"), ChangeType::Other);
        assert_eq!(detect_change_type(""), ChangeType::Other);
    }

    #[test]
    fn test_change_confidence() {
        assert_eq!(change_confidence(""), 30);
        // ln(1) = 0
        assert_eq!(change_confidence("x"), 30);
        // 30 + ln(100) * 10 = 76.05
        assert_eq!(change_confidence(&"x".repeat(100)), 76);
        // boosted by a key phrase: 30 + ln(14) * 10 + 15 = 71.39
        assert_eq!(change_confidence("we will launch"), 71);
        // capped
        assert_eq!(change_confidence(&"launch ".repeat(10_000)), 100);
    }
}
