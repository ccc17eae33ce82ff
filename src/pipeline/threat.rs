use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use super::signals::DEFAULT_LOCATION;
use super::Pipeline;
use crate::types::{
    LocationCount, NewThreat, Signal, SignalType, Threat, ThreatPeriod, ThreatRanking,
};
use crate::TARGET_PIPELINE;

const TOP_LOCATIONS: usize = 5;
const RECENT_SIGNALS: i64 = 5;
/// Weight of the heaviest signal type; a window made only of such signals scores 100.
const MAX_WEIGHT: f64 = 25.0;
const RECOMPUTE_DELAY: Duration = Duration::from_millis(100);

/// `round(min(100, Σ count·weight / (total·25) · 100))`, or 0 without signals.
pub fn threat_score(signal_by_type: &BTreeMap<SignalType, i64>, total_signals: i64) -> u8 {
    if total_signals <= 0 {
        return 0;
    }

    let raw: i64 = signal_by_type
        .iter()
        .map(|(signal_type, count)| count * i64::from(signal_type.weight()))
        .sum();

    let normalized = raw as f64 / (total_signals as f64 * MAX_WEIGHT) * 100.0;
    normalized.min(100.0).round() as u8
}

/// Counts signals per type and per location; each signal counts once for every location it lists.
pub fn tally_signals(
    signals: &[Signal],
) -> (BTreeMap<SignalType, i64>, BTreeMap<String, i64>) {
    let mut by_type = BTreeMap::new();
    let mut by_location = BTreeMap::new();

    for signal in signals {
        *by_type.entry(signal.signal_type).or_insert(0) += 1;

        if signal.locations.is_empty() {
            *by_location.entry(DEFAULT_LOCATION.to_string()).or_insert(0) += 1;
        }
        for location in &signal.locations {
            *by_location.entry(location.clone()).or_insert(0) += 1;
        }
    }

    (by_type, by_location)
}

/// The `n` most frequent locations, ties broken alphabetically.
pub fn top_locations(by_location: &BTreeMap<String, i64>, n: usize) -> Vec<LocationCount> {
    let mut locations: Vec<LocationCount> = by_location
        .iter()
        .map(|(location, count)| LocationCount {
            location: location.clone(),
            signal_count: *count,
        })
        .collect();
    // stable sort keeps the alphabetical order of the BTreeMap within equal counts
    locations.sort_by(|a, b| b.signal_count.cmp(&a.signal_count));
    locations.truncate(n);
    locations
}

impl Pipeline {
    /// Recomputes and stores the threat rollup of a competitor over `period`.
    pub async fn compute_threat(&self, competitor_id: i64, period: ThreatPeriod) -> Result<Threat> {
        self.compute_threat_at(competitor_id, period, Utc::now()).await
    }

    /// [`Pipeline::compute_threat`] with an explicit clock.
    pub async fn compute_threat_at(
        &self,
        competitor_id: i64,
        period: ThreatPeriod,
        now: DateTime<Utc>,
    ) -> Result<Threat> {
        let competitor = self.require_competitor(competitor_id).await?;
        let since = now - ChronoDuration::days(period.days());
        let signals = self.db.list_signals_since(competitor.id, since).await?;

        let (signal_by_type, by_location) = tally_signals(&signals);
        let signal_count = signals.len() as i64;
        let rollup = NewThreat {
            competitor_id: competitor.id,
            threat_score: threat_score(&signal_by_type, signal_count),
            signal_count,
            signal_by_type,
            top_locations: top_locations(&by_location, TOP_LOCATIONS),
            // Latest activity across all time, not just the scoring window.
            recent_signals: self.db.latest_signal_ids(competitor.id, RECENT_SIGNALS).await?,
            period,
        };

        let threat = self.db.upsert_threat(&rollup, now).await?;
        info!(
            target: TARGET_PIPELINE,
            "Threat score for {}: {}/100 from {} signals ({})",
            competitor.name, threat.threat_score, threat.signal_count, period
        );
        Ok(threat)
    }

    /// Recomputes every active competitor, one after another. Failures are logged and skipped.
    pub async fn compute_threat_for_all(&self, period: ThreatPeriod) -> Result<Vec<Threat>> {
        let competitors = self.db.list_competitors(true).await?;
        info!(target: TARGET_PIPELINE, "Computing threat for {} active competitors", competitors.len());

        let mut threats = Vec::with_capacity(competitors.len());
        for (idx, competitor) in competitors.iter().enumerate() {
            match self.compute_threat(competitor.id, period).await {
                Ok(threat) => threats.push(threat),
                Err(err) => {
                    warn!(target: TARGET_PIPELINE, "Threat computation failed for {}: {:#}", competitor.name, err)
                }
            }
            if idx + 1 < competitors.len() {
                sleep(RECOMPUTE_DELAY).await;
            }
        }
        Ok(threats)
    }

    pub async fn threat_rankings(&self, limit: i64) -> Result<Vec<ThreatRanking>> {
        Ok(self.db.threat_rankings(limit).await?)
    }
}
