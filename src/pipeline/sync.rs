use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, instrument};

use super::Pipeline;
use crate::types::ThreatPeriod;
use crate::TARGET_PIPELINE;

/// Counts produced by one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub discovered: usize,
    pub scraped: usize,
    pub changes_detected: usize,
    pub signals_created: usize,
    pub threat_score: u8,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub competitor_id: i64,
    pub competitor_name: String,
    pub stats: SyncStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Per-competitor result of a batch sync.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub competitor_id: i64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SyncReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Pipeline {
    /// Runs discover, scrape, change detection, signal extraction and threat scoring for one
    /// competitor, in that order. A missing competitor or a storage failure aborts the run.
    #[instrument(target = "pipeline", level = "info", skip(self))]
    pub async fn sync(&self, competitor_id: i64) -> Result<SyncReport> {
        let competitor = self.require_competitor(competitor_id).await?;
        let started_at = Utc::now();
        info!(target: TARGET_PIPELINE, "Starting sync for {}", competitor.name);

        let discovery = self.discover(competitor.id).await?;
        let scraping = self
            .scrape_pending(competitor.id, self.settings.scrape_batch_limit)
            .await?;
        let changes = self.detect_changes(competitor.id).await?;
        let signals = self.create_signals_for_pending(competitor.id).await?;
        let threat = self.compute_threat(competitor.id, ThreatPeriod::default()).await?;

        let finished_at = Utc::now();
        self.db.touch_competitor_scraped(competitor.id, finished_at).await?;
        self.db.touch_competitor_threat(competitor.id, finished_at).await?;

        let stats = SyncStats {
            discovered: discovery.saved,
            scraped: scraping.scraped,
            changes_detected: changes.len(),
            signals_created: signals.created.len(),
            threat_score: threat.threat_score,
        };
        info!(
            target: TARGET_PIPELINE,
            "Sync complete for {}: {} discovered, {} scraped, {} changes, {} signals, threat {}/100",
            competitor.name,
            stats.discovered,
            stats.scraped,
            stats.changes_detected,
            stats.signals_created,
            stats.threat_score
        );

        Ok(SyncReport {
            competitor_id: competitor.id,
            competitor_name: competitor.name,
            stats,
            started_at,
            finished_at,
        })
    }

    /// Syncs each competitor in turn; a failed run is captured in its outcome.
    pub async fn sync_many(&self, competitor_ids: &[i64]) -> Vec<SyncOutcome> {
        let mut outcomes = Vec::with_capacity(competitor_ids.len());
        for &competitor_id in competitor_ids {
            let outcome = match self.sync(competitor_id).await {
                Ok(report) => SyncOutcome {
                    competitor_id,
                    success: true,
                    report: Some(report),
                    error: None,
                },
                Err(err) => {
                    error!(target: TARGET_PIPELINE, "Sync failed for competitor {}: {:#}", competitor_id, err);
                    SyncOutcome {
                        competitor_id,
                        success: false,
                        report: None,
                        error: Some(format!("{:#}", err)),
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Syncs every active competitor.
    pub async fn sync_all(&self) -> Result<Vec<SyncOutcome>> {
        let ids: Vec<i64> = self
            .db
            .list_competitors(true)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        Ok(self.sync_many(&ids).await)
    }
}
