use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{info, instrument};

use super::core::{decode_json, encode_json, from_millis, to_millis, Database};
use crate::types::{NewThreat, Threat, ThreatPeriod, ThreatRanking};
use crate::TARGET_DB;

const THREAT_COLUMNS: &str = "id, competitor_id, threat_score, signal_count, signal_by_type, \
     top_locations, recent_signals, last_updated, period";

fn threat_from_row(row: &SqliteRow) -> Result<Threat, sqlx::Error> {
    Ok(Threat {
        id: row.try_get("id")?,
        competitor_id: row.try_get("competitor_id")?,
        threat_score: row.try_get("threat_score")?,
        signal_count: row.try_get("signal_count")?,
        signal_by_type: decode_json(&row.try_get::<String, _>("signal_by_type")?)?,
        top_locations: decode_json(&row.try_get::<String, _>("top_locations")?)?,
        recent_signals: decode_json(&row.try_get::<String, _>("recent_signals")?)?,
        last_updated: from_millis(row.try_get("last_updated")?)?,
        period: ThreatPeriod::parse(&row.try_get::<String, _>("period")?),
    })
}

impl Database {
    /// Writes the competitor's single rollup, replacing whatever period was computed before.
    #[instrument(target = "db_query", level = "info", skip(self, threat), fields(competitor_id = threat.competitor_id))]
    pub async fn upsert_threat(
        &self,
        threat: &NewThreat,
        at: DateTime<Utc>,
    ) -> Result<Threat, sqlx::Error> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO threats (competitor_id, threat_score, signal_count, signal_by_type,
                                 top_locations, recent_signals, last_updated, period)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(competitor_id) DO UPDATE SET
                threat_score = excluded.threat_score,
                signal_count = excluded.signal_count,
                signal_by_type = excluded.signal_by_type,
                top_locations = excluded.top_locations,
                recent_signals = excluded.recent_signals,
                last_updated = excluded.last_updated,
                period = excluded.period
            RETURNING {}
            "#,
            THREAT_COLUMNS
        ))
        .bind(threat.competitor_id)
        .bind(threat.threat_score)
        .bind(threat.signal_count)
        .bind(encode_json(&threat.signal_by_type)?)
        .bind(encode_json(&threat.top_locations)?)
        .bind(encode_json(&threat.recent_signals)?)
        .bind(to_millis(at))
        .bind(threat.period.as_str())
        .fetch_one(self.pool())
        .await?;

        let stored = threat_from_row(&row)?;
        info!(target: TARGET_DB, "Threat for competitor {} is {} ({})", stored.competitor_id, stored.threat_score, stored.period);
        Ok(stored)
    }

    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn get_threat(&self, competitor_id: i64) -> Result<Option<Threat>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM threats WHERE competitor_id = ?1",
            THREAT_COLUMNS
        ))
        .bind(competitor_id)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(threat_from_row).transpose()
    }

    /// Rollups ordered by score, highest first, joined with competitor name and website.
    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn threat_rankings(&self, limit: i64) -> Result<Vec<ThreatRanking>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT t.competitor_id, c.name, c.website, t.threat_score, t.signal_count,
                   t.signal_by_type, t.top_locations, t.last_updated
            FROM threats t
            JOIN competitors c ON c.id = t.competitor_id
            ORDER BY t.threat_score DESC, t.signal_count DESC, t.competitor_id ASC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .enumerate()
            .map(|(idx, row)| {
                Ok(ThreatRanking {
                    rank: idx + 1,
                    competitor_id: row.try_get("competitor_id")?,
                    competitor_name: row.try_get("name")?,
                    website: row.try_get("website")?,
                    threat_score: row.try_get("threat_score")?,
                    signal_count: row.try_get("signal_count")?,
                    signal_by_type: decode_json(&row.try_get::<String, _>("signal_by_type")?)?,
                    top_locations: decode_json(&row.try_get::<String, _>("top_locations")?)?,
                    last_updated: from_millis(row.try_get("last_updated")?)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::core::test_support::temp_database;
    use super::*;
    use crate::types::{LocationCount, NewCompetitor, SignalType};
    use std::collections::BTreeMap;

    async fn competitor(db: &Database, name: &str) -> i64 {
        db.create_competitor(&NewCompetitor {
            name: name.to_string(),
            website: format!("https://{}.example", name.to_lowercase()),
            ..Default::default()
        })
        .await
        .unwrap()
        .id
    }

    fn rollup(competitor_id: i64, score: u8, period: ThreatPeriod) -> NewThreat {
        NewThreat {
            competitor_id,
            threat_score: score,
            signal_count: 3,
            signal_by_type: BTreeMap::from([(SignalType::Hiring, 2), (SignalType::Expansion, 1)]),
            top_locations: vec![LocationCount {
                location: "Delhi".to_string(),
                signal_count: 3,
            }],
            recent_signals: vec![3, 2, 1],
            period,
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_across_periods() {
        let (db, _dir) = temp_database().await;
        let cid = competitor(&db, "Acme").await;

        let first = db.upsert_threat(&rollup(cid, 87, ThreatPeriod::SevenDays), Utc::now()).await.unwrap();
        let second = db.upsert_threat(&rollup(cid, 40, ThreatPeriod::ThirtyDays), Utc::now()).await.unwrap();
        assert_eq!(first.id, second.id);

        let stored = db.get_threat(cid).await.unwrap().unwrap();
        assert_eq!(stored.threat_score, 40);
        assert_eq!(stored.period, ThreatPeriod::ThirtyDays);
        assert_eq!(stored.signal_by_type.get(&SignalType::Hiring), Some(&2));
        assert_eq!(stored.recent_signals, vec![3, 2, 1]);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM threats")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_rankings_order_by_score() {
        let (db, _dir) = temp_database().await;
        let low = competitor(&db, "Low").await;
        let high = competitor(&db, "High").await;
        db.upsert_threat(&rollup(low, 20, ThreatPeriod::ThirtyDays), Utc::now()).await.unwrap();
        db.upsert_threat(&rollup(high, 87, ThreatPeriod::ThirtyDays), Utc::now()).await.unwrap();

        let rankings = db.threat_rankings(10).await.unwrap();
        assert_eq!(rankings.len(), 2);
        assert_eq!(rankings[0].competitor_name, "High");
        assert_eq!(rankings[0].rank, 1);
        assert_eq!(rankings[1].competitor_id, low);
        assert_eq!(db.threat_rankings(1).await.unwrap().len(), 1);
    }
}
