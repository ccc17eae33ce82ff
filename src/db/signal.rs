use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, instrument};

use super::core::{decode_enum, decode_json, encode_json, from_millis, to_millis, Database};
use crate::types::{NewSignal, Signal, SignalOrigin, SignalType};
use crate::TARGET_DB;

const SIGNAL_COLUMNS: &str = "id, competitor_id, news_id, change_id, signal_type, title, \
     description, confidence, severity, locations, source_ids, source_count, metadata, created_at";

fn signal_from_row(row: &SqliteRow) -> Result<Signal, sqlx::Error> {
    Ok(Signal {
        id: row.try_get("id")?,
        competitor_id: row.try_get("competitor_id")?,
        news_id: row.try_get("news_id")?,
        change_id: row.try_get("change_id")?,
        signal_type: decode_enum(&row.try_get::<String, _>("signal_type")?)?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        confidence: row.try_get("confidence")?,
        severity: decode_enum(&row.try_get::<String, _>("severity")?)?,
        locations: decode_json(&row.try_get::<String, _>("locations")?)?,
        source_ids: decode_json(&row.try_get::<String, _>("source_ids")?)?,
        source_count: row.try_get("source_count")?,
        metadata: decode_json(&row.try_get::<String, _>("metadata")?)?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

impl Database {
    /// Looks up the signal already derived from `origin` with this type, if any.
    ///
    /// News-derived signals are those without a change link, so a change-derived signal that
    /// also carries its news id never collides with the content signal of the same item.
    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn find_signal_by_origin(
        &self,
        competitor_id: i64,
        origin: SignalOrigin,
        signal_type: SignalType,
    ) -> Result<Option<Signal>, sqlx::Error> {
        let (filter, origin_id) = match origin {
            SignalOrigin::News(id) => ("news_id = ?2 AND change_id IS NULL", id),
            SignalOrigin::Change(id) => ("change_id = ?2", id),
        };

        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM signals
            WHERE competitor_id = ?1 AND {} AND signal_type = ?3
            ORDER BY id ASC
            LIMIT 1
            "#,
            SIGNAL_COLUMNS, filter
        ))
        .bind(competitor_id)
        .bind(origin_id)
        .bind(signal_type.as_str())
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(signal_from_row).transpose()
    }

    #[instrument(target = "db_query", level = "info", skip(self, signal), fields(signal_type = %signal.signal_type))]
    pub async fn insert_signal(
        &self,
        signal: &NewSignal,
        created_at: DateTime<Utc>,
    ) -> Result<Signal, sqlx::Error> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO signals (competitor_id, news_id, change_id, signal_type, title, description,
                                 confidence, severity, locations, source_ids, source_count,
                                 metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            RETURNING {}
            "#,
            SIGNAL_COLUMNS
        ))
        .bind(signal.competitor_id)
        .bind(signal.news_id)
        .bind(signal.change_id)
        .bind(signal.signal_type.as_str())
        .bind(&signal.title)
        .bind(&signal.description)
        .bind(signal.confidence)
        .bind(signal.severity.as_str())
        .bind(encode_json(&signal.locations)?)
        .bind(encode_json(&signal.source_ids)?)
        .bind(signal.source_ids.len() as i64)
        .bind(encode_json(&signal.metadata)?)
        .bind(to_millis(created_at))
        .fetch_one(self.pool())
        .await?;

        let created = signal_from_row(&row)?;
        debug!(target: TARGET_DB, "Created {} signal {} for competitor {}", created.signal_type, created.id, created.competitor_id);
        Ok(created)
    }

    /// Signals of a competitor created at or after `since`, newest first.
    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn list_signals_since(
        &self,
        competitor_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Signal>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM signals
            WHERE competitor_id = ?1 AND created_at >= ?2
            ORDER BY created_at DESC, id DESC
            "#,
            SIGNAL_COLUMNS
        ))
        .bind(competitor_id)
        .bind(to_millis(since))
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(signal_from_row).collect()
    }

    /// Ids of the `limit` most recently created signals of a competitor, regardless of age.
    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn latest_signal_ids(
        &self,
        competitor_id: i64,
        limit: i64,
    ) -> Result<Vec<i64>, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT id FROM signals
            WHERE competitor_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(competitor_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
    }

    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn count_signals(&self, competitor_id: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM signals WHERE competitor_id = ?1")
            .bind(competitor_id)
            .fetch_one(self.pool())
            .await
    }
}
