use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, instrument};

use super::core::{decode_enum, from_millis, to_millis, Database};
use crate::types::{Change, NewChange};
use crate::TARGET_DB;

const CHANGE_COLUMNS: &str = "id, competitor_id, news_id, url, previous_hash, current_hash, \
     change_type, confidence, description, detected_at";

fn change_from_row(row: &SqliteRow) -> Result<Change, sqlx::Error> {
    Ok(Change {
        id: row.try_get("id")?,
        competitor_id: row.try_get("competitor_id")?,
        news_id: row.try_get("news_id")?,
        url: row.try_get("url")?,
        previous_hash: row.try_get("previous_hash")?,
        current_hash: row.try_get("current_hash")?,
        change_type: decode_enum(&row.try_get::<String, _>("change_type")?)?,
        confidence: row.try_get("confidence")?,
        description: row.try_get("description")?,
        detected_at: from_millis(row.try_get("detected_at")?)?,
    })
}

impl Database {
    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn change_exists_for_news(
        &self,
        competitor_id: i64,
        news_id: i64,
    ) -> Result<bool, sqlx::Error> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM changes WHERE competitor_id = ?1 AND news_id = ?2 LIMIT 1",
        )
        .bind(competitor_id)
        .bind(news_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(found.is_some())
    }

    #[instrument(target = "db_query", level = "info", skip(self, change), fields(news_id = change.news_id))]
    pub async fn insert_change(
        &self,
        change: &NewChange,
        detected_at: DateTime<Utc>,
    ) -> Result<Change, sqlx::Error> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO changes (competitor_id, news_id, url, previous_hash, current_hash,
                                 change_type, confidence, description, detected_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            RETURNING {}
            "#,
            CHANGE_COLUMNS
        ))
        .bind(change.competitor_id)
        .bind(change.news_id)
        .bind(&change.url)
        .bind(&change.previous_hash)
        .bind(&change.current_hash)
        .bind(change.change_type.as_str())
        .bind(change.confidence)
        .bind(&change.description)
        .bind(to_millis(detected_at))
        .fetch_one(self.pool())
        .await?;

        let created = change_from_row(&row)?;
        debug!(target: TARGET_DB, "Recorded {} change {} for {}", created.change_type, created.id, created.url);
        Ok(created)
    }

    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn get_change(&self, id: i64) -> Result<Option<Change>, sqlx::Error> {
        let row = sqlx::query(&format!("SELECT {} FROM changes WHERE id = ?1", CHANGE_COLUMNS))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(change_from_row).transpose()
    }

    /// Changes detected since `since`, oldest first, at most `limit`.
    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn list_changes_since(
        &self,
        competitor_id: i64,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Change>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM changes
            WHERE competitor_id = ?1 AND detected_at >= ?2
            ORDER BY detected_at ASC, id ASC
            LIMIT ?3
            "#,
            CHANGE_COLUMNS
        ))
        .bind(competitor_id)
        .bind(to_millis(since))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(change_from_row).collect()
    }
}
