use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, error, info, instrument};

use super::core::{
    decode_json, encode_json, from_millis, from_optional_millis, to_millis, Database,
};
use crate::types::{Competitor, NewCompetitor};
use crate::TARGET_DB;

const COMPETITOR_COLUMNS: &str = "id, name, website, industry, description, locations, active, \
     last_scraped_at, last_threat_computed_at, created_at";

fn competitor_from_row(row: &SqliteRow) -> Result<Competitor, sqlx::Error> {
    Ok(Competitor {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        website: row.try_get("website")?,
        industry: row.try_get("industry")?,
        description: row.try_get("description")?,
        locations: decode_json(&row.try_get::<String, _>("locations")?)?,
        active: row.try_get("active")?,
        last_scraped_at: from_optional_millis(row.try_get("last_scraped_at")?)?,
        last_threat_computed_at: from_optional_millis(row.try_get("last_threat_computed_at")?)?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

impl Database {
    #[instrument(target = "db_query", level = "info", skip(self, competitor), fields(name = %competitor.name))]
    pub async fn create_competitor(
        &self,
        competitor: &NewCompetitor,
    ) -> Result<Competitor, sqlx::Error> {
        let locations = encode_json(&competitor.locations)?;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO competitors (name, website, industry, description, locations, active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
            RETURNING {}
            "#,
            COMPETITOR_COLUMNS
        ))
        .bind(&competitor.name)
        .bind(&competitor.website)
        .bind(&competitor.industry)
        .bind(&competitor.description)
        .bind(&locations)
        .bind(to_millis(Utc::now()))
        .fetch_one(self.pool())
        .await
        .map_err(|err| {
            error!(target: TARGET_DB, "Failed to create competitor {}: {}", competitor.name, err);
            err
        })?;

        let created = competitor_from_row(&row)?;
        info!(target: TARGET_DB, "Created competitor {} with id {}", created.name, created.id);
        Ok(created)
    }

    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn get_competitor(&self, id: i64) -> Result<Option<Competitor>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM competitors WHERE id = ?1",
            COMPETITOR_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(competitor_from_row).transpose()
    }

    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn find_competitor_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Competitor>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM competitors WHERE name = ?1",
            COMPETITOR_COLUMNS
        ))
        .bind(name)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(competitor_from_row).transpose()
    }

    /// Lists competitors ordered by id, optionally only the active ones.
    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn list_competitors(&self, active_only: bool) -> Result<Vec<Competitor>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM competitors WHERE (?1 = 0 OR active = 1) ORDER BY id",
            COMPETITOR_COLUMNS
        ))
        .bind(active_only)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(competitor_from_row).collect()
    }

    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn touch_competitor_scraped(
        &self,
        id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE competitors SET last_scraped_at = ?1 WHERE id = ?2")
            .bind(to_millis(at))
            .bind(id)
            .execute(self.pool())
            .await?;
        debug!(target: TARGET_DB, "Competitor {} last scraped at {}", id, at);
        Ok(())
    }

    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn touch_competitor_threat(
        &self,
        id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE competitors SET last_threat_computed_at = ?1 WHERE id = ?2")
            .bind(to_millis(at))
            .bind(id)
            .execute(self.pool())
            .await?;
        debug!(target: TARGET_DB, "Competitor {} threat computed at {}", id, at);
        Ok(())
    }
}
