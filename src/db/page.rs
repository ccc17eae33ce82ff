use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, instrument};

use super::core::{decode_json, encode_json, from_millis, to_millis, Database};
use crate::types::{NewPage, Page};
use crate::TARGET_DB;

fn page_from_row(row: &SqliteRow) -> Result<Page, sqlx::Error> {
    Ok(Page {
        id: row.try_get("id")?,
        news_id: row.try_get("news_id")?,
        competitor_id: row.try_get("competitor_id")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        markdown: row.try_get("markdown")?,
        plain_text: row.try_get("plain_text")?,
        html: row.try_get("html")?,
        metadata: decode_json(&row.try_get::<String, _>("metadata")?)?,
        scraped_at: from_millis(row.try_get("scraped_at")?)?,
        job_id: row.try_get("job_id")?,
    })
}

impl Database {
    #[instrument(target = "db_query", level = "debug", skip(self, page), fields(news_id = page.news_id))]
    pub async fn insert_page(&self, page: &NewPage) -> Result<i64, sqlx::Error> {
        let (id,) = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO pages (news_id, competitor_id, url, title, markdown, plain_text, html,
                               metadata, scraped_at, job_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            RETURNING id
            "#,
        )
        .bind(page.news_id)
        .bind(page.competitor_id)
        .bind(&page.url)
        .bind(&page.title)
        .bind(&page.markdown)
        .bind(&page.plain_text)
        .bind(&page.html)
        .bind(encode_json(&page.metadata)?)
        .bind(to_millis(page.scraped_at))
        .bind(&page.job_id)
        .fetch_one(self.pool())
        .await?;

        debug!(target: TARGET_DB, "Stored page {} for news item {}", id, page.news_id);
        Ok(id)
    }

    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn get_page_for_news(&self, news_id: i64) -> Result<Option<Page>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, news_id, competitor_id, url, title, markdown, plain_text, html, metadata,
                   scraped_at, job_id
            FROM pages
            WHERE news_id = ?1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(news_id)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(page_from_row).transpose()
    }
}
