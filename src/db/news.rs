use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, instrument};

use super::core::{
    decode_enum, decode_json, encode_json, from_millis, from_optional_millis, to_millis, Database,
    DbLockErrorExt,
};
use crate::fingerprint::canonicalize_url;
use crate::types::{
    DiscoveredUrl, DiscoverySource, NewsItem, NewsStatus, ScrapedContent, ScrapingStats,
};
use crate::TARGET_DB;

const NEWS_COLUMNS: &str = "id, competitor_id, title, url, url_canonical, source_type, \
     source_domain, sources, published_at, scraped_at, markdown, plain_text, content_hash, \
     metadata, status, scrape_error, is_duplicate, duplicate_of, created_at";

fn news_from_row(row: &SqliteRow) -> Result<NewsItem, sqlx::Error> {
    Ok(NewsItem {
        id: row.try_get("id")?,
        competitor_id: row.try_get("competitor_id")?,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        url_canonical: row.try_get("url_canonical")?,
        source_type: decode_enum(&row.try_get::<String, _>("source_type")?)?,
        source_domain: row.try_get("source_domain")?,
        sources: decode_json(&row.try_get::<String, _>("sources")?)?,
        published_at: from_optional_millis(row.try_get("published_at")?)?,
        scraped_at: from_optional_millis(row.try_get("scraped_at")?)?,
        markdown: row.try_get("markdown")?,
        plain_text: row.try_get("plain_text")?,
        content_hash: row.try_get("content_hash")?,
        metadata: decode_json(&row.try_get::<String, _>("metadata")?)?,
        status: decode_enum(&row.try_get::<String, _>("status")?)?,
        scrape_error: row.try_get("scrape_error")?,
        is_duplicate: row.try_get("is_duplicate")?,
        duplicate_of: row.try_get("duplicate_of")?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

impl Database {
    /// Inserts a DISCOVERED news item and returns its id.
    #[instrument(target = "db_query", level = "info", skip(self, discovered), fields(url = %discovered.url))]
    pub async fn insert_news(
        &self,
        competitor_id: i64,
        discovered: &DiscoveredUrl,
        at: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        let url_canonical = canonicalize_url(&discovered.url);
        let sources: Vec<&DiscoverySource> = discovered.source.iter().collect();
        let sources = encode_json(&sources)?;

        let mut backoff = 100; // initial delay in milliseconds
        let max_retries = 5;

        for attempt in 1..=max_retries {
            match sqlx::query_as::<_, (i64,)>(
                r#"
                INSERT INTO news (competitor_id, title, url, url_canonical, source_type, source_domain,
                                  sources, published_at, status, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                RETURNING id
                "#,
            )
            .bind(competitor_id)
            .bind(&discovered.title)
            .bind(&discovered.url)
            .bind(&url_canonical)
            .bind(discovered.source_type.as_str())
            .bind(&discovered.source_domain)
            .bind(&sources)
            .bind(discovered.published_at.map(to_millis))
            .bind(NewsStatus::Discovered.as_str())
            .bind(to_millis(at))
            .fetch_one(self.pool())
            .await
            {
                Ok((id,)) => {
                    debug!(target: TARGET_DB, "News item added: {} with id {}", discovered.url, id);
                    return Ok(id);
                }
                Err(err) => {
                    if err.is_database_lock_error() && attempt < max_retries {
                        info!(target: TARGET_DB, "Database is locked, waiting {}ms before retrying attempt {}/{}: {}", backoff, attempt, max_retries, discovered.url);
                        sleep(Duration::from_millis(backoff)).await;
                        backoff = backoff.saturating_mul(2);
                    } else {
                        error!(target: TARGET_DB, "Failed to add news item {}: {}", discovered.url, err);
                        return Err(err);
                    }
                }
            }
        }

        Err(sqlx::Error::Protocol(
            "Maximum retries exceeded for adding news item".into(),
        ))
    }

    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn get_news(&self, id: i64) -> Result<Option<NewsItem>, sqlx::Error> {
        let row = sqlx::query(&format!("SELECT {} FROM news WHERE id = ?1", NEWS_COLUMNS))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(news_from_row).transpose()
    }

    /// Latest version (by creation) of a URL for one competitor.
    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn find_latest_news_by_url(
        &self,
        competitor_id: i64,
        url: &str,
    ) -> Result<Option<NewsItem>, sqlx::Error> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM news
            WHERE competitor_id = ?1 AND url = ?2
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
            NEWS_COLUMNS
        ))
        .bind(competitor_id)
        .bind(url)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(news_from_row).transpose()
    }

    /// Records another discovery source on an item. Returns false if the source was already known.
    #[instrument(target = "db_query", level = "debug", skip(self, source))]
    pub async fn append_news_source(
        &self,
        news_id: i64,
        source: &DiscoverySource,
    ) -> Result<bool, sqlx::Error> {
        let current: String = sqlx::query_scalar("SELECT sources FROM news WHERE id = ?1")
            .bind(news_id)
            .fetch_one(self.pool())
            .await?;
        let mut sources: Vec<DiscoverySource> = decode_json(&current)?;

        if sources
            .iter()
            .any(|s| s.feed_id == source.feed_id && s.feed_url == source.feed_url)
        {
            return Ok(false);
        }
        sources.push(source.clone());

        sqlx::query("UPDATE news SET sources = ?1 WHERE id = ?2")
            .bind(encode_json(&sources)?)
            .bind(news_id)
            .execute(self.pool())
            .await?;
        debug!(target: TARGET_DB, "Added source {} to news item {}", source.feed_id, news_id);
        Ok(true)
    }

    /// DISCOVERED items for a competitor, oldest first.
    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn list_pending_news(
        &self,
        competitor_id: i64,
        limit: i64,
    ) -> Result<Vec<NewsItem>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM news
            WHERE competitor_id = ?1 AND status = ?2
            ORDER BY created_at ASC, id ASC
            LIMIT ?3
            "#,
            NEWS_COLUMNS
        ))
        .bind(competitor_id)
        .bind(NewsStatus::Discovered.as_str())
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(news_from_row).collect()
    }

    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn set_news_status(&self, id: i64, status: NewsStatus) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE news SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    #[instrument(target = "db_query", level = "debug", skip(self, reason))]
    pub async fn mark_news_failed(&self, id: i64, reason: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE news SET status = ?1, scrape_error = ?2 WHERE id = ?3")
            .bind(NewsStatus::Failed.as_str())
            .bind(reason)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    #[instrument(target = "db_query", level = "debug", skip(self, content))]
    pub async fn mark_news_scraped(
        &self,
        id: i64,
        content: &ScrapedContent,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE news
            SET status = ?1, scraped_at = ?2, markdown = ?3, plain_text = ?4,
                content_hash = ?5, metadata = ?6, scrape_error = NULL
            WHERE id = ?7
            "#,
        )
        .bind(NewsStatus::Scraped.as_str())
        .bind(to_millis(content.scraped_at))
        .bind(&content.markdown)
        .bind(&content.plain_text)
        .bind(&content.content_hash)
        .bind(encode_json(&content.metadata)?)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Links `id` to the item that already holds the same content and retires it as SKIPPED.
    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn mark_news_duplicate(&self, id: i64, duplicate_of: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE news SET is_duplicate = 1, duplicate_of = ?1, status = ?2 WHERE id = ?3",
        )
        .bind(duplicate_of)
        .bind(NewsStatus::Skipped.as_str())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// True if the competitor already has a SCRAPED item for this canonical URL scraped since `since`.
    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn was_recently_scraped(
        &self,
        competitor_id: i64,
        url_canonical: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let found: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM news
            WHERE competitor_id = ?1 AND url_canonical = ?2 AND status = ?3 AND scraped_at >= ?4
            LIMIT 1
            "#,
        )
        .bind(competitor_id)
        .bind(url_canonical)
        .bind(NewsStatus::Scraped.as_str())
        .bind(to_millis(since))
        .fetch_optional(self.pool())
        .await?;
        Ok(found.is_some())
    }

    /// Earliest non-duplicate item of the competitor, other than `exclude_id`, with this content hash.
    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn find_content_duplicate(
        &self,
        competitor_id: i64,
        content_hash: &str,
        exclude_id: i64,
    ) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT id FROM news
            WHERE competitor_id = ?1 AND content_hash = ?2 AND is_duplicate = 0 AND id != ?3
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(competitor_id)
        .bind(content_hash)
        .bind(exclude_id)
        .fetch_optional(self.pool())
        .await
    }

    /// Most recent other SCRAPED item with the same URL that was scraped no later than `item`.
    #[instrument(target = "db_query", level = "debug", skip(self, item), fields(news_id = item.id))]
    pub async fn find_previous_version(
        &self,
        item: &NewsItem,
    ) -> Result<Option<NewsItem>, sqlx::Error> {
        let Some(scraped_at) = item.scraped_at else {
            return Ok(None);
        };
        let scraped_at = to_millis(scraped_at);

        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM news
            WHERE competitor_id = ?1 AND url = ?2 AND id != ?3 AND status = ?4
              AND content_hash IS NOT NULL
              AND (scraped_at < ?5 OR (scraped_at = ?5 AND id < ?3))
            ORDER BY scraped_at DESC, id DESC
            LIMIT 1
            "#,
            NEWS_COLUMNS
        ))
        .bind(item.competitor_id)
        .bind(&item.url)
        .bind(item.id)
        .bind(NewsStatus::Scraped.as_str())
        .bind(scraped_at)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(news_from_row).transpose()
    }

    /// SCRAPED items of the competitor scraped since `since`, oldest first.
    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn list_scraped_since(
        &self,
        competitor_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<NewsItem>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM news
            WHERE competitor_id = ?1 AND status = ?2 AND scraped_at >= ?3
            ORDER BY scraped_at ASC, id ASC
            "#,
            NEWS_COLUMNS
        ))
        .bind(competitor_id)
        .bind(NewsStatus::Scraped.as_str())
        .bind(to_millis(since))
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(news_from_row).collect()
    }

    /// Most recently scraped non-duplicate SCRAPED items, the candidates for content signals.
    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn list_signal_candidates(
        &self,
        competitor_id: i64,
        limit: i64,
    ) -> Result<Vec<NewsItem>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM news
            WHERE competitor_id = ?1 AND status = ?2 AND is_duplicate = 0
            ORDER BY scraped_at DESC, id DESC
            LIMIT ?3
            "#,
            NEWS_COLUMNS
        ))
        .bind(competitor_id)
        .bind(NewsStatus::Scraped.as_str())
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(news_from_row).collect()
    }

    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn news_status_counts(&self, competitor_id: i64) -> Result<ScrapingStats, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM news WHERE competitor_id = ?1 GROUP BY status",
        )
        .bind(competitor_id)
        .fetch_all(self.pool())
        .await?;

        let mut stats = ScrapingStats::default();
        for row in &rows {
            let status: NewsStatus = decode_enum(&row.try_get::<String, _>("status")?)?;
            stats.add(status, row.try_get("count")?);
        }

        stats.duplicates = sqlx::query_scalar(
            "SELECT COUNT(*) FROM news WHERE competitor_id = ?1 AND is_duplicate = 1",
        )
        .bind(competitor_id)
        .fetch_one(self.pool())
        .await?;

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::super::core::test_support::temp_database;
    use super::*;
    use crate::types::{NewCompetitor, SourceType};
    use chrono::Duration as ChronoDuration;
    use serde_json::Map;

    async fn competitor(db: &Database) -> i64 {
        db.create_competitor(&NewCompetitor {
            name: "Acme".to_string(),
            website: "https://acme.example".to_string(),
            ..Default::default()
        })
        .await
        .unwrap()
        .id
    }

    fn discovered(url: &str) -> DiscoveredUrl {
        DiscoveredUrl {
            url: url.to_string(),
            title: Some("Acme expands".to_string()),
            source_type: SourceType::Rss,
            source_domain: Some("news.example".to_string()),
            published_at: None,
            source: Some(DiscoverySource {
                feed_id: "google-news".to_string(),
                feed_url: "https://news.google.com/rss".to_string(),
                discovered_at: Utc::now(),
            }),
        }
    }

    fn scraped(markdown: &str, hash: &str, at: DateTime<Utc>) -> ScrapedContent {
        ScrapedContent {
            markdown: markdown.to_string(),
            plain_text: markdown.to_string(),
            content_hash: Some(hash.to_string()),
            metadata: Map::new(),
            scraped_at: at,
        }
    }

    #[tokio::test]
    async fn test_insert_and_canonicalise() {
        let (db, _dir) = temp_database().await;
        let cid = competitor(&db).await;
        let id = db
            .insert_news(cid, &discovered("https://acme.example/news?utm=1#top"), Utc::now())
            .await
            .unwrap();

        let item = db.get_news(id).await.unwrap().unwrap();
        assert_eq!(item.status, NewsStatus::Discovered);
        assert_eq!(item.url_canonical, "https://acme.example/news");
        assert_eq!(item.sources.len(), 1);
        assert!(!item.is_duplicate);
    }

    #[tokio::test]
    async fn test_append_source_skips_known_sources() {
        let (db, _dir) = temp_database().await;
        let cid = competitor(&db).await;
        let item = discovered("https://acme.example/a");
        let id = db.insert_news(cid, &item, Utc::now()).await.unwrap();

        let known = item.source.clone().unwrap();
        assert!(!db.append_news_source(id, &known).await.unwrap());

        let other = DiscoverySource {
            feed_id: "sitemap".to_string(),
            feed_url: "https://acme.example/sitemap.xml".to_string(),
            discovered_at: Utc::now(),
        };
        assert!(db.append_news_source(id, &other).await.unwrap());
        assert_eq!(db.get_news(id).await.unwrap().unwrap().sources.len(), 2);
    }

    #[tokio::test]
    async fn test_pending_scraped_and_stats() {
        let (db, _dir) = temp_database().await;
        let cid = competitor(&db).await;
        let now = Utc::now();
        let first = db.insert_news(cid, &discovered("https://acme.example/1"), now).await.unwrap();
        let second = db.insert_news(cid, &discovered("https://acme.example/2"), now).await.unwrap();
        let third = db.insert_news(cid, &discovered("https://acme.example/3"), now).await.unwrap();

        let pending = db.list_pending_news(cid, 2).await.unwrap();
        assert_eq!(pending.iter().map(|n| n.id).collect::<Vec<_>>(), vec![first, second]);

        db.mark_news_scraped(first, &scraped("# Hello", "h1", now)).await.unwrap();
        db.mark_news_failed(second, "Scrape job failed: boom").await.unwrap();
        db.mark_news_duplicate(third, first).await.unwrap();

        let item = db.get_news(first).await.unwrap().unwrap();
        assert_eq!(item.status, NewsStatus::Scraped);
        assert_eq!(item.content_hash.as_deref(), Some("h1"));
        let failed = db.get_news(second).await.unwrap().unwrap();
        assert_eq!(failed.scrape_error.as_deref(), Some("Scrape job failed: boom"));
        let dup = db.get_news(third).await.unwrap().unwrap();
        assert_eq!(dup.status, NewsStatus::Skipped);
        assert_eq!(dup.duplicate_of, Some(first));

        let stats = db.news_status_counts(cid).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.scraped, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.duplicates, 1);
    }

    #[tokio::test]
    async fn test_recently_scraped_and_content_duplicate() {
        let (db, _dir) = temp_database().await;
        let cid = competitor(&db).await;
        let now = Utc::now();
        let id = db.insert_news(cid, &discovered("https://acme.example/p?x=1"), now).await.unwrap();
        db.mark_news_scraped(id, &scraped("body", "hash-a", now)).await.unwrap();

        assert!(db
            .was_recently_scraped(cid, "https://acme.example/p", now - ChronoDuration::hours(24))
            .await
            .unwrap());
        assert!(!db
            .was_recently_scraped(cid, "https://acme.example/p", now + ChronoDuration::hours(1))
            .await
            .unwrap());

        assert_eq!(db.find_content_duplicate(cid, "hash-a", id + 100).await.unwrap(), Some(id));
        assert_eq!(db.find_content_duplicate(cid, "hash-a", id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_previous_version_is_strictly_earlier() {
        let (db, _dir) = temp_database().await;
        let cid = competitor(&db).await;
        let now = Utc::now();
        let old = db.insert_news(cid, &discovered("https://acme.example/p"), now).await.unwrap();
        db.mark_news_scraped(old, &scraped("v1", "h1", now - ChronoDuration::days(2)))
            .await
            .unwrap();
        let new = db.insert_news(cid, &discovered("https://acme.example/p"), now).await.unwrap();
        db.mark_news_scraped(new, &scraped("v2", "h2", now)).await.unwrap();

        let new_item = db.get_news(new).await.unwrap().unwrap();
        let previous = db.find_previous_version(&new_item).await.unwrap().unwrap();
        assert_eq!(previous.id, old);

        let old_item = db.get_news(old).await.unwrap().unwrap();
        assert!(db.find_previous_version(&old_item).await.unwrap().is_none());

        let latest = db.find_latest_news_by_url(cid, "https://acme.example/p").await.unwrap().unwrap();
        assert_eq!(latest.id, new);

        let recent = db.list_scraped_since(cid, now - ChronoDuration::days(1)).await.unwrap();
        assert_eq!(recent.len(), 1);
        let candidates = db.list_signal_candidates(cid, 20).await.unwrap();
        assert_eq!(candidates.iter().map(|n| n.id).collect::<Vec<_>>(), vec![new, old]);
    }
}
