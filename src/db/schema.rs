use tracing::info;

use super::core::Database;
use crate::TARGET_DB;

impl Database {
    pub(crate) async fn initialize_schema(&self) -> Result<(), sqlx::Error> {
        let mut conn = self.pool().acquire().await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS competitors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                website TEXT NOT NULL,
                industry TEXT,
                description TEXT,
                locations TEXT NOT NULL DEFAULT '[]', -- JSON array of strings
                active BOOLEAN NOT NULL DEFAULT 1,
                last_scraped_at INTEGER,
                last_threat_computed_at INTEGER,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_competitors_active ON competitors (active);

            -- One row per discovered URL version
            CREATE TABLE IF NOT EXISTS news (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                competitor_id INTEGER NOT NULL,
                title TEXT,
                url TEXT NOT NULL,
                url_canonical TEXT NOT NULL,
                source_type TEXT NOT NULL, -- RSS, SITEMAP, SITE_SEARCH, MANUAL
                source_domain TEXT,
                sources TEXT NOT NULL DEFAULT '[]', -- JSON array of discovery sources
                published_at INTEGER,
                scraped_at INTEGER,
                markdown TEXT,
                plain_text TEXT,
                content_hash TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL, -- DISCOVERED, SCRAPING, SCRAPED, FAILED, SKIPPED
                scrape_error TEXT,
                is_duplicate BOOLEAN NOT NULL DEFAULT 0,
                duplicate_of INTEGER,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (competitor_id) REFERENCES competitors (id) ON DELETE CASCADE,
                FOREIGN KEY (duplicate_of) REFERENCES news (id) ON DELETE SET NULL
            );
            CREATE INDEX IF NOT EXISTS idx_news_competitor_created ON news (competitor_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_news_url_canonical ON news (url_canonical);
            CREATE INDEX IF NOT EXISTS idx_news_content_hash ON news (content_hash);
            CREATE INDEX IF NOT EXISTS idx_news_status ON news (status);
            CREATE INDEX IF NOT EXISTS idx_news_competitor_url ON news (competitor_id, url);

            CREATE TABLE IF NOT EXISTS pages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                news_id INTEGER NOT NULL,
                competitor_id INTEGER NOT NULL,
                url TEXT NOT NULL,
                title TEXT,
                markdown TEXT NOT NULL,
                plain_text TEXT NOT NULL,
                html TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                scraped_at INTEGER NOT NULL,
                job_id TEXT,
                FOREIGN KEY (news_id) REFERENCES news (id) ON DELETE CASCADE,
                FOREIGN KEY (competitor_id) REFERENCES competitors (id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_pages_news_id ON pages (news_id);

            -- Append-only, at most one per news item
            CREATE TABLE IF NOT EXISTS changes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                competitor_id INTEGER NOT NULL,
                news_id INTEGER NOT NULL UNIQUE,
                url TEXT NOT NULL,
                previous_hash TEXT NOT NULL,
                current_hash TEXT NOT NULL,
                change_type TEXT NOT NULL,
                confidence INTEGER NOT NULL,
                description TEXT NOT NULL,
                detected_at INTEGER NOT NULL,
                FOREIGN KEY (competitor_id) REFERENCES competitors (id) ON DELETE CASCADE,
                FOREIGN KEY (news_id) REFERENCES news (id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_changes_competitor_detected ON changes (competitor_id, detected_at);
            CREATE INDEX IF NOT EXISTS idx_changes_news_id ON changes (news_id);

            -- Append-only
            CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                competitor_id INTEGER NOT NULL,
                news_id INTEGER,
                change_id INTEGER,
                signal_type TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                confidence INTEGER NOT NULL,
                severity TEXT NOT NULL,
                locations TEXT NOT NULL DEFAULT '[]',
                source_ids TEXT NOT NULL DEFAULT '[]',
                source_count INTEGER NOT NULL DEFAULT 1,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL,
                FOREIGN KEY (competitor_id) REFERENCES competitors (id) ON DELETE CASCADE,
                FOREIGN KEY (news_id) REFERENCES news (id) ON DELETE SET NULL,
                FOREIGN KEY (change_id) REFERENCES changes (id) ON DELETE SET NULL
            );
            CREATE INDEX IF NOT EXISTS idx_signals_competitor_created ON signals (competitor_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_signals_news_type ON signals (competitor_id, news_id, signal_type);
            CREATE INDEX IF NOT EXISTS idx_signals_change_type ON signals (competitor_id, change_id, signal_type);

            -- One mutable rollup per competitor; period is informational
            CREATE TABLE IF NOT EXISTS threats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                competitor_id INTEGER NOT NULL UNIQUE,
                threat_score INTEGER NOT NULL,
                signal_count INTEGER NOT NULL,
                signal_by_type TEXT NOT NULL DEFAULT '{}',
                top_locations TEXT NOT NULL DEFAULT '[]',
                recent_signals TEXT NOT NULL DEFAULT '[]',
                last_updated INTEGER NOT NULL,
                period TEXT NOT NULL,
                FOREIGN KEY (competitor_id) REFERENCES competitors (id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_threats_score ON threats (threat_score);
            "#,
        )
        .execute(&mut *conn)
        .await?;

        info!(target: TARGET_DB, "Database schema initialized");
        Ok(())
    }
}
