//! Runtime configuration, read from environment variables.

use tokio::time::Duration;

use crate::environment::{get_env_var_as_vec, get_env_var_or, get_env_var_string};
use crate::firecrawl::ScrapeConfig;

pub const DEFAULT_DATABASE_PATH: &str = "rivalwatch.db";
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_SCRAPE_BATCH_LIMIT: i64 = 20;

/// Industry feeds searched for competitor mentions when `INDUSTRY_FEEDS` is unset.
pub const DEFAULT_INDUSTRY_FEEDS: &[(&str, &str)] = &[
    ("Freightwaves", "https://www.freightwaves.com/feed"),
    ("Supply Chain Dive", "https://www.supplychaindive.com/feed"),
    ("Logistics Bureau", "https://www.logisticsbureau.com/feed"),
    ("TechCircle", "https://techcircle.com/feed"),
    ("Inc42", "https://inc42.com/feed"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndustryFeed {
    pub name: String,
    pub url: String,
}

/// Knobs for the pipeline stages themselves.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Politeness delay between sequential network calls.
    pub request_delay: Duration,
    pub scrape_batch_limit: i64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            request_delay: DEFAULT_REQUEST_DELAY,
            scrape_batch_limit: DEFAULT_SCRAPE_BATCH_LIMIT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub scrape: ScrapeConfig,
    pub pipeline: PipelineSettings,
    pub industry_feeds: Vec<IndustryFeed>,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = ScrapeConfig::default();
        let scrape = ScrapeConfig {
            endpoint: get_env_var_string("FIRECRAWL_ENDPOINT", &defaults.endpoint),
            request_timeout: millis_from_env("SCRAPE_TIMEOUT_MS", defaults.request_timeout),
            poll_interval: millis_from_env("SCRAPE_POLL_INTERVAL_MS", defaults.poll_interval),
            poll_request_timeout: millis_from_env(
                "SCRAPE_POLL_TIMEOUT_MS",
                defaults.poll_request_timeout,
            ),
            max_wait: millis_from_env("SCRAPE_MAX_WAIT_MS", defaults.max_wait),
            max_retries: get_env_var_or("SCRAPE_MAX_RETRIES", defaults.max_retries),
            backoff_base: millis_from_env("SCRAPE_BACKOFF_BASE_MS", defaults.backoff_base),
        };

        let pipeline = PipelineSettings {
            request_delay: millis_from_env("REQUEST_DELAY_MS", DEFAULT_REQUEST_DELAY),
            scrape_batch_limit: get_env_var_or("SCRAPE_BATCH_LIMIT", DEFAULT_SCRAPE_BATCH_LIMIT),
        };

        Self {
            database_path: get_env_var_string("DATABASE_PATH", DEFAULT_DATABASE_PATH),
            scrape,
            pipeline,
            industry_feeds: industry_feeds_from_env(),
        }
    }
}

fn millis_from_env(var: &str, default: Duration) -> Duration {
    Duration::from_millis(get_env_var_or(var, default.as_millis() as u64))
}

/// Reads `INDUSTRY_FEEDS` as `name|url;name|url`. Entries without a `|` use the URL as name.
fn industry_feeds_from_env() -> Vec<IndustryFeed> {
    let entries = get_env_var_as_vec("INDUSTRY_FEEDS", ';');
    if entries.is_empty() {
        return DEFAULT_INDUSTRY_FEEDS
            .iter()
            .map(|(name, url)| IndustryFeed {
                name: name.to_string(),
                url: url.to_string(),
            })
            .collect();
    }

    parse_industry_feeds(&entries)
}

fn parse_industry_feeds(entries: &[String]) -> Vec<IndustryFeed> {
    entries
        .iter()
        .map(|entry| match entry.split_once('|') {
            Some((name, url)) => IndustryFeed {
                name: name.trim().to_string(),
                url: url.trim().to_string(),
            },
            None => IndustryFeed {
                name: entry.clone(),
                url: entry.clone(),
            },
        })
        .collect()
}
