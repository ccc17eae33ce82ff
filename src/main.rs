use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use rivalwatch::logging::configure_logging;
use rivalwatch::types::{NewCompetitor, ThreatPeriod};
use rivalwatch::{Config, Database, Pipeline};

#[derive(Parser)]
#[clap(name = "rivalwatch", about = "Competitor intelligence: discover, scrape, score")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tracking a competitor
    AddCompetitor {
        /// Unique display name, also used as the news search query
        #[clap(short, long)]
        name: String,

        /// Company website, used for sitemap discovery
        #[clap(short, long)]
        website: String,

        #[clap(short, long)]
        industry: Option<String>,

        #[clap(short, long)]
        description: Option<String>,

        /// Known locations (repeatable)
        #[clap(short, long)]
        location: Vec<String>,
    },

    /// List tracked competitors
    List {
        /// Only active competitors
        #[clap(short, long)]
        active: bool,
    },

    /// Discover candidate URLs for a competitor
    Discover {
        #[clap(required = true)]
        id: i64,
    },

    /// Scrape pending URLs of a competitor
    Scrape {
        #[clap(required = true)]
        id: i64,

        /// Maximum number of URLs to scrape
        #[clap(short, long)]
        limit: Option<i64>,
    },

    /// Compare recent scrapes with their previous versions
    DetectChanges {
        #[clap(required = true)]
        id: i64,
    },

    /// Create signals from scraped content and recent changes
    Signals {
        #[clap(required = true)]
        id: i64,
    },

    /// Recompute the threat rollup of a competitor
    Threat {
        #[clap(required = true)]
        id: i64,

        /// Scoring window: 7D, 30D or OVERALL
        #[clap(short, long, default_value = "30D")]
        period: String,
    },

    /// Threat leaderboard
    Rankings {
        #[clap(short, long, default_value = "10")]
        limit: i64,

        /// Recompute every active competitor first
        #[clap(short, long)]
        refresh: bool,
    },

    /// News counts by status for a competitor
    Stats {
        #[clap(required = true)]
        id: i64,
    },

    /// Run the full pipeline for one or more competitors
    Sync {
        #[clap(required = true, num_args = 1..)]
        ids: Vec<i64>,
    },

    /// Run the full pipeline for every active competitor
    SyncAll,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    configure_logging();

    let args = Cli::parse();
    let config = Config::from_env();
    info!("Using database {}", config.database_path);

    let db = Database::new(&config.database_path).await?;
    let pipeline = Pipeline::from_config(db, &config)?;

    match args.command {
        Commands::AddCompetitor {
            name,
            website,
            industry,
            description,
            location,
        } => {
            let competitor = pipeline
                .add_competitor(NewCompetitor {
                    name,
                    website,
                    industry,
                    description,
                    locations: location,
                })
                .await?;
            print_json(&competitor)?;
        }
        Commands::List { active } => {
            print_json(&pipeline.database().list_competitors(active).await?)?;
        }
        Commands::Discover { id } => {
            print_json(&pipeline.discover(id).await?)?;
        }
        Commands::Scrape { id, limit } => {
            let limit = limit.unwrap_or(config.pipeline.scrape_batch_limit);
            print_json(&pipeline.scrape_pending(id, limit).await?)?;
        }
        Commands::DetectChanges { id } => {
            print_json(&pipeline.detect_changes(id).await?)?;
        }
        Commands::Signals { id } => {
            print_json(&pipeline.create_signals_for_pending(id).await?)?;
        }
        Commands::Threat { id, period } => {
            print_json(&pipeline.compute_threat(id, ThreatPeriod::parse(&period)).await?)?;
        }
        Commands::Rankings { limit, refresh } => {
            if refresh {
                pipeline.compute_threat_for_all(ThreatPeriod::default()).await?;
            }
            print_json(&pipeline.threat_rankings(limit).await?)?;
        }
        Commands::Stats { id } => {
            print_json(&pipeline.scraping_stats(id).await?)?;
        }
        Commands::Sync { ids } => {
            if let [id] = ids.as_slice() {
                print_json(&pipeline.sync(*id).await?)?;
            } else {
                print_json(&pipeline.sync_many(&ids).await)?;
            }
        }
        Commands::SyncAll => {
            print_json(&pipeline.sync_all().await?)?;
        }
    }

    Ok(())
}
