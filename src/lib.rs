pub mod config;
pub mod db;
pub mod environment;
pub mod error;
pub mod fingerprint;
pub mod firecrawl;
pub mod logging;
pub mod pipeline;
pub mod types;

pub use config::Config;
pub use db::Database;
pub use error::PipelineError;
pub use pipeline::Pipeline;

pub const TARGET_WEB_REQUEST: &str = "web_request";
pub const TARGET_DB: &str = "db_query";
pub const TARGET_PIPELINE: &str = "pipeline";
