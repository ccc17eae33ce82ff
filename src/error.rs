use thiserror::Error;

/// Failures that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Competitor not found: {0}")]
    CompetitorNotFound(i64),

    #[error("News not found: {0}")]
    NewsNotFound(i64),

    #[error("Competitor already exists: {0}")]
    CompetitorExists(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
