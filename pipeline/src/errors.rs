use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Upstream fetch failed, timed out, or returned an unusable reading.
    #[error("Source error: {0}")]
    Source(String),

    /// Message-bus send failed or was not acknowledged in time.
    #[error("Forwarding error: {0}")]
    Forwarding(String),

    /// Durable queue append failed.
    #[error("Buffer write error: {0}")]
    BufferWrite(String),

    /// Durable queue range/trim failed, or a queued entry could not be decoded.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Bulk commit to the permanent store failed or timed out.
    #[error("Commit error: {0}")]
    Commit(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn timed_out(operation: &str, after: Duration) -> String {
    format!("{} timed out after {}ms", operation, after.as_millis())
}

pub type Result<T> = std::result::Result<T, Error>;
