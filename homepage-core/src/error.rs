use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("feed parsing error: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("feed source `{source_name}` has an invalid url `{url}`")]
    InvalidUrl { source_name: String, url: String },
    #[error("feed source `{0}` is configured more than once")]
    DuplicateSource(String),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("no configuration directory available on this platform")]
    NoConfigDir,
}

/// Message shown to a commenter who has been throttled.
pub const RATE_LIMITED_MESSAGE: &str = "Too many comments, please slow down.";

#[derive(Debug, Error)]
pub enum CommentError {
    #[error("{}", RATE_LIMITED_MESSAGE)]
    RateLimited { retry_after_secs: u64 },
    #[error("invalid comment: {0}")]
    Invalid(&'static str),
    #[error("comment store error: {0}")]
    Store(String),
}

#[derive(Debug, Error)]
pub enum RefresherError {
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
