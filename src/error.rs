use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScoringError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Batch contains no wallets")]
    EmptyBatch,

    #[error("Scoring run exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl ScoringError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn worker_error(msg: impl Into<String>) -> Self {
        Self::Worker(msg.into())
    }
}

impl From<tokio::task::JoinError> for ScoringError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Worker(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScoringError>;
