use crate::config::ConfigError;
use tendril_api::ApiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("No accounts configured")]
    NoAccounts,

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("chunk size {size} exceeds the API list threshold of {limit}")]
    BudgetExceeded { size: usize, limit: usize },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl CrawlError {
    /// True when an upstream break classification ended the crawl.
    pub fn is_break(&self) -> bool {
        matches!(self, CrawlError::Api(err) if err.is_break())
    }
}

pub type Result<T> = std::result::Result<T, CrawlError>;
