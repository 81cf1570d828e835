use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Network failure under a `break` transport policy
    #[error("transport failure calling {method} aborted the crawl: {source}")]
    Transport {
        method: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected response from {method}: missing `{key}`")]
    Resolution { method: String, key: String },

    #[error("unhandled API error (code {code:?}, HTTP {status}) from {method}: {message}")]
    Unhandled {
        method: String,
        code: Option<i64>,
        status: u16,
        message: String,
    },

    #[error("API error {code} (HTTP {status}) from {method} aborted the crawl: {message}")]
    Break {
        method: String,
        code: i64,
        status: u16,
        message: String,
    },

    #[error("batch of {size} elements exceeds the API list threshold of {limit}")]
    BudgetExceeded { size: usize, limit: usize },

    #[error("{method} still failing after {attempts} attempts: {last}")]
    RetriesExhausted {
        method: String,
        attempts: u32,
        last: String,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl ApiError {
    /// True for errors that must stop the whole crawl immediately.
    pub fn is_break(&self) -> bool {
        matches!(self, ApiError::Break { .. } | ApiError::Transport { .. })
    }
}

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("error code {0} is mapped more than once")]
    DuplicateCode(i64),
}

pub type Result<T> = std::result::Result<T, ApiError>;
