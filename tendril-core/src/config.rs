//! Crawl configuration.
//!
//! Everything a run needs (accounts, API tuning, crawl policy, output and
//! store locations) lives in one TOML file and is handed to the crawl
//! explicitly. Access tokens may reference environment variables
//! (`access_token = "$VK_TOKEN"`).

use crate::expand::{DEFAULT_CHUNK_SIZE, ExpandOptions};
use crate::model::{EdgeConvention, EdgeFilter};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tendril_api::{Account, ClientOptions, ErrorPolicy, PolicyError};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Error table: {0}")]
    Policy(#[from] PolicyError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TendrilConfig {
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub api: ApiConfig,
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// The part of the configuration needed to talk to the API. Commands that
/// never crawl load only this and ignore the rest of the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub api: ApiConfig,
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml(&read_config(path)?)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: ClientConfig = toml::from_str(content)?;
        expand_tokens(&mut config.accounts)?;
        validate_accounts(&config.accounts)?;
        config.api.validate()?;
        Ok(config)
    }
}

/// API client tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_version")]
    pub version: String,

    /// Per-request timeout; the connect timeout is half of it
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Error table to use instead of the built-in one
    #[serde(default)]
    pub errors: Option<String>,
}

fn default_api_version() -> String {
    "5.154".to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_backoff_factor() -> f64 {
    0.09
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            version: default_api_version(),
            timeout_secs: default_timeout(),
            backoff_factor: default_backoff_factor(),
            max_attempts: default_max_attempts(),
            errors: None,
        }
    }
}

impl ApiConfig {
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            api_version: self.version.clone(),
            timeout_secs: self.timeout_secs,
            backoff_factor: self.backoff_factor,
            max_attempts: self.max_attempts,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "api.backoff_factor must be a non-negative number, got {}",
                self.backoff_factor
            )));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "api.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn load_policy(&self) -> Result<ErrorPolicy, ConfigError> {
        let policy = match self.errors {
            Some(ref path) => {
                let path = expand_path(path);
                info!("Loading error table from {}", path.display());
                ErrorPolicy::from_file(&path)?
            }
            None => ErrorPolicy::builtin()?,
        };
        Ok(policy)
    }
}

/// Crawl policy. `edge_filter` and `edge_convention` have no default: they
/// change the resulting graph and must be chosen explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Screen names or numeric ids
    pub seeds: Vec<String>,

    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Defaults to seed ∪ level-1
    #[serde(default)]
    pub materialize_depth: Option<usize>,

    pub edge_filter: EdgeFilter,

    pub edge_convention: EdgeConvention,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_max_depth() -> usize {
    1
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl CrawlConfig {
    pub fn expand_options(&self) -> ExpandOptions {
        let options = ExpandOptions::new(self.max_depth, self.edge_filter, self.edge_convention)
            .with_chunk_size(self.chunk_size);
        match self.materialize_depth {
            Some(depth) => options.with_materialize_depth(depth),
            None => options,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_csv_file")]
    pub csv_file: String,
}

fn default_csv_file() -> String {
    "friends.csv".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            csv_file: default_csv_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,

    #[serde(default = "default_node_label")]
    pub node_label: String,

    #[serde(default = "default_relationship")]
    pub relationship: String,

    /// Delete every node of `node_label` before loading a fresh snapshot
    #[serde(default = "default_reset")]
    pub reset: bool,
}

fn default_store_path() -> String {
    "~/.local/share/tendril/graph.db".to_string()
}

fn default_node_label() -> String {
    "Person".to_string()
}

fn default_relationship() -> String {
    "FRIENDS_WITH".to_string()
}

fn default_reset() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            node_label: default_node_label(),
            relationship: default_relationship(),
            reset: default_reset(),
        }
    }
}

impl TendrilConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::from_toml(&read_config(path)?)?;
        info!(
            "Loaded config from {} ({} accounts, {} seeds)",
            path.display(),
            config.accounts.len(),
            config.crawl.seeds.len()
        );
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: TendrilConfig = toml::from_str(content)?;
        expand_tokens(&mut config.accounts)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        validate_accounts(&self.accounts)?;
        self.api.validate()?;
        if self.crawl.seeds.is_empty() {
            return Err(ConfigError::Invalid("crawl.seeds is empty".to_string()));
        }
        self.crawl
            .expand_options()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            accounts: self.accounts.clone(),
            api: self.api.clone(),
        }
    }

    pub fn csv_path(&self) -> PathBuf {
        expand_path(&self.output.csv_file)
    }

    pub fn store_path(&self) -> PathBuf {
        expand_path(&self.store.path)
    }
}

fn read_config(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn expand_tokens(accounts: &mut [Account]) -> Result<(), ConfigError> {
    for account in accounts {
        account.access_token = shellexpand::env(&account.access_token)
            .map_err(|e| ConfigError::Invalid(format!("access token: {}", e)))?
            .into_owned();
    }
    Ok(())
}

fn validate_accounts(accounts: &[Account]) -> Result<(), ConfigError> {
    if accounts.is_empty() {
        return Err(ConfigError::Invalid(
            "at least one [[accounts]] entry is required".to_string(),
        ));
    }
    if let Some(account) = accounts.iter().find(|a| a.access_token.is_empty()) {
        return Err(ConfigError::Invalid(format!(
            "account {} has an empty access token",
            account.endpoint
        )));
    }
    Ok(())
}

/// Expand a leading `~` to the home directory.
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}
