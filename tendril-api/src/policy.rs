//! Static error taxonomy consulted by the API client.
//!
//! Every upstream error code maps to a local HTTP-equivalent status and one
//! action. The table is loaded once, before the first call, and never mutated.

use crate::error::PolicyError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const DEFAULT_ERROR_TABLE: &str = include_str!("../errors/default.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Back off exponentially and re-issue the same request
    Retry,
    /// Give up on this call and return an empty result
    Skip,
    /// Unrecoverable, abort the whole crawl
    Break,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Retry => "retry",
            Action::Skip => "skip",
            Action::Break => "break",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub code: i64,
    pub status: u16,
    pub action: Action,
    #[serde(default)]
    pub description: String,
}

/// Handling of failures that carry no upstream error code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportPolicy {
    /// Connect failures and timeouts
    #[serde(default = "default_network_action")]
    pub network: Action,
    /// HTTP statuses worth retrying when the body has no error envelope
    #[serde(default = "default_retry_statuses")]
    pub retry_statuses: Vec<u16>,
}

fn default_network_action() -> Action {
    Action::Retry
}

fn default_retry_statuses() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

impl Default for TransportPolicy {
    fn default() -> Self {
        Self {
            network: default_network_action(),
            retry_statuses: default_retry_statuses(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    transport: TransportPolicy,
    #[serde(default, rename = "error")]
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Clone)]
pub struct ErrorPolicy {
    entries: HashMap<i64, ErrorEntry>,
    transport: TransportPolicy,
}

impl ErrorPolicy {
    pub fn new(
        entries: impl IntoIterator<Item = ErrorEntry>,
        transport: TransportPolicy,
    ) -> Result<Self, PolicyError> {
        let mut table = HashMap::new();
        for entry in entries {
            let code = entry.code;
            if table.insert(code, entry).is_some() {
                return Err(PolicyError::DuplicateCode(code));
            }
        }
        Ok(Self {
            entries: table,
            transport,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, PolicyError> {
        let file: PolicyFile = toml::from_str(content)?;
        Self::new(file.errors, file.transport)
    }

    pub fn from_file(path: &Path) -> Result<Self, PolicyError> {
        let content = fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// The table shipped with the binary.
    pub fn builtin() -> Result<Self, PolicyError> {
        Self::from_toml(DEFAULT_ERROR_TABLE)
    }

    pub fn lookup(&self, code: i64) -> Option<&ErrorEntry> {
        self.entries.get(&code)
    }

    /// Whether a non-success HTTP status with no error envelope is retried.
    /// Unlisted statuses are fatal.
    pub fn retries_status(&self, status: u16) -> bool {
        self.transport.retry_statuses.contains(&status)
    }

    pub fn network_action(&self) -> Action {
        self.transport.network
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
