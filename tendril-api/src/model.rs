use crate::error::{ApiError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use url::Url;

/// A user in the remote system.
pub type Identity = i64;

/// Friends of each requested identity. Identities the API had nothing for
/// map to an empty list.
pub type AdjacencyMap = HashMap<Identity, Vec<Identity>>;

/// One set of API credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub endpoint: String,
    pub access_token: String,
}

impl Account {
    pub fn new(endpoint: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_token: access_token.into(),
        }
    }

    /// Resolve `method` (e.g. `friends.get`) against the account endpoint.
    pub fn method_url(&self, method: &str) -> Result<Url> {
        let mut base = Url::parse(&self.endpoint)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", self.endpoint, e)))?;

        // Url::join drops the last segment unless the base ends with '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        base.join(method)
            .map_err(|e| ApiError::InvalidUrl(format!("{}{}: {}", self.endpoint, method, e)))
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("endpoint", &self.endpoint)
            .field("access_token", &"<redacted>")
            .finish()
    }
}
