use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use tendril_api::Identity;

/// One directed edge `(root, friend)` as emitted by the expander.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FriendshipPair {
    pub root: Identity,
    pub friend: Identity,
}

impl FriendshipPair {
    pub fn new(root: Identity, friend: Identity) -> Self {
        Self { root, friend }
    }

    /// Orientation-free form: smaller id first.
    pub fn canonical(self) -> Self {
        if self.root <= self.friend {
            self
        } else {
            Self::new(self.friend, self.root)
        }
    }
}

/// Which emitted pairs survive materialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeFilter {
    /// Keep only pairs whose friend was visited during expansion
    WithinVisited,
    /// Keep every pair, including edges to unexplored identities
    Dangling,
}

impl EdgeFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeFilter::WithinVisited => "within-visited",
            EdgeFilter::Dangling => "dangling",
        }
    }
}

/// How duplicate pairs collapse into the final edge set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeConvention {
    /// `(a, b)` and `(b, a)` are distinct edges
    Directed,
    /// `(a, b)` and `(b, a)` collapse to `(min, max)`
    Undirected,
}

impl EdgeConvention {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeConvention::Directed => "directed",
            EdgeConvention::Undirected => "undirected",
        }
    }

    /// Deduplicate `pairs` under this convention, sorted.
    pub fn dedup(&self, pairs: &[FriendshipPair]) -> Vec<FriendshipPair> {
        let set: BTreeSet<FriendshipPair> = match self {
            EdgeConvention::Directed => pairs.iter().copied().collect(),
            EdgeConvention::Undirected => pairs.iter().map(|p| p.canonical()).collect(),
        };
        set.into_iter().collect()
    }
}

impl FromStr for EdgeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "within-visited" => Ok(EdgeFilter::WithinVisited),
            "dangling" => Ok(EdgeFilter::Dangling),
            other => Err(format!(
                "unknown edge filter `{}` (expected within-visited or dangling)",
                other
            )),
        }
    }
}

impl FromStr for EdgeConvention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "directed" => Ok(EdgeConvention::Directed),
            "undirected" => Ok(EdgeConvention::Undirected),
            other => Err(format!(
                "unknown edge convention `{}` (expected directed or undirected)",
                other
            )),
        }
    }
}

/// Everything one crawl run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSnapshot {
    pub seeds: Vec<Identity>,
    /// Identities first discovered at each level; level 0 holds the seeds
    pub levels: Vec<Vec<Identity>>,
    pub visited: BTreeSet<Identity>,
    /// Raw pairs in emission order, before deduplication
    pub emitted: Vec<FriendshipPair>,
    /// Final edge set under `edge_convention`
    pub edges: Vec<FriendshipPair>,
    pub edge_filter: EdgeFilter,
    pub edge_convention: EdgeConvention,
    /// Identities whose friend list was fetched
    pub fetched: usize,
}
