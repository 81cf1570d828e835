//! Breadth-limited friends-of-friends expansion.
//!
//! Level 0 is the seed set. Each following level fetches adjacency for the
//! current frontier through the balancer and keeps only neighbours that were
//! not seen before. Once the last level is done, identities from the first
//! `materialize_depth` levels become edge roots and their friend lists are
//! turned into `FriendshipPair`s.

use crate::balance::balance;
use crate::error::{CrawlError, Result};
use crate::model::{CrawlSnapshot, EdgeConvention, EdgeFilter, FriendshipPair};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tendril_api::{API_LIST_THRESHOLD, AdjacencyMap, ApiClient, Identity};
use tracing::{debug, info};

/// Chunk size used when none is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 20;

/// Reports `(level, frontier size)` before each level is expanded.
pub type LevelCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct ExpandOptions {
    pub max_depth: usize,
    /// Identities first seen at levels `0..=materialize_depth` become edge roots
    pub materialize_depth: usize,
    pub edge_filter: EdgeFilter,
    pub edge_convention: EdgeConvention,
    pub chunk_size: usize,
}

impl ExpandOptions {
    /// Materializes seed ∪ level-1 by default.
    pub fn new(max_depth: usize, edge_filter: EdgeFilter, edge_convention: EdgeConvention) -> Self {
        Self {
            max_depth,
            materialize_depth: max_depth.min(1),
            edge_filter,
            edge_convention,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_materialize_depth(mut self, depth: usize) -> Self {
        self.materialize_depth = depth;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.materialize_depth > self.max_depth {
            return Err(CrawlError::InvalidOptions(format!(
                "materialize depth {} is deeper than max depth {}",
                self.materialize_depth, self.max_depth
            )));
        }
        if self.chunk_size == 0 {
            return Err(CrawlError::InvalidOptions(
                "chunk size must be at least 1".to_string(),
            ));
        }
        if self.chunk_size > API_LIST_THRESHOLD {
            return Err(CrawlError::BudgetExceeded {
                size: self.chunk_size,
                limit: API_LIST_THRESHOLD,
            });
        }
        Ok(())
    }
}

pub struct GraphExpander {
    clients: Vec<Arc<ApiClient>>,
    options: ExpandOptions,
    level_callback: Option<LevelCallback>,
}

impl GraphExpander {
    /// One client per account; the balancer never runs two requests on the
    /// same client at once.
    pub fn new(clients: Vec<Arc<ApiClient>>, options: ExpandOptions) -> Result<Self> {
        if clients.is_empty() {
            return Err(CrawlError::NoAccounts);
        }
        options.validate()?;

        Ok(Self {
            clients,
            options,
            level_callback: None,
        })
    }

    pub fn with_level_callback(mut self, callback: LevelCallback) -> Self {
        self.level_callback = Some(callback);
        self
    }

    pub fn options(&self) -> &ExpandOptions {
        &self.options
    }

    /// Resolve screen names to identities, dropping repeats.
    pub async fn resolve_seeds(&self, names: &[String]) -> Result<Vec<Identity>> {
        resolve_names(&self.clients, names, self.options.chunk_size).await
    }

    pub async fn expand(&self, seeds: &[Identity]) -> Result<CrawlSnapshot> {
        let seeds = unique_in_order(seeds);
        let mut visited: HashSet<Identity> = seeds.iter().copied().collect();
        let mut frontier: BTreeSet<Identity> = seeds.iter().copied().collect();
        let mut levels: Vec<Vec<Identity>> = vec![frontier.iter().copied().collect()];
        let mut adjacency: AdjacencyMap = HashMap::new();

        info!(
            "Expanding {} seeds to depth {} ({} accounts)",
            seeds.len(),
            self.options.max_depth,
            self.clients.len()
        );

        for level in 1..=self.options.max_depth {
            if frontier.is_empty() {
                info!("Frontier empty after level {}, stopping early", level - 1);
                break;
            }
            if let Some(ref callback) = self.level_callback {
                callback(level, frontier.len());
            }

            let missing: Vec<Identity> = frontier
                .iter()
                .filter(|id| !adjacency.contains_key(id))
                .copied()
                .collect();
            info!(
                "Level {}: expanding {} identities ({} to fetch)",
                level,
                frontier.len(),
                missing.len()
            );
            adjacency.extend(self.fetch(missing).await?);

            let next: BTreeSet<Identity> = frontier
                .iter()
                .filter_map(|id| adjacency.get(id))
                .flatten()
                .copied()
                .filter(|friend| !visited.contains(friend))
                .collect();

            visited.extend(next.iter().copied());
            debug!(
                "Level {}: {} new identities, {} visited",
                level,
                next.len(),
                visited.len()
            );
            levels.push(next.iter().copied().collect());
            frontier = next;
        }

        let roots: Vec<Identity> = levels
            .iter()
            .take(self.options.materialize_depth + 1)
            .flatten()
            .copied()
            .collect();

        let missing: Vec<Identity> = roots
            .iter()
            .filter(|id| !adjacency.contains_key(id))
            .copied()
            .collect();
        if !missing.is_empty() {
            info!("Materializing: fetching {} more identities", missing.len());
            adjacency.extend(self.fetch(missing).await?);
        }

        let mut emitted = Vec::new();
        for root in &roots {
            for friend in adjacency.get(root).into_iter().flatten() {
                if self.options.edge_filter == EdgeFilter::WithinVisited
                    && !visited.contains(friend)
                {
                    continue;
                }
                emitted.push(FriendshipPair::new(*root, *friend));
            }
        }

        let edges = self.options.edge_convention.dedup(&emitted);
        info!(
            "Materialized {} roots: {} pairs emitted, {} {} edges ({})",
            roots.len(),
            emitted.len(),
            edges.len(),
            self.options.edge_convention.as_str(),
            self.options.edge_filter.as_str()
        );

        Ok(CrawlSnapshot {
            seeds,
            levels,
            visited: visited.into_iter().collect(),
            emitted,
            edges,
            edge_filter: self.options.edge_filter,
            edge_convention: self.options.edge_convention,
            fetched: adjacency.len(),
        })
    }

    async fn fetch(&self, ids: Vec<Identity>) -> Result<AdjacencyMap> {
        if ids.is_empty() {
            return Ok(AdjacencyMap::new());
        }

        let rows = balance(
            |client: Arc<ApiClient>, chunk: Vec<Identity>| async move {
                client
                    .fetch_adjacency(&chunk)
                    .await
                    .map(|adjacency| adjacency.into_iter().collect::<Vec<_>>())
            },
            &self.clients,
            ids,
            self.options.chunk_size,
        )
        .await?;

        Ok(rows.into_iter().collect())
    }
}

/// Resolve screen names through the balancer. Identities come back in name
/// order with repeats dropped.
pub async fn resolve_names(
    clients: &[Arc<ApiClient>],
    names: &[String],
    chunk_size: usize,
) -> Result<Vec<Identity>> {
    let ids = balance(
        |client: Arc<ApiClient>, chunk: Vec<String>| async move {
            client.resolve_identities(&chunk).await
        },
        clients,
        names.to_vec(),
        chunk_size,
    )
    .await?;

    Ok(unique_in_order(&ids))
}

fn unique_in_order(ids: &[Identity]) -> Vec<Identity> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}
