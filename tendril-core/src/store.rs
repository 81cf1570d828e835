use crate::model::FriendshipPair;
use crate::snapshot::{self, SnapshotError};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tendril_api::Identity;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Sink for the crawl's edge list. Every write is a merge: delivering the
/// same node or edge twice leaves the store unchanged.
pub trait GraphLoader {
    /// Create the node if absent; returns its row id either way.
    fn upsert_node(&self, label: &str, id: Identity) -> Result<i64>;

    /// Merge `root_id -[relationship]-> leaf` for every leaf. Returns the
    /// number of edges that did not exist before.
    fn upsert_edge(
        &self,
        label: &str,
        relationship: &str,
        root_id: Identity,
        leaf_ids: &[Identity],
    ) -> Result<usize>;

    /// Bulk-merge a `root,friend` delimited file.
    fn load_from_delimited(
        &self,
        path: &Path,
        node_label: &str,
        relationship: &str,
    ) -> Result<LoadSummary>;

    /// Remove every node carrying `label`, together with its edges.
    fn delete_all_of_label(&self, label: &str) -> Result<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadSummary {
    pub records: usize,
    pub new_edges: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRow {
    pub id: String,
    pub status: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub edges_loaded: Option<i64>,
}

pub struct GraphStore {
    conn: Connection,
}

fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Insert the node unless it exists and return its row id.
fn merge_node(conn: &Connection, label: &str, id: Identity, timestamp: i64) -> rusqlite::Result<i64> {
    conn.prepare_cached(
        "INSERT INTO nodes (label, external_id, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(label, external_id) DO NOTHING",
    )?
    .execute(params![label, id, timestamp])?;

    conn.prepare_cached("SELECT id FROM nodes WHERE label = ?1 AND external_id = ?2")?
        .query_row(params![label, id], |row| row.get(0))
}

/// Insert the edge unless it exists; returns 1 when it was created.
fn merge_edge(
    conn: &Connection,
    relationship: &str,
    source: i64,
    target: i64,
    timestamp: i64,
) -> rusqlite::Result<usize> {
    conn.prepare_cached(
        "INSERT INTO edges (relationship, source_node_id, target_node_id, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(source_node_id, target_node_id, relationship) DO NOTHING",
    )?
    .execute(params![relationship, source, target, timestamp])
}

impl GraphStore {
    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let store = GraphStore { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            -- One row per crawl run that was loaded
            CREATE TABLE IF NOT EXISTS crawl_sessions (
    id TEXT PRIMARY KEY,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'failed')),
    seeds TEXT NOT NULL,      -- JSON array of seed names
    configuration TEXT,       -- JSON crawl options
    edges_loaded INTEGER
);

-- Nodes, unique per (label, remote id)
CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    label TEXT NOT NULL,
    external_id INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE(label, external_id)
);

CREATE INDEX IF NOT EXISTS idx_nodes_label ON nodes(label);

-- Edges, unique per (source, target, relationship)
CREATE TABLE IF NOT EXISTS edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    relationship TEXT NOT NULL,
    source_node_id INTEGER NOT NULL,
    target_node_id INTEGER NOT NULL,
    created_at INTEGER NOT NULL,

    FOREIGN KEY(source_node_id) REFERENCES nodes(id) ON DELETE CASCADE,
    FOREIGN KEY(target_node_id) REFERENCES nodes(id) ON DELETE CASCADE,
    UNIQUE(source_node_id, target_node_id, relationship)
);

CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_node_id);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_node_id);
CREATE INDEX IF NOT EXISTS idx_edges_relationship ON edges(relationship);
            ",
        )?;
        Ok(())
    }

    /// Merge every pair in one transaction.
    pub fn load_pairs(
        &self,
        pairs: &[FriendshipPair],
        node_label: &str,
        relationship: &str,
    ) -> Result<LoadSummary> {
        let timestamp = current_timestamp();
        let tx = self.conn.unchecked_transaction()?;

        let mut new_edges = 0;
        for pair in pairs {
            let source = merge_node(&tx, node_label, pair.root, timestamp)?;
            let target = merge_node(&tx, node_label, pair.friend, timestamp)?;
            new_edges += merge_edge(&tx, relationship, source, target, timestamp)?;
        }
        tx.commit()?;

        debug!("Merged {} pairs ({} new edges)", pairs.len(), new_edges);
        Ok(LoadSummary {
            records: pairs.len(),
            new_edges,
        })
    }

    pub fn count_nodes(&self, label: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM nodes WHERE label = ?1",
            params![label],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn count_edges(&self, relationship: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM edges WHERE relationship = ?1",
            params![relationship],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Remote ids `id` points at under `relationship`, ascending.
    pub fn neighbors(&self, label: &str, relationship: &str, id: Identity) -> Result<Vec<Identity>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.external_id
             FROM edges e
             JOIN nodes s ON e.source_node_id = s.id
             JOIN nodes t ON e.target_node_id = t.id
             WHERE s.label = ?1 AND s.external_id = ?2 AND e.relationship = ?3
             ORDER BY t.external_id",
        )?;

        let ids = stmt
            .query_map(params![label, id, relationship], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<Identity>>>()?;
        Ok(ids)
    }

    // Session ledger
    pub fn begin_session<S: Serialize>(&self, seeds: &[S], configuration: &str) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let seeds_json = serde_json::to_string(seeds).unwrap_or_else(|_| "[]".to_string());

        self.conn.execute(
            "INSERT INTO crawl_sessions (id, start_time, status, seeds, configuration) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![&session_id, current_timestamp(), "running", seeds_json, configuration],
        )?;

        Ok(session_id)
    }

    pub fn complete_session(&self, session_id: &str, edges_loaded: usize) -> Result<()> {
        self.conn.execute(
            "UPDATE crawl_sessions SET status = ?1, end_time = ?2, edges_loaded = ?3 WHERE id = ?4",
            params!["completed", current_timestamp(), edges_loaded as i64, session_id],
        )?;
        Ok(())
    }

    pub fn fail_session(&self, session_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE crawl_sessions SET status = ?1, end_time = ?2 WHERE id = ?3",
            params!["failed", current_timestamp(), session_id],
        )?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, status, start_time, end_time, edges_loaded FROM crawl_sessions WHERE id = ?1",
                params![session_id],
                |row| {
                    Ok(SessionRow {
                        id: row.get(0)?,
                        status: row.get(1)?,
                        start_time: row.get(2)?,
                        end_time: row.get(3)?,
                        edges_loaded: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Most recent first.
    pub fn list_sessions(&self, limit: usize) -> Result<Vec<SessionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, status, start_time, end_time, edges_loaded
             FROM crawl_sessions ORDER BY start_time DESC, rowid DESC LIMIT ?1",
        )?;

        let sessions = stmt
            .query_map(params![limit as i64], |row| {
                Ok(SessionRow {
                    id: row.get(0)?,
                    status: row.get(1)?,
                    start_time: row.get(2)?,
                    end_time: row.get(3)?,
                    edges_loaded: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(sessions)
    }
}

impl GraphLoader for GraphStore {
    fn upsert_node(&self, label: &str, id: Identity) -> Result<i64> {
        Ok(merge_node(&self.conn, label, id, current_timestamp())?)
    }

    fn upsert_edge(
        &self,
        label: &str,
        relationship: &str,
        root_id: Identity,
        leaf_ids: &[Identity],
    ) -> Result<usize> {
        let timestamp = current_timestamp();
        let tx = self.conn.unchecked_transaction()?;

        let root = merge_node(&tx, label, root_id, timestamp)?;
        let mut created = 0;
        for leaf_id in leaf_ids {
            let leaf = merge_node(&tx, label, *leaf_id, timestamp)?;
            created += merge_edge(&tx, relationship, root, leaf, timestamp)?;
        }
        tx.commit()?;

        Ok(created)
    }

    fn load_from_delimited(
        &self,
        path: &Path,
        node_label: &str,
        relationship: &str,
    ) -> Result<LoadSummary> {
        info!("Load {} as {}-[{}]", path.display(), node_label, relationship);
        let pairs = snapshot::read_pairs(path)?;
        let summary = self.load_pairs(&pairs, node_label, relationship)?;
        info!(
            "Loaded {} records ({} new edges) from {}",
            summary.records,
            summary.new_edges,
            path.display()
        );
        Ok(summary)
    }

    fn delete_all_of_label(&self, label: &str) -> Result<usize> {
        info!("Detach delete all `{}` nodes", label);
        let deleted = self
            .conn
            .execute("DELETE FROM nodes WHERE label = ?1", params![label])?;
        Ok(deleted)
    }
}
