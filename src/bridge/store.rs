//! Durable node storage.
//!
//! The routing table only needs add/remove/load. `SqliteNodeStore` keeps
//! them in a single `transmit_nodes` table; every write is one autocommit
//! statement, so it is on disk before the call returns.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{info, warn};

use crate::common::error::{StoreError, StoreResult};

use super::node::{Direction, Node};

/// Persistence contract consumed by the routing table.
pub trait NodeStore: Send + Sync {
    fn add(&self, node: &Node) -> StoreResult<()>;

    /// Returns whether a row was deleted.
    fn remove(&self, channel_id: u64) -> StoreResult<bool>;

    fn load_all(&self) -> StoreResult<Vec<Node>>;
}

/// SQLite-backed node store.
#[derive(Clone)]
pub struct SqliteNodeStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteNodeStore {
    /// Open (or create) the database at `path`, creating parent folders.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Folder {
                path: parent.display().to_string(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        info!(path = %path.display(), "Opened node database");
        Self::with_connection(conn)
    }

    /// Private in-memory database.
    #[cfg(test)]
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS transmit_nodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            server_id INTEGER NOT NULL,
            channel_id INTEGER NOT NULL UNIQUE,
            endpoint_channel TEXT NOT NULL,
            channel_name TEXT NOT NULL DEFAULT '',
            direction INTEGER NOT NULL DEFAULT 0
        );",
    )
}

impl NodeStore for SqliteNodeStore {
    fn add(&self, node: &Node) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO transmit_nodes (server_id, channel_id, endpoint_channel, channel_name, direction)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                node.server_id as i64,
                node.channel_id as i64,
                node.endpoint_channel,
                node.channel_name,
                node.direction.to_id(),
            ],
        )?;
        Ok(())
    }

    fn remove(&self, channel_id: u64) -> StoreResult<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM transmit_nodes WHERE channel_id = ?1",
            rusqlite::params![channel_id as i64],
        )?;
        Ok(deleted > 0)
    }

    fn load_all(&self) -> StoreResult<Vec<Node>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT server_id, channel_id, channel_name, endpoint_channel, direction
             FROM transmit_nodes ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            let server_id: i64 = row.get(0)?;
            let channel_id: i64 = row.get(1)?;
            let channel_name: String = row.get(2)?;
            let endpoint_channel: String = row.get(3)?;
            let direction: i64 = row.get(4)?;
            Ok((server_id, channel_id, channel_name, endpoint_channel, direction))
        })?;

        let mut nodes = Vec::new();
        for row in rows {
            let (server_id, channel_id, channel_name, endpoint_channel, direction) = row?;
            let direction = Direction::from_id(direction).unwrap_or_else(|| {
                warn!(channel_id, direction, "Unknown node direction, treating as read-only");
                Direction::ReadOnly
            });
            nodes.push(Node {
                server_id: server_id as u64,
                channel_id: channel_id as u64,
                channel_name,
                endpoint_channel,
                direction,
            });
        }
        Ok(nodes)
    }
}
