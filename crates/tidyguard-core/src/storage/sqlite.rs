use rusqlite::Connection;
use std::path::Path;
use tracing::debug;

use super::pool::{ConnectionPool, PooledConnection};
use crate::config::DatabaseConfig;
use crate::error::Error;

pub const SCHEMA_VERSION: i64 = 1;

/// Durable audit log, statistics, duplicate registry, deferred queue and
/// blocked-operation trail. Safe to share across threads behind an `Arc`.
pub struct AuditStore {
    pool: ConnectionPool,
}

impl AuditStore {
    pub fn open(path: &Path, config: &DatabaseConfig) -> Result<Self, Error> {
        let pool = ConnectionPool::open(path, config)?;
        debug!("Audit store opened at {}", path.display());
        Ok(Self { pool })
    }

    pub fn open_in_memory() -> Result<Self, Error> {
        let pool = ConnectionPool::open_in_memory(&DatabaseConfig::default())?;
        Ok(Self { pool })
    }

    pub fn connection(&self) -> Result<PooledConnection<'_>, Error> {
        self.pool.acquire()
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn schema_version(&self) -> Result<i64, Error> {
        let conn = self.connection()?;
        let version = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        Ok(version)
    }

    pub fn truncate_all(&self) -> Result<(), Error> {
        self.connection()?.execute_batch(
            "DELETE FROM files_log;
             DELETE FROM duplicates;
             DELETE FROM stats;
             DELETE FROM deferred_queue;
             DELETE FROM blocked_operations;",
        )?;
        debug!("All tables truncated");
        Ok(())
    }
}

/// Bring a fresh connection's schema to [`SCHEMA_VERSION`]. Every statement is
/// idempotent so running it on each new pooled connection is harmless.
pub(crate) fn migrate_schema(conn: &Connection) -> rusqlite::Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        debug!(
            "Schema version {} is newer than supported {}; leaving as-is",
            version, SCHEMA_VERSION
        );
        return Ok(());
    }
    conn.execute_batch(include_str!("schema.sql"))?;
    if version < SCHEMA_VERSION {
        debug!("SQLite schema initialized (version {})", SCHEMA_VERSION);
    }
    Ok(())
}
