//! Bounded rusqlite connection pool.
//!
//! Connections are checked out as [`PooledConnection`] guards and returned on
//! drop. An idle connection is validated with a round-trip before reuse and
//! discarded if the check fails.

use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::DatabaseConfig;
use crate::error::Error;

#[derive(Debug, Clone)]
enum Target {
    File(PathBuf),
    Memory,
}

struct PoolState {
    idle: Vec<Connection>,
    /// Checked-out plus idle.
    open: usize,
}

pub struct ConnectionPool {
    target: Target,
    max_connections: usize,
    acquire_timeout: Duration,
    busy_timeout_ms: u64,
    state: Mutex<PoolState>,
    returned: Condvar,
}

impl ConnectionPool {
    pub fn open(path: &Path, config: &DatabaseConfig) -> Result<Self, Error> {
        let pool = Self::new(Target::File(path.to_path_buf()), config.max_connections.max(1), config);
        pool.warm()?;
        Ok(pool)
    }

    /// A single plain in-memory connection. Shared-cache mode would lock at the
    /// table level, so concurrent callers queue on the one connection instead.
    pub fn open_in_memory(config: &DatabaseConfig) -> Result<Self, Error> {
        let pool = Self::new(Target::Memory, 1, config);
        pool.warm()?;
        Ok(pool)
    }

    fn new(target: Target, max_connections: usize, config: &DatabaseConfig) -> Self {
        Self {
            target,
            max_connections,
            acquire_timeout: Duration::from_secs(config.acquire_timeout_secs),
            busy_timeout_ms: config.busy_timeout_ms,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
            }),
            returned: Condvar::new(),
        }
    }

    /// Open the first connection eagerly so configuration errors surface at startup.
    fn warm(&self) -> Result<(), Error> {
        let conn = self.create()?;
        let mut state = self.lock_state();
        state.open += 1;
        state.idle.push(conn);
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn create(&self) -> Result<Connection, Error> {
        let conn = match &self.target {
            Target::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                Connection::open(path)?
            }
            Target::Memory => Connection::open_in_memory()?,
        };
        configure_pragmas(&conn, self.busy_timeout_ms, matches!(self.target, Target::File(_)))?;
        super::sqlite::migrate_schema(&conn)?;
        Ok(conn)
    }

    /// Check out a connection, waiting up to the acquire timeout for one to be returned.
    pub fn acquire(&self) -> Result<PooledConnection<'_>, Error> {
        let deadline = Instant::now() + self.acquire_timeout;
        let mut state = self.lock_state();
        loop {
            if let Some(conn) = state.idle.pop() {
                drop(state);
                if is_valid(&conn) {
                    return Ok(PooledConnection {
                        pool: self,
                        conn: Some(conn),
                    });
                }
                warn!("Discarding pooled connection that failed validation");
                drop(conn);
                state = self.lock_state();
                state.open -= 1;
                continue;
            }

            if state.open < self.max_connections {
                state.open += 1;
                drop(state);
                return match self.create() {
                    Ok(conn) => Ok(PooledConnection {
                        pool: self,
                        conn: Some(conn),
                    }),
                    Err(e) => {
                        let mut state = self.lock_state();
                        state.open -= 1;
                        self.returned.notify_one();
                        Err(e)
                    }
                };
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::PoolExhausted(self.acquire_timeout));
            }
            let (guard, _) = self
                .returned
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = guard;
        }
    }

    fn release(&self, conn: Connection) {
        let mut state = self.lock_state();
        // An open transaction means the borrower bailed mid-write.
        if conn.is_autocommit() {
            state.idle.push(conn);
        } else {
            warn!("Discarding pooled connection returned inside a transaction");
            state.open -= 1;
            drop(conn);
        }
        self.returned.notify_one();
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn idle_count(&self) -> usize {
        self.lock_state().idle.len()
    }

    pub fn open_count(&self) -> usize {
        self.lock_state().open
    }

    pub fn is_wal_mode(&self) -> bool {
        self.acquire()
            .ok()
            .and_then(|conn| {
                conn.query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
                    .ok()
            })
            .map(|mode| mode.eq_ignore_ascii_case("wal"))
            .unwrap_or(false)
    }
}

fn is_valid(conn: &Connection) -> bool {
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        .map(|v| v == 1)
        .unwrap_or(false)
}

fn configure_pragmas(conn: &Connection, busy_timeout_ms: u64, file_backed: bool) -> rusqlite::Result<()> {
    if file_backed {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
    }
    conn.execute_batch(&format!(
        "PRAGMA foreign_keys = ON;
         PRAGMA cache_size = -16000;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = {};",
        busy_timeout_ms
    ))?;
    debug!("SQLite pragmas configured (file_backed={})", file_backed);
    Ok(())
}

/// RAII checkout. Returns the connection to the pool on drop.
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only taken in Drop.
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
