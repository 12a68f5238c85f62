use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::models::*;
use super::sqlite::AuditStore;
use crate::duplicates::DuplicateGroup;
use crate::error::Error;
use crate::guardian::BlockedOperation;

/// Result of [`AuditStore::enqueue_deferred`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    New(i64),
    AlreadyQueued(i64),
}

impl Enqueued {
    pub fn id(&self) -> i64 {
        match self {
            Enqueued::New(id) | Enqueued::AlreadyQueued(id) => *id,
        }
    }
}

/// Fixed-width UTC timestamps so lexical order matches chronological order.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Escape `%`, `_` and the escape character itself for `LIKE ... ESCAPE '\'`.
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

const LOG_COLUMNS: &str = "id, filename, old_path, new_path, operation, timestamp, time_saved, \
                           category, ai_suggested, user_approved, undone_at";

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<AuditLogEntry> {
    Ok(AuditLogEntry {
        id: row.get(0)?,
        filename: row.get(1)?,
        old_path: row.get(2)?,
        new_path: row.get(3)?,
        operation: row.get(4)?,
        timestamp: row.get(5)?,
        time_saved: row.get(6)?,
        category: row.get(7)?,
        ai_suggested: row.get(8)?,
        user_approved: row.get(9)?,
        undone_at: row.get(10)?,
    })
}

const DEFERRED_COLUMNS: &str =
    "id, file_path, first_seen, eligible_at, status, attempts, last_error";

fn deferred_from_row(row: &Row<'_>) -> rusqlite::Result<DeferredItem> {
    let status: String = row.get(4)?;
    Ok(DeferredItem {
        id: row.get(0)?,
        file_path: PathBuf::from(row.get::<_, String>(1)?),
        first_seen: parse_timestamp(2, row.get(2)?)?,
        eligible_at: parse_timestamp(3, row.get(3)?)?,
        status: status
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into()))?,
        attempts: row.get(5)?,
        last_error: row.get(6)?,
    })
}

impl AuditStore {
    // ── Audit log ────────────────────────────────────────────────

    /// Insert the log row and fold it into today's statistics in one
    /// immediate transaction. Either both land or neither does.
    pub fn log_action(&self, entry: &NewLogEntry) -> Result<i64, Error> {
        let now = Utc::now();
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO files_log (filename, old_path, new_path, operation, timestamp, \
             time_saved, category, ai_suggested, user_approved) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.filename,
                entry.old_path,
                entry.new_path,
                entry.operation,
                format_timestamp(now),
                entry.time_saved,
                entry.category,
                entry.ai_suggested,
                entry.user_approved,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO stats (stat_date, files_organised, time_saved_minutes, duplicates_removed) \
             VALUES (?1, 1, ?2, 0) \
             ON CONFLICT(stat_date) DO UPDATE SET \
             files_organised = files_organised + 1, \
             time_saved_minutes = time_saved_minutes + excluded.time_saved_minutes",
            params![now.date_naive().to_string(), entry.time_saved],
        )?;
        tx.commit()?;
        debug!("Logged {} of {} as entry {}", entry.operation, entry.old_path, id);
        Ok(id)
    }

    pub fn log_entry(&self, id: i64) -> Result<Option<AuditLogEntry>, Error> {
        let conn = self.connection()?;
        let entry = conn
            .query_row(
                &format!("SELECT {} FROM files_log WHERE id = ?1", LOG_COLUMNS),
                params![id],
                log_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn recent_logs(&self, limit: usize) -> Result<Vec<AuditLogEntry>, Error> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM files_log ORDER BY id DESC LIMIT ?1",
            LOG_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![limit as i64], log_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Substring search over file name and both paths. `%` and `_` in the
    /// query match literally.
    pub fn search_logs(
        &self,
        query: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>, Error> {
        let pattern = format!("%{}%", escape_like(query));
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM files_log \
             WHERE (filename LIKE ?1 ESCAPE '\\' \
                    OR old_path LIKE ?1 ESCAPE '\\' \
                    OR new_path LIKE ?1 ESCAPE '\\') \
               AND (?2 IS NULL OR category = ?2) \
             ORDER BY id DESC LIMIT ?3",
            LOG_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![pattern, category, limit as i64], log_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Most recent relocation that has not been undone yet.
    pub fn undo_candidate(&self) -> Result<Option<AuditLogEntry>, Error> {
        let conn = self.connection()?;
        let entry = conn
            .query_row(
                &format!(
                    "SELECT {} FROM files_log \
                     WHERE operation IN ('move', 'rename', 'archive') \
                       AND new_path IS NOT NULL AND undone_at IS NULL \
                     ORDER BY id DESC LIMIT 1",
                    LOG_COLUMNS
                ),
                [],
                log_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn mark_undone(&self, id: i64) -> Result<bool, Error> {
        let conn = self.connection()?;
        let changed = conn.execute(
            "UPDATE files_log SET undone_at = ?2 WHERE id = ?1 AND undone_at IS NULL",
            params![id, format_timestamp(Utc::now())],
        )?;
        Ok(changed > 0)
    }

    // ── Statistics ───────────────────────────────────────────────

    pub fn stats(&self, period: StatsPeriod) -> Result<StatsSummary, Error> {
        let since = period
            .since(Utc::now().date_naive())
            .map(|date| date.to_string());
        let conn = self.connection()?;
        let summary = conn.query_row(
            "SELECT COALESCE(SUM(files_organised), 0), \
                    COALESCE(SUM(time_saved_minutes), 0.0), \
                    COALESCE(SUM(duplicates_removed), 0) \
             FROM stats WHERE (?1 IS NULL OR stat_date >= ?1)",
            params![since],
            |row| {
                Ok(StatsSummary {
                    files_organised: row.get(0)?,
                    time_saved_minutes: row.get(1)?,
                    duplicates_removed: row.get(2)?,
                })
            },
        )?;
        Ok(summary)
    }

    pub fn record_duplicates_removed(&self, count: u64) -> Result<(), Error> {
        if count == 0 {
            return Ok(());
        }
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO stats (stat_date, files_organised, time_saved_minutes, duplicates_removed) \
             VALUES (?1, 0, 0, ?2) \
             ON CONFLICT(stat_date) DO UPDATE SET \
             duplicates_removed = duplicates_removed + excluded.duplicates_removed",
            params![Utc::now().date_naive().to_string(), count as i64],
        )?;
        Ok(())
    }

    // ── Duplicate registry ───────────────────────────────────────

    /// Returns false when the (hash, path) pair was already registered.
    pub fn add_duplicate(&self, file_hash: &str, file_path: &Path, file_size: u64) -> Result<bool, Error> {
        let conn = self.connection()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO duplicates (file_hash, file_path, file_size, first_seen) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                file_hash,
                file_path.to_string_lossy(),
                file_size as i64,
                format_timestamp(Utc::now())
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Register every member of every group in one transaction. Returns the
    /// number of newly inserted rows.
    pub fn add_duplicate_groups(&self, groups: &[DuplicateGroup]) -> Result<usize, Error> {
        let now = format_timestamp(Utc::now());
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO duplicates (file_hash, file_path, file_size, first_seen) \
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for group in groups {
                for path in &group.paths {
                    inserted += stmt.execute(params![
                        group.hash,
                        path.to_string_lossy(),
                        group.size as i64,
                        now
                    ])?;
                }
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn duplicate_records(&self, file_hash: Option<&str>) -> Result<Vec<DuplicateRecord>, Error> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, file_hash, file_path, file_size, first_seen FROM duplicates \
             WHERE (?1 IS NULL OR file_hash = ?1) ORDER BY file_hash, file_path",
        )?;
        let rows = stmt
            .query_map(params![file_hash], |row| {
                Ok(DuplicateRecord {
                    id: row.get(0)?,
                    file_hash: row.get(1)?,
                    file_path: row.get(2)?,
                    file_size: row.get(3)?,
                    first_seen: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn remove_duplicate(&self, file_path: &Path) -> Result<usize, Error> {
        let conn = self.connection()?;
        let removed = conn.execute(
            "DELETE FROM duplicates WHERE file_path = ?1",
            params![file_path.to_string_lossy()],
        )?;
        Ok(removed)
    }

    // ── Deferred queue ───────────────────────────────────────────

    /// Queue `file_path` unless it is already waiting in `queued` state.
    pub fn enqueue_deferred(&self, file_path: &Path, eligible_at: DateTime<Utc>) -> Result<Enqueued, Error> {
        let path = file_path.to_string_lossy().into_owned();
        let now = format_timestamp(Utc::now());
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM deferred_queue WHERE file_path = ?1 AND status = 'queued' \
                 ORDER BY id LIMIT 1",
                params![path],
                |row| row.get(0),
            )
            .optional()?;
        let outcome = match existing {
            Some(id) => Enqueued::AlreadyQueued(id),
            None => {
                tx.execute(
                    "INSERT INTO deferred_queue (file_path, first_seen, eligible_at, status, updated_at) \
                     VALUES (?1, ?2, ?3, 'queued', ?2)",
                    params![path, now, format_timestamp(eligible_at)],
                )?;
                Enqueued::New(tx.last_insert_rowid())
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    /// Queued items whose eligibility time has passed, oldest eligibility first.
    pub fn fetch_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<DeferredItem>, Error> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM deferred_queue \
             WHERE status = 'queued' AND eligible_at <= ?1 \
             ORDER BY eligible_at ASC, id ASC LIMIT ?2",
            DEFERRED_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![format_timestamp(now), limit as i64], deferred_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Transition an item. Only `queued` and `processing` items move; terminal
    /// states are final. Returns false when nothing changed.
    pub fn mark_deferred(&self, id: i64, status: DeferredStatus, error: Option<&str>) -> Result<bool, Error> {
        let conn = self.connection()?;
        let changed = conn.execute(
            "UPDATE deferred_queue SET status = ?2, last_error = ?3, updated_at = ?4, \
             attempts = attempts + CASE WHEN ?2 = 'processing' THEN 1 ELSE 0 END \
             WHERE id = ?1 AND status IN ('queued', 'processing')",
            params![id, status.as_str(), error, format_timestamp(Utc::now())],
        )?;
        Ok(changed > 0)
    }

    pub fn deferred_item(&self, id: i64) -> Result<Option<DeferredItem>, Error> {
        let conn = self.connection()?;
        let item = conn
            .query_row(
                &format!("SELECT {} FROM deferred_queue WHERE id = ?1", DEFERRED_COLUMNS),
                params![id],
                deferred_from_row,
            )
            .optional()?;
        Ok(item)
    }

    pub fn list_deferred(&self, status: Option<DeferredStatus>, limit: usize) -> Result<Vec<DeferredItem>, Error> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM deferred_queue WHERE (?1 IS NULL OR status = ?1) \
             ORDER BY eligible_at ASC, id ASC LIMIT ?2",
            DEFERRED_COLUMNS
        ))?;
        let rows = stmt
            .query_map(
                params![status.map(|s| s.as_str()), limit as i64],
                deferred_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Blocked operations ───────────────────────────────────────

    pub fn record_blocked(&self, blocked: &BlockedOperation) -> Result<i64, Error> {
        let findings = serde_json::to_string(&blocked.findings)
            .map_err(|e| Error::Persistence(format!("Failed to encode findings: {}", e)))?;
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO blocked_operations (timestamp, operation, source, destination, risk_level, findings) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                format_timestamp(blocked.timestamp),
                blocked.operation.as_str(),
                blocked.source.to_string_lossy(),
                blocked.destination.to_string_lossy(),
                blocked.risk_level.as_str(),
                findings
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn blocked_operations(&self, limit: usize) -> Result<Vec<BlockedRecord>, Error> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, timestamp, operation, source, destination, risk_level, findings \
             FROM blocked_operations ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(BlockedRecord {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    operation: row.get(2)?,
                    source: row.get(3)?,
                    destination: row.get(4)?,
                    risk_level: row.get(5)?,
                    findings: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn blocked_count(&self) -> Result<i64, Error> {
        let conn = self.connection()?;
        let count = conn.query_row("SELECT COUNT(*) FROM blocked_operations", [], |row| row.get(0))?;
        Ok(count)
    }
}
