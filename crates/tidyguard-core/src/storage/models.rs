use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// One row of `files_log`: a completed (or undone) file operation.
#[derive(Debug, Clone, Serialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub filename: String,
    pub old_path: String,
    pub new_path: Option<String>,
    pub operation: String,
    pub timestamp: String,
    pub time_saved: f64,
    pub category: Option<String>,
    pub ai_suggested: bool,
    pub user_approved: bool,
    pub undone_at: Option<String>,
}

/// Insert payload for [`AuditLogEntry`].
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub filename: String,
    pub old_path: String,
    pub new_path: Option<String>,
    pub operation: String,
    pub time_saved: f64,
    pub category: Option<String>,
    pub ai_suggested: bool,
    pub user_approved: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatsPeriod {
    Today,
    Week,
    Month,
    #[default]
    All,
}

impl StatsPeriod {
    /// Earliest `stat_date` included, or `None` for all time.
    pub fn since(&self, today: NaiveDate) -> Option<NaiveDate> {
        match self {
            StatsPeriod::Today => Some(today),
            StatsPeriod::Week => Some(today - Duration::days(7)),
            StatsPeriod::Month => Some(today - Duration::days(30)),
            StatsPeriod::All => None,
        }
    }
}

impl FromStr for StatsPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "today" => Ok(StatsPeriod::Today),
            "week" => Ok(StatsPeriod::Week),
            "month" => Ok(StatsPeriod::Month),
            "all" => Ok(StatsPeriod::All),
            other => Err(format!("unknown stats period '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSummary {
    pub files_organised: i64,
    pub time_saved_minutes: f64,
    pub duplicates_removed: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateRecord {
    pub id: i64,
    pub file_hash: String,
    pub file_path: String,
    pub file_size: i64,
    pub first_seen: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeferredStatus {
    Queued,
    Processing,
    Done,
    Skipped,
    Error,
}

impl DeferredStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeferredStatus::Queued => "queued",
            DeferredStatus::Processing => "processing",
            DeferredStatus::Done => "done",
            DeferredStatus::Skipped => "skipped",
            DeferredStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeferredStatus::Done | DeferredStatus::Skipped | DeferredStatus::Error
        )
    }
}

impl fmt::Display for DeferredStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeferredStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(DeferredStatus::Queued),
            "processing" => Ok(DeferredStatus::Processing),
            "done" => Ok(DeferredStatus::Done),
            "skipped" => Ok(DeferredStatus::Skipped),
            "error" => Ok(DeferredStatus::Error),
            other => Err(format!("unknown deferred status '{}'", other)),
        }
    }
}

/// A file waiting in `deferred_queue` for its eligibility time.
#[derive(Debug, Clone, Serialize)]
pub struct DeferredItem {
    pub id: i64,
    pub file_path: PathBuf,
    pub first_seen: DateTime<Utc>,
    pub eligible_at: DateTime<Utc>,
    pub status: DeferredStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
}

/// Persisted form of a guardian block.
#[derive(Debug, Clone, Serialize)]
pub struct BlockedRecord {
    pub id: i64,
    pub timestamp: String,
    pub operation: String,
    pub source: String,
    pub destination: String,
    pub risk_level: String,
    /// JSON array of findings.
    pub findings: String,
}
