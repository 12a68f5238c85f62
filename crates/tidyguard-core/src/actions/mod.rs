//! Guardian-gated file mutation.
//!
//! Every entry point validates the request, re-stats the source, applies
//! policy, asks the [`Guardian`], and only then mutates under a path lock.
//! Successful mutations are written to the audit store in one transaction.

mod cleanup;
pub mod fs_ops;
pub mod lock;
pub mod undo;
pub mod validate;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Serialize, Serializer};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::ActionConfig;
use crate::error::Error;
use crate::guardian::{Guardian, GuardianStats, RiskEvaluation};
use crate::model::{Classification, FolderPolicy, OperationKind};
use crate::storage::{AuditStore, NewLogEntry, StatsPeriod, StatsSummary};
use lock::PathLocks;
use undo::{UndoEntry, UndoStack};

pub use cleanup::CleanupReport;

/// What an [`ActionResult`] reports as done. Serialized as a plain label
/// (`move`, `rename_dry_run`, `blocked_by_guardian`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionTaken {
    Performed(OperationKind),
    DryRun(OperationKind),
    Undo,
    UndoDryRun,
    Blocked,
    BlockedByGuardian,
    None,
    Error,
}

impl ActionTaken {
    pub fn label(&self) -> String {
        match self {
            ActionTaken::Performed(kind) => kind.as_str().to_string(),
            ActionTaken::DryRun(kind) => format!("{}_dry_run", kind),
            ActionTaken::Undo => "undo".to_string(),
            ActionTaken::UndoDryRun => "undo_dry_run".to_string(),
            ActionTaken::Blocked => "blocked".to_string(),
            ActionTaken::BlockedByGuardian => "blocked_by_guardian".to_string(),
            ActionTaken::None => "none".to_string(),
            ActionTaken::Error => "error".to_string(),
        }
    }
}

impl fmt::Display for ActionTaken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl Serialize for ActionTaken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

/// The layer that stopped (or, for persistence, degraded) an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorOrigin {
    Validation,
    Policy,
    Guardian,
    Lock,
    FileOperation,
    Persistence,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    /// True only when the filesystem mutation completed (or was simulated).
    pub success: bool,
    pub action: ActionTaken,
    pub old_path: PathBuf,
    pub new_path: Option<PathBuf>,
    pub message: String,
    pub time_saved: f64,
    pub origin: Option<ErrorOrigin>,
    pub evaluation: Option<RiskEvaluation>,
    pub warnings: Vec<String>,
    /// Set for lock timeouts and OS failures; the caller may try again later.
    pub retryable: bool,
    pub log_id: Option<i64>,
}

impl ActionResult {
    fn refused(
        old_path: &Path,
        action: ActionTaken,
        origin: Option<ErrorOrigin>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            action,
            old_path: old_path.to_path_buf(),
            new_path: None,
            message: message.into(),
            time_saved: 0.0,
            origin,
            evaluation: None,
            warnings: Vec::new(),
            retryable: false,
            log_id: None,
        }
    }

    fn failed(old_path: &Path, origin: ErrorOrigin, error: &Error) -> Self {
        Self {
            retryable: error.is_retryable(),
            ..Self::refused(old_path, ActionTaken::Error, Some(origin), error.to_string())
        }
    }

    fn with_new_path(mut self, new_path: impl Into<PathBuf>) -> Self {
        self.new_path = Some(new_path.into());
        self
    }

    pub fn is_blocked(&self) -> bool {
        matches!(
            self.action,
            ActionTaken::Blocked | ActionTaken::BlockedByGuardian
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    pub user_approved: bool,
    pub folder_policy: Option<FolderPolicy>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionStats {
    pub summary: StatsSummary,
    pub guardian: GuardianStats,
    pub persisted_blocked: i64,
}

/// One operation after validation and destination derivation.
struct Request<'a> {
    kind: OperationKind,
    source: &'a Path,
    /// Same as `source` for deletes.
    destination: PathBuf,
    classification: Option<&'a Classification>,
    user_approved: bool,
    dry_run: bool,
    expected_size: u64,
}

fn past_tense(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Move => "moved",
        OperationKind::Rename => "renamed",
        OperationKind::Delete => "deleted",
        OperationKind::Archive => "archived",
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub struct ActionManager {
    base_destination: PathBuf,
    config: ActionConfig,
    guardian: Arc<Guardian>,
    store: Arc<AuditStore>,
    locks: PathLocks,
    undo: UndoStack,
    pool: ThreadPool,
}

impl ActionManager {
    pub fn new(
        base_destination: impl Into<PathBuf>,
        config: ActionConfig,
        guardian: Arc<Guardian>,
        store: Arc<AuditStore>,
    ) -> Result<Self, Error> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_threads.max(1))
            .thread_name(|i| format!("tidyguard-action-{}", i))
            .build()
            .map_err(|e| Error::Other(format!("failed to build action worker pool: {}", e)))?;
        Ok(Self {
            base_destination: base_destination.into(),
            locks: PathLocks::new(Duration::from_secs(config.lock_timeout_secs)),
            undo: UndoStack::new(config.undo_capacity),
            config,
            guardian,
            store,
            pool,
        })
    }

    pub fn base_destination(&self) -> &Path {
        &self.base_destination
    }

    pub fn config(&self) -> &ActionConfig {
        &self.config
    }

    pub fn guardian(&self) -> &Arc<Guardian> {
        &self.guardian
    }

    pub fn store(&self) -> &Arc<AuditStore> {
        &self.store
    }

    /// Run `op` on the action worker pool.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    fn is_dry_run(&self, requested: bool) -> bool {
        requested || self.config.dry_run
    }

    fn time_saved_for(&self, kind: OperationKind) -> f64 {
        let estimates = &self.config.time_estimates;
        match kind {
            OperationKind::Move => estimates.move_minutes,
            OperationKind::Rename => estimates.rename_minutes,
            OperationKind::Delete => estimates.delete_minutes,
            OperationKind::Archive => estimates.archive_minutes,
        }
    }

    /// Organise one file according to its classification.
    pub fn execute(
        &self,
        source: &Path,
        classification: &Classification,
        options: &ExecuteOptions,
    ) -> ActionResult {
        let dry_run = self.is_dry_run(options.dry_run);

        let valid = validate::validate_source_path(source)
            .and_then(|_| validate::validate_classification(classification));
        if let Err(e) = valid {
            warn!("Input validation failed for {}: {}", source.display(), e);
            return ActionResult::refused(
                source,
                ActionTaken::Blocked,
                Some(ErrorOrigin::Validation),
                format!("Security: {}", e),
            );
        }

        let size = match self.inspect_source(source, true) {
            Ok(size) => size,
            Err(result) => return *result,
        };

        if let Some(result) = self.check_policies(source, options.folder_policy) {
            return result;
        }

        let (kind, destination) = match self.derive_destination(source, classification) {
            Ok(Some(derived)) => derived,
            Ok(None) => {
                return ActionResult::refused(source, ActionTaken::None, None, "No action suggested")
            }
            Err(e) => {
                warn!("Destination rejected for {}: {}", source.display(), e);
                return ActionResult::refused(
                    source,
                    ActionTaken::Blocked,
                    Some(ErrorOrigin::Validation),
                    format!("Security: {}", e),
                );
            }
        };

        self.gate_and_perform(Request {
            kind,
            source,
            destination,
            classification: Some(classification),
            user_approved: options.user_approved,
            dry_run,
            expected_size: size,
        })
    }

    /// Execute many requests concurrently on the worker pool. Results keep input order.
    pub fn execute_batch(
        &self,
        requests: &[(PathBuf, Classification)],
        options: &ExecuteOptions,
    ) -> Vec<ActionResult> {
        info!("Executing batch of {} requests", requests.len());
        self.pool.install(|| {
            requests
                .par_iter()
                .map(|(path, classification)| self.execute(path, classification, options))
                .collect()
        })
    }

    pub fn delete(&self, path: &Path, user_approved: bool, dry_run: bool) -> ActionResult {
        let dry_run = self.is_dry_run(dry_run);
        if let Err(e) = validate::validate_source_path(path) {
            return ActionResult::refused(
                path,
                ActionTaken::Blocked,
                Some(ErrorOrigin::Validation),
                format!("Security: {}", e),
            );
        }
        let size = match self.inspect_source(path, false) {
            Ok(size) => size,
            Err(result) => return *result,
        };
        if let Some(result) = self.check_policies(path, None) {
            return result;
        }
        self.gate_and_perform(Request {
            kind: OperationKind::Delete,
            source: path,
            destination: path.to_path_buf(),
            classification: None,
            user_approved,
            dry_run,
            expected_size: size,
        })
    }

    /// Move a file into `archive_dir`, the configured archive directory, or
    /// `<base>/Archive/YYYY/MM`. A relative directory is taken under the base.
    pub fn archive(
        &self,
        path: &Path,
        archive_dir: Option<&Path>,
        user_approved: bool,
        dry_run: bool,
    ) -> ActionResult {
        let dry_run = self.is_dry_run(dry_run);
        if let Err(e) = validate::validate_source_path(path) {
            return ActionResult::refused(
                path,
                ActionTaken::Blocked,
                Some(ErrorOrigin::Validation),
                format!("Security: {}", e),
            );
        }
        let size = match self.inspect_source(path, false) {
            Ok(size) => size,
            Err(result) => return *result,
        };
        if let Some(result) = self.check_policies(path, None) {
            return result;
        }

        let directory = archive_dir
            .map(Path::to_path_buf)
            .or_else(|| self.config.archive_dir.clone())
            .unwrap_or_else(|| self.default_archive_dir(Utc::now()));
        let directory = if directory.is_relative() {
            self.base_destination.join(directory)
        } else {
            directory
        };
        let Some(name) = path.file_name() else {
            return ActionResult::refused(
                path,
                ActionTaken::Blocked,
                Some(ErrorOrigin::Validation),
                "Security: source has no file name",
            );
        };
        let destination = fs_ops::unique_destination(&directory.join(name));

        self.gate_and_perform(Request {
            kind: OperationKind::Archive,
            source: path,
            destination,
            classification: None,
            user_approved,
            dry_run,
            expected_size: size,
        })
    }

    pub fn default_archive_dir(&self, now: DateTime<Utc>) -> PathBuf {
        self.base_destination
            .join("Archive")
            .join(now.format("%Y").to_string())
            .join(now.format("%m").to_string())
    }

    /// Size of the regular file at `source`, or the refusal to return.
    fn inspect_source(&self, source: &Path, enforce_limits: bool) -> Result<u64, Box<ActionResult>> {
        let meta = match fs::metadata(source) {
            Ok(meta) => meta,
            Err(_) => {
                warn!("File not found: {}", source.display());
                return Err(Box::new(ActionResult::refused(
                    source,
                    ActionTaken::None,
                    None,
                    "File not found",
                )));
            }
        };
        if !meta.is_file() {
            return Err(Box::new(ActionResult::refused(
                source,
                ActionTaken::Blocked,
                Some(ErrorOrigin::Validation),
                "Not a regular file",
            )));
        }
        let size = meta.len();
        if enforce_limits {
            if size == 0 {
                warn!("Empty file blocked: {}", source.display());
                return Err(Box::new(ActionResult::refused(
                    source,
                    ActionTaken::Blocked,
                    Some(ErrorOrigin::Validation),
                    "Empty files not processed",
                )));
            }
            if size > self.config.max_file_size {
                warn!(
                    "File too large: {} ({} bytes > {} bytes)",
                    source.display(),
                    size,
                    self.config.max_file_size
                );
                return Err(Box::new(ActionResult::refused(
                    source,
                    ActionTaken::Blocked,
                    Some(ErrorOrigin::Validation),
                    format!(
                        "File too large ({} bytes > {} bytes)",
                        size, self.config.max_file_size
                    ),
                )));
            }
        }
        Ok(size)
    }

    fn check_policies(&self, source: &Path, policy: Option<FolderPolicy>) -> Option<ActionResult> {
        if policy.is_some_and(|p| !p.allow_move) {
            info!("Operation blocked by folder policy: {}", source.display());
            let e = Error::PolicyBlock("folder policy disallows moves".into());
            return Some(ActionResult::refused(
                source,
                ActionTaken::Blocked,
                Some(ErrorOrigin::Policy),
                e.to_string(),
            ));
        }
        if let Some(entry) = validate::blacklisted_by(source, &self.config.path_blacklist) {
            info!("Operation blocked by blacklist: {}", source.display());
            let e = Error::PolicyBlock(format!("path is blacklisted ({})", entry.display()));
            return Some(ActionResult::refused(
                source,
                ActionTaken::Blocked,
                Some(ErrorOrigin::Policy),
                e.to_string(),
            ));
        }
        None
    }

    fn derive_destination(
        &self,
        source: &Path,
        classification: &Classification,
    ) -> Result<Option<(OperationKind, PathBuf)>, Error> {
        let name = classification.suggested_name.as_deref();
        let (kind, destination) = match (classification.suggested_path.as_deref(), name) {
            (Some(suggested), _) if !suggested.trim().is_empty() => {
                let destination = validate::build_destination(
                    &self.base_destination,
                    source,
                    suggested,
                    name,
                    self.guardian.config().max_symlink_depth,
                )?;
                (OperationKind::Move, destination)
            }
            (_, Some(name)) => {
                validate::validate_name(name)?;
                let parent = source
                    .parent()
                    .ok_or_else(|| Error::Validation("Source has no parent directory".into()))?;
                (OperationKind::Rename, parent.join(name))
            }
            _ => return Ok(None),
        };
        if destination == source {
            return Ok(Some((kind, destination)));
        }
        Ok(Some((kind, fs_ops::unique_destination(&destination))))
    }

    fn gate_and_perform(&self, request: Request<'_>) -> ActionResult {
        info!(
            "[FINAL SAFETY CHECK] Evaluating {} of {}",
            request.kind,
            request.source.display()
        );
        let evaluation = self.guardian.evaluate(
            request.source,
            &request.destination,
            request.kind,
            request.classification,
            request.user_approved,
        );

        if !evaluation.approved {
            warn!(
                "[SAFETY GUARDIAN BLOCKED] {} of {}: {}",
                request.kind,
                request.source.display(),
                evaluation.summary()
            );
            let e = Error::SafetyBlock(evaluation.summary());
            let mut result = ActionResult::refused(
                request.source,
                ActionTaken::BlockedByGuardian,
                Some(ErrorOrigin::Guardian),
                e.to_string(),
            );
            if request.kind.is_relocation() {
                result.new_path = Some(request.destination.clone());
            }
            result.evaluation = Some(evaluation);
            return result;
        }
        if evaluation.warnings.is_empty() {
            info!("[SAFETY GUARDIAN] Approved, proceeding with {}", request.kind);
        } else {
            info!(
                "[SAFETY GUARDIAN] Approved with {} warnings",
                evaluation.warnings.len()
            );
        }

        let mut result = if request.dry_run {
            self.simulate(&request)
        } else {
            self.perform(&request)
        };
        result.evaluation = Some(evaluation);
        result
    }

    fn simulate(&self, request: &Request<'_>) -> ActionResult {
        let kind = request.kind;
        let (new_path, message) = if kind.is_relocation() {
            (
                Some(request.destination.clone()),
                format!(
                    "[DRY RUN] Would {} file to {}",
                    kind,
                    request.destination.display()
                ),
            )
        } else {
            (
                None,
                format!("[DRY RUN] Would delete {}", request.source.display()),
            )
        };
        ActionResult {
            success: true,
            new_path,
            time_saved: self.time_saved_for(kind),
            ..ActionResult::refused(request.source, ActionTaken::DryRun(kind), None, message)
        }
    }

    fn perform(&self, request: &Request<'_>) -> ActionResult {
        let kind = request.kind;
        let source = request.source;

        let guard = match self.locks.acquire(source) {
            Ok(guard) => guard,
            Err(e) => {
                warn!("Could not lock {}: {}", source.display(), e);
                return ActionResult::failed(source, ErrorOrigin::Lock, &e);
            }
        };

        match fs::metadata(source) {
            Err(_) => {
                return ActionResult::refused(
                    source,
                    ActionTaken::None,
                    None,
                    format!("File no longer exists at {}", source.display()),
                )
            }
            Ok(meta) if meta.len() != request.expected_size => {
                warn!("{} changed size before it could be locked", source.display());
                return ActionResult::refused(
                    source,
                    ActionTaken::Blocked,
                    Some(ErrorOrigin::Validation),
                    "File changed since it was inspected",
                );
            }
            Ok(_) => {}
        }

        let outcome = if kind.is_relocation() {
            let destination = fs_ops::unique_destination(&request.destination);
            fs_ops::move_file(source, &destination).map(|_| Some(destination))
        } else {
            fs_ops::remove_file(source).map(|_| None)
        };
        drop(guard);

        let new_path = match outcome {
            Ok(new_path) => new_path,
            Err(cause) => {
                let e = Error::file_operation(kind.as_str(), source, &request.destination, cause);
                error!("{}", e);
                let result = ActionResult::failed(source, ErrorOrigin::FileOperation, &e);
                return if kind.is_relocation() {
                    result.with_new_path(&request.destination)
                } else {
                    result
                };
            }
        };

        let time_saved = self.time_saved_for(kind);
        let message = match &new_path {
            Some(path) => format!("Successfully {} file to {}", past_tense(kind), path.display()),
            None => format!("Successfully {} {}", past_tense(kind), source.display()),
        };
        info!("{}", message);
        let mut result = ActionResult {
            success: true,
            new_path: new_path.clone(),
            time_saved,
            ..ActionResult::refused(source, ActionTaken::Performed(kind), None, message)
        };

        let entry = NewLogEntry {
            filename: source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            old_path: display(source),
            new_path: new_path.as_deref().map(display),
            operation: kind.as_str().to_string(),
            time_saved,
            category: request.classification.map(|c| c.category.clone()),
            ai_suggested: request.classification.is_some_and(|c| c.is_ai_suggested()),
            user_approved: request.user_approved,
        };
        match self.store.log_action(&entry) {
            Ok(id) => result.log_id = Some(id),
            Err(e) => {
                let e = Error::Persistence(e.to_string());
                warn!("Audit write failed after {} of {}: {}", kind, source.display(), e);
                result.warnings.push(e.to_string());
                result.origin = Some(ErrorOrigin::Persistence);
            }
        }

        if let Some(new_path) = new_path {
            self.undo.push(UndoEntry {
                action: kind,
                old_path: source.to_path_buf(),
                new_path,
                timestamp: Utc::now(),
            });
        }
        result
    }

    /// Reverse the most recent relocation that has not been undone. Refuses
    /// when the file is gone from its new location or when the original
    /// location is occupied.
    pub fn undo_last(&self, dry_run: bool) -> ActionResult {
        let dry_run = self.is_dry_run(dry_run);
        let entry = match self.store.undo_candidate() {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                return ActionResult::refused(Path::new(""), ActionTaken::None, None, "Nothing to undo")
            }
            Err(e) => return ActionResult::failed(Path::new(""), ErrorOrigin::Persistence, &e),
        };
        let original = PathBuf::from(&entry.old_path);
        let Some(current) = entry.new_path.as_deref().map(PathBuf::from) else {
            return ActionResult::refused(&original, ActionTaken::None, None, "Nothing to undo");
        };

        if !current.is_file() {
            warn!("Cannot undo: {} no longer exists", current.display());
            return ActionResult::refused(
                &current,
                ActionTaken::None,
                Some(ErrorOrigin::Validation),
                format!("Cannot undo: file no longer exists at {}", current.display()),
            )
            .with_new_path(&original);
        }
        if fs::symlink_metadata(&original).is_ok() {
            warn!("Cannot undo: {} is occupied", original.display());
            return ActionResult::refused(
                &current,
                ActionTaken::Blocked,
                Some(ErrorOrigin::Validation),
                format!(
                    "Cannot undo: something already exists at {}",
                    original.display()
                ),
            )
            .with_new_path(&original);
        }

        if dry_run {
            return ActionResult {
                success: true,
                ..ActionResult::refused(
                    &current,
                    ActionTaken::UndoDryRun,
                    None,
                    format!(
                        "[DRY RUN] Would move {} back to {}",
                        current.display(),
                        original.display()
                    ),
                )
            }
            .with_new_path(&original);
        }

        let guard = match self.locks.acquire(&current) {
            Ok(guard) => guard,
            Err(e) => return ActionResult::failed(&current, ErrorOrigin::Lock, &e),
        };
        let moved = fs_ops::move_file(&current, &original);
        drop(guard);
        if let Err(cause) = moved {
            let e = Error::file_operation("undo", &current, &original, cause);
            error!("{}", e);
            return ActionResult::failed(&current, ErrorOrigin::FileOperation, &e)
                .with_new_path(&original);
        }

        let message = format!("Restored {} to {}", current.display(), original.display());
        info!("{}", message);
        let mut result = ActionResult {
            success: true,
            log_id: Some(entry.id),
            ..ActionResult::refused(&current, ActionTaken::Undo, None, message)
        }
        .with_new_path(&original);
        if let Err(e) = self.store.mark_undone(entry.id) {
            warn!("Could not mark log entry {} undone: {}", entry.id, e);
            result.warnings.push(Error::Persistence(e.to_string()).to_string());
            result.origin = Some(ErrorOrigin::Persistence);
        }
        self.undo.forget(&original, &current);
        result
    }

    /// This session's relocations, newest first.
    pub fn undo_history(&self) -> Vec<UndoEntry> {
        self.undo.history()
    }

    pub fn stats(&self, period: StatsPeriod) -> Result<ActionStats, Error> {
        Ok(ActionStats {
            summary: self.store.stats(period)?,
            guardian: self.guardian.statistics(),
            persisted_blocked: self.store.blocked_count()?,
        })
    }
}
