//! Eligibility-delayed organisation.
//!
//! New files are queued with an `eligible_at` time instead of being moved
//! while they may still be in use. A sweep picks up due items, re-checks
//! them, asks the [`Classifier`] where they belong and hands them to the
//! [`ActionManager`]. Every item ends in exactly one terminal state.

mod classifier;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::actions::{ActionManager, ExecuteOptions};
use crate::config::SchedulerConfig;
use crate::error::Error;
use crate::storage::{AuditStore, DeferredItem, DeferredStatus};

pub use classifier::{Classifier, WatchEvent, WatchEventKind};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub fetched: usize,
    pub done: usize,
    pub skipped: usize,
    pub errors: usize,
    /// The classifier was unavailable; due items stay queued.
    pub deferred: bool,
}

/// Terminal state chosen for one item.
struct Outcome {
    id: i64,
    status: DeferredStatus,
    message: Option<String>,
}

type StopSignal = (Mutex<bool>, Condvar);

pub struct DeferredScheduler {
    config: SchedulerConfig,
    store: Arc<AuditStore>,
    actions: Arc<ActionManager>,
    classifier: Arc<dyn Classifier>,
    stop: Arc<StopSignal>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Delays are clamped to `[0, MAX_DELAY_HOURS]`.
const MAX_DELAY_HOURS: f64 = 24.0 * 365.0 * 10.0;

fn hours(delay_hours: f64) -> ChronoDuration {
    let clamped = if delay_hours.is_finite() {
        delay_hours.clamp(0.0, MAX_DELAY_HOURS)
    } else {
        0.0
    };
    ChronoDuration::milliseconds((clamped * 3_600_000.0).round() as i64)
}

impl DeferredScheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<AuditStore>,
        actions: Arc<ActionManager>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            config,
            store,
            actions,
            classifier,
            stop: Arc::new((Mutex::new(false), Condvar::new())),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Exists, is a regular file and passes the protection checks.
    fn precheck(&self, path: &Path) -> Result<(), String> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err("Not a regular file".to_string()),
            Err(_) => return Err("Missing file".to_string()),
        }
        let (safe, reason) = self.actions.guardian().is_file_safe_to_modify(path);
        if safe {
            Ok(())
        } else {
            Err(reason)
        }
    }

    /// Queue `path` to become eligible after `delay_hours`. Returns the queue id,
    /// or `None` when the file fails the pre-check. A path that is already
    /// queued keeps its existing row.
    pub fn schedule_new(&self, path: &Path, delay_hours: f64) -> Result<Option<i64>, Error> {
        self.schedule_at(path, Utc::now() + hours(delay_hours))
    }

    /// Files last modified more than `move_if_older_days` ago are eligible
    /// immediately; younger ones get `default_delay_hours`.
    pub fn schedule_existing(
        &self,
        path: &Path,
        move_if_older_days: u32,
        default_delay_hours: f64,
    ) -> Result<Option<i64>, Error> {
        let modified: Option<DateTime<Utc>> = fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::from);
        let now = Utc::now();
        let old_enough = modified
            .map(|m| now - m >= ChronoDuration::days(i64::from(move_if_older_days)))
            .unwrap_or(false);
        let eligible_at = if old_enough {
            now
        } else {
            now + hours(default_delay_hours)
        };
        self.schedule_at(path, eligible_at)
    }

    fn schedule_at(&self, path: &Path, eligible_at: DateTime<Utc>) -> Result<Option<i64>, Error> {
        if let Err(reason) = self.precheck(path) {
            debug!("Not scheduling {}: {}", path.display(), reason);
            return Ok(None);
        }
        let id = self.store.enqueue_deferred(path, eligible_at)?.id();
        info!(
            "Scheduled {} (id {}) for {}",
            path.display(),
            id,
            eligible_at.to_rfc3339()
        );
        Ok(Some(id))
    }

    /// Removals and events for files that no longer exist are ignored.
    pub fn handle_event(&self, event: &WatchEvent) -> Result<Option<i64>, Error> {
        match event.kind {
            WatchEventKind::Removed => Ok(None),
            WatchEventKind::Created | WatchEventKind::Modified | WatchEventKind::Moved => {
                if !event.path.is_file() {
                    debug!("Ignoring {:?} event for vanished {}", event.kind, event.path.display());
                    return Ok(None);
                }
                self.schedule_new(&event.path, self.config.default_delay_hours)
            }
        }
    }

    /// Process one batch of due items. Items are handled on the action worker
    /// pool; a failure in one never stops the rest.
    pub fn sweep_once(&self) -> Result<SweepReport, Error> {
        let mut report = SweepReport::default();
        if !self.classifier.is_available() {
            debug!("Classifier {} unavailable, sweep deferred", self.classifier.name());
            report.deferred = true;
            return Ok(report);
        }

        let due = self.store.fetch_due(Utc::now(), self.config.batch_size.max(1))?;
        report.fetched = due.len();
        if due.is_empty() {
            return Ok(report);
        }
        debug!("Sweeping {} due items", due.len());

        let outcomes: Vec<Outcome> = self
            .actions
            .install(|| due.par_iter().map(|item| self.process(item)).collect());

        for outcome in outcomes {
            match outcome.status {
                DeferredStatus::Done => report.done += 1,
                DeferredStatus::Skipped => report.skipped += 1,
                _ => report.errors += 1,
            }
            if let Err(e) =
                self.store
                    .mark_deferred(outcome.id, outcome.status, outcome.message.as_deref())
            {
                error!("Failed to mark deferred item {}: {}", outcome.id, e);
            }
        }
        info!(
            "Sweep finished: {} done, {} skipped, {} errors",
            report.done, report.skipped, report.errors
        );
        Ok(report)
    }

    fn process(&self, item: &DeferredItem) -> Outcome {
        let path = item.file_path.as_path();
        let outcome = |status, message: Option<String>| Outcome {
            id: item.id,
            status,
            message,
        };

        if let Err(reason) = self.precheck(path) {
            return outcome(DeferredStatus::Skipped, Some(reason));
        }

        let options = ExecuteOptions {
            user_approved: self.config.pre_approved,
            ..ExecuteOptions::default()
        };
        let organised = panic::catch_unwind(AssertUnwindSafe(|| -> Result<(), String> {
            let classification = self.classifier.classify(path).map_err(|e| {
                warn!("Classifier failed for {}: {}", path.display(), e);
                e.to_string()
            })?;
            let result = self.actions.execute(path, &classification, &options);
            if result.success {
                Ok(())
            } else {
                Err(result.message)
            }
        }));
        match organised {
            Ok(Ok(())) => outcome(DeferredStatus::Done, None),
            Ok(Err(message)) => outcome(DeferredStatus::Error, Some(message)),
            Err(_) => {
                error!("Organising {} panicked", path.display());
                outcome(DeferredStatus::Error, Some("Processing panicked".to_string()))
            }
        }
    }

    /// Sweep every poll interval until [`stop`](Self::stop) is called. Blocks.
    pub fn run(&self) {
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));
        info!("Deferred sweep loop running every {:?}", interval);
        let (flag, wake) = &*self.stop;
        loop {
            if *lock(flag) {
                break;
            }
            if let Err(e) = self.sweep_once() {
                error!("Sweep failed: {}", e);
            }
            let stopped = lock(flag);
            let (stopped, _) = wake
                .wait_timeout_while(stopped, interval, |stopped| !*stopped)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if *stopped {
                break;
            }
        }
        info!("Deferred sweep loop stopped");
    }

    /// Run the sweep loop on a background thread.
    pub fn start(self: &Arc<Self>) -> Result<(), Error> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Ok(());
        }
        *lock(&self.stop.0) = false;
        let scheduler = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("tidyguard-sweep".to_string())
            .spawn(move || scheduler.run())?;
        *worker = Some(handle);
        Ok(())
    }

    /// Signal the loop and wait up to the configured shutdown timeout. An
    /// in-flight sweep finishes its batch; past the timeout the thread is detached.
    pub fn stop(&self) -> bool {
        {
            let (flag, wake) = &*self.stop;
            *lock(flag) = true;
            wake.notify_all();
        }
        let Some(handle) = lock(&self.worker).take() else {
            return true;
        };
        let deadline = Instant::now() + Duration::from_secs(self.config.shutdown_timeout_secs);
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("Sweep thread did not stop within {}s", self.config.shutdown_timeout_secs);
                return false;
            }
            thread::sleep(Duration::from_millis(20));
        }
        if handle.join().is_err() {
            error!("Sweep thread panicked");
        }
        true
    }

    pub fn is_running(&self) -> bool {
        lock(&self.worker).is_some()
    }
}

impl Drop for DeferredScheduler {
    fn drop(&mut self) {
        let (flag, wake) = &*self.stop;
        *lock(flag) = true;
        wake.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ActionConfig, GuardianConfig};
    use crate::guardian::Guardian;
    use crate::model::Classification;
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    struct Fixed;

    impl Classifier for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn classify(&self, _path: &Path) -> Result<Classification, Error> {
            Ok(Classification::new("Documents", 0.9).with_suggested_path("Documents"))
        }
    }

    fn scheduler(dir: &TempDir) -> (PathBuf, DeferredScheduler) {
        let base = dir.path().join("organized");
        let store = Arc::new(AuditStore::open_in_memory().unwrap());
        let guardian = Arc::new(Guardian::new(&base, GuardianConfig::default()));
        let actions = Arc::new(
            ActionManager::new(&base, ActionConfig::default(), guardian, Arc::clone(&store))
                .unwrap(),
        );
        let config = SchedulerConfig {
            poll_interval_secs: 1,
            ..SchedulerConfig::default()
        };
        (base, DeferredScheduler::new(config, store, actions, Arc::new(Fixed)))
    }

    #[test]
    fn test_hours_conversion() {
        assert_eq!(hours(1.5), ChronoDuration::minutes(90));
        assert_eq!(hours(-3.0), ChronoDuration::zero());
    }

    #[test]
    fn test_missing_file_not_scheduled() {
        let dir = tempdir().unwrap();
        let (_, scheduler) = scheduler(&dir);
        let id = scheduler
            .schedule_new(&dir.path().join("nope.txt"), 0.0)
            .unwrap();
        assert!(id.is_none());
    }

    #[test]
    fn test_removed_event_ignored() {
        let dir = tempdir().unwrap();
        let (_, scheduler) = scheduler(&dir);
        let file = dir.path().join("a.txt");
        fs::write(&file, b"hello world").unwrap();
        let event = WatchEvent::new(&file, WatchEventKind::Removed);
        assert!(scheduler.handle_event(&event).unwrap().is_none());
    }

    #[test]
    fn test_start_stop() {
        let dir = tempdir().unwrap();
        let (_, scheduler) = scheduler(&dir);
        let scheduler = Arc::new(scheduler);
        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        assert!(scheduler.stop());
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_sweep_moves_due_file() {
        let dir = tempdir().unwrap();
        let (base, scheduler) = scheduler(&dir);
        let inbox = dir.path().join("inbox");
        fs::create_dir_all(&inbox).unwrap();
        let file = inbox.join("notes.txt");
        fs::write(&file, b"meeting notes").unwrap();

        let id = scheduler.schedule_new(&file, 0.0).unwrap().unwrap();
        let report = scheduler.sweep_once().unwrap();
        assert_eq!(report.done, 1, "{:?}", report);
        assert!(base.join("Documents/notes.txt").exists());

        let item = scheduler.store.deferred_item(id).unwrap().unwrap();
        assert_eq!(item.status, DeferredStatus::Done);
    }
}
