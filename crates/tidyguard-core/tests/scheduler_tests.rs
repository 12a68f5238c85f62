use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::{tempdir, TempDir};

use tidyguard_core::config::{ActionConfig, GuardianConfig, SchedulerConfig};
use tidyguard_core::storage::DeferredStatus;
use tidyguard_core::{
    ActionManager, AuditStore, Classification, Classifier, DeferredScheduler, Error, Guardian,
    WatchEvent, WatchEventKind,
};

/// Files anything with "fail" in its name as an error, "boom" panics,
/// "nowhere" gets no suggestion, "unsure" is low confidence; everything else
/// goes to Documents.
struct ByName {
    available: AtomicBool,
    calls: AtomicUsize,
}

impl ByName {
    fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }
}

impl Classifier for ByName {
    fn name(&self) -> &str {
        "by-name"
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn classify(&self, path: &Path) -> Result<Classification, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        if name.contains("fail") {
            return Err(Error::Classifier(format!("cannot classify {}", name)));
        }
        if name.contains("boom") {
            panic!("classifier crashed");
        }
        if name.contains("nowhere") {
            return Ok(Classification::new("Unknown", 0.9));
        }
        if name.contains("unsure") {
            return Ok(Classification::new("Documents", 0.3).with_suggested_path("Documents"));
        }
        Ok(Classification::new("Documents", 0.9).with_suggested_path("Documents"))
    }
}

struct Harness {
    _dir: TempDir,
    inbox: PathBuf,
    base: PathBuf,
    store: Arc<AuditStore>,
    classifier: Arc<ByName>,
    scheduler: Arc<DeferredScheduler>,
}

fn harness() -> Harness {
    harness_with(SchedulerConfig {
        poll_interval_secs: 1,
        ..SchedulerConfig::default()
    })
}

fn harness_with(config: SchedulerConfig) -> Harness {
    let dir = tempdir().unwrap();
    let inbox = dir.path().join("inbox");
    let base = dir.path().join("organized");
    fs::create_dir_all(&inbox).unwrap();
    let store = Arc::new(AuditStore::open_in_memory().unwrap());
    let guardian = Arc::new(Guardian::new(&base, GuardianConfig::default()));
    let actions = Arc::new(
        ActionManager::new(&base, ActionConfig::default(), guardian, Arc::clone(&store)).unwrap(),
    );
    let classifier = Arc::new(ByName::new());
    let scheduler = Arc::new(DeferredScheduler::new(
        config,
        Arc::clone(&store),
        actions,
        classifier.clone(),
    ));
    Harness {
        _dir: dir,
        inbox,
        base,
        store,
        classifier,
        scheduler,
    }
}

fn write(path: &Path, content: &str) -> PathBuf {
    fs::write(path, content).unwrap();
    path.to_path_buf()
}

#[test]
fn test_zero_delay_item_is_due_until_marked() {
    let h = harness();
    let file = write(&h.inbox.join("a.txt"), "alpha");

    let id = h.scheduler.schedule_new(&file, 0.0).unwrap().unwrap();
    let due = h.store.fetch_due(Utc::now(), 10).unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, id);

    assert!(h.store.mark_deferred(id, DeferredStatus::Done, None).unwrap());
    assert!(h.store.fetch_due(Utc::now(), 10).unwrap().is_empty());
    // Terminal states are final.
    assert!(!h.store.mark_deferred(id, DeferredStatus::Error, Some("late")).unwrap());
    assert_eq!(
        h.store.deferred_item(id).unwrap().unwrap().status,
        DeferredStatus::Done
    );
}

#[test]
fn test_delayed_item_is_not_due_yet() {
    let h = harness();
    let file = write(&h.inbox.join("later.txt"), "later");
    h.scheduler.schedule_new(&file, 24.0).unwrap().unwrap();
    assert!(h.store.fetch_due(Utc::now(), 10).unwrap().is_empty());
    assert_eq!(h.scheduler.sweep_once().unwrap().fetched, 0);
}

#[test]
fn test_same_path_is_queued_once() {
    let h = harness();
    let file = write(&h.inbox.join("twice.txt"), "twice");
    let first = h.scheduler.schedule_new(&file, 1.0).unwrap();
    let second = h.scheduler.schedule_new(&file, 1.0).unwrap();
    assert_eq!(first, second);
    assert_eq!(h.store.list_deferred(None, 10).unwrap().len(), 1);
}

#[test]
fn test_protected_file_is_not_scheduled() {
    let h = harness();
    let app = h.inbox.join("App");
    fs::create_dir_all(&app).unwrap();
    write(&app.join("app.exe"), "MZ");
    write(&app.join("app.dll"), "MZ");
    let config = write(&app.join("settings.txt"), "volume=3");

    assert!(h.scheduler.schedule_new(&config, 0.0).unwrap().is_none());
    assert!(h.store.list_deferred(None, 10).unwrap().is_empty());
}

#[test]
fn test_existing_files_use_age_threshold() {
    let h = harness();
    let old = write(&h.inbox.join("old.txt"), "from last year");
    let fresh = write(&h.inbox.join("fresh.txt"), "from today");
    let last_year = SystemTime::now() - Duration::from_secs(400 * 24 * 3600);
    fs::File::options()
        .write(true)
        .open(&old)
        .unwrap()
        .set_modified(last_year)
        .unwrap();

    let old_id = h.scheduler.schedule_existing(&old, 30, 24.0).unwrap().unwrap();
    h.scheduler.schedule_existing(&fresh, 30, 24.0).unwrap().unwrap();

    let due = h.store.fetch_due(Utc::now(), 10).unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, old_id);
}

#[test]
fn test_watch_events() {
    let h = harness();
    let file = write(&h.inbox.join("new.txt"), "new file");

    let created = h
        .scheduler
        .handle_event(&WatchEvent::new(&file, WatchEventKind::Created))
        .unwrap();
    assert!(created.is_some());
    let modified = h
        .scheduler
        .handle_event(&WatchEvent::new(&file, WatchEventKind::Modified))
        .unwrap();
    assert_eq!(created, modified);

    let gone = h.inbox.join("gone.txt");
    assert!(h
        .scheduler
        .handle_event(&WatchEvent::new(&gone, WatchEventKind::Moved))
        .unwrap()
        .is_none());
    assert!(h
        .scheduler
        .handle_event(&WatchEvent::new(&file, WatchEventKind::Removed))
        .unwrap()
        .is_none());
}

#[test]
fn test_sweep_maps_every_outcome() {
    let h = harness();
    let good = write(&h.inbox.join("good.txt"), "organise me");
    let failing = write(&h.inbox.join("fail.txt"), "classifier refuses");
    let boom = write(&h.inbox.join("boom.txt"), "classifier panics");
    let nowhere = write(&h.inbox.join("nowhere.txt"), "no suggestion");
    let vanishing = write(&h.inbox.join("vanish.txt"), "deleted before the sweep");

    let ids: Vec<i64> = [&good, &failing, &boom, &nowhere, &vanishing]
        .iter()
        .map(|p| h.scheduler.schedule_new(p, 0.0).unwrap().unwrap())
        .collect();
    fs::remove_file(&vanishing).unwrap();

    let report = h.scheduler.sweep_once().unwrap();
    assert_eq!(report.fetched, 5);
    assert_eq!(report.done, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.errors, 3);

    let status = |id: i64| h.store.deferred_item(id).unwrap().unwrap();
    assert_eq!(status(ids[0]).status, DeferredStatus::Done);
    assert!(h.base.join("Documents/good.txt").exists());
    assert_eq!(status(ids[1]).status, DeferredStatus::Error);
    assert!(status(ids[1]).last_error.unwrap().contains("cannot classify"));
    assert_eq!(status(ids[2]).status, DeferredStatus::Error);
    assert_eq!(status(ids[2]).last_error.as_deref(), Some("Processing panicked"));
    assert_eq!(status(ids[3]).status, DeferredStatus::Error);
    assert_eq!(status(ids[3]).last_error.as_deref(), Some("No action suggested"));
    assert_eq!(status(ids[4]).status, DeferredStatus::Skipped);
    assert_eq!(status(ids[4]).last_error.as_deref(), Some("Missing file"));

    // Nothing is retried.
    assert_eq!(h.scheduler.sweep_once().unwrap().fetched, 0);
}

#[test]
fn test_unavailable_classifier_leaves_items_queued() {
    let h = harness();
    let file = write(&h.inbox.join("wait.txt"), "waiting");
    let id = h.scheduler.schedule_new(&file, 0.0).unwrap().unwrap();

    h.classifier.available.store(false, Ordering::SeqCst);
    let report = h.scheduler.sweep_once().unwrap();
    assert!(report.deferred);
    assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.store.deferred_item(id).unwrap().unwrap().status,
        DeferredStatus::Queued
    );

    h.classifier.available.store(true, Ordering::SeqCst);
    assert_eq!(h.scheduler.sweep_once().unwrap().done, 1);
}

#[test]
fn test_background_loop_processes_and_stops() {
    let h = harness();
    let file = write(&h.inbox.join("background.txt"), "handled in the background");
    let id = h.scheduler.schedule_new(&file, 0.0).unwrap().unwrap();

    h.scheduler.start().unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while h.store.deferred_item(id).unwrap().unwrap().status == DeferredStatus::Queued
        && std::time::Instant::now() < deadline
    {
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(h.scheduler.stop());
    assert!(!h.scheduler.is_running());
    assert_eq!(
        h.store.deferred_item(id).unwrap().unwrap().status,
        DeferredStatus::Done
    );
}

#[test]
fn test_caution_items_need_pre_approval() {
    let h = harness();
    let file = write(&h.inbox.join("unsure.txt"), "low confidence");
    let id = h.scheduler.schedule_new(&file, 0.0).unwrap().unwrap();
    assert_eq!(h.scheduler.sweep_once().unwrap().errors, 1);
    let item = h.store.deferred_item(id).unwrap().unwrap();
    assert_eq!(item.status, DeferredStatus::Error);
    assert!(file.exists());

    let h = harness_with(SchedulerConfig {
        pre_approved: true,
        ..SchedulerConfig::default()
    });
    let file = write(&h.inbox.join("unsure.txt"), "low confidence");
    h.scheduler.schedule_new(&file, 0.0).unwrap().unwrap();
    assert_eq!(h.scheduler.sweep_once().unwrap().done, 1);
    assert!(h.base.join("Documents/unsure.txt").exists());
}
