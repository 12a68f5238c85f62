use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

use std::time::Duration;

use tidyguard_core::actions::lock::PathLocks;
use tidyguard_core::config::{ActionConfig, GuardianConfig};
use tidyguard_core::storage::StatsPeriod;
use tidyguard_core::{
    ActionManager, ActionTaken, AuditStore, Classification, ErrorOrigin, ExecuteOptions,
    FolderPolicy, Guardian, OperationKind,
};

/// Layout:
///   root/
///     inbox/        files waiting to be organised
///     organized/    base destination
struct Workspace {
    _dir: TempDir,
    root: PathBuf,
    inbox: PathBuf,
    base: PathBuf,
    store: Arc<AuditStore>,
    manager: ActionManager,
}

fn workspace_with(config: impl FnOnce(&Path) -> ActionConfig, base_is_root: bool) -> Workspace {
    let dir = tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let config = config(&root);
    let inbox = root.join("inbox");
    fs::create_dir_all(&inbox).unwrap();
    let base = if base_is_root {
        root.clone()
    } else {
        root.join("organized")
    };
    let store = Arc::new(AuditStore::open_in_memory().unwrap());
    let guardian = Arc::new(Guardian::new(&base, GuardianConfig::default()).with_store(Arc::clone(&store)));
    let manager = ActionManager::new(&base, config, guardian, Arc::clone(&store)).unwrap();
    Workspace {
        _dir: dir,
        root,
        inbox,
        base,
        store,
        manager,
    }
}

fn workspace() -> Workspace {
    workspace_with(|_| ActionConfig::default(), false)
}

fn documents() -> Classification {
    Classification::new("Documents", 0.95).with_suggested_path("Documents")
}

fn write(path: &Path, content: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn test_move_is_audited_exactly_once() {
    let ws = workspace();
    let source = ws.inbox.join("report.pdf");
    write(&source, b"quarterly report");

    let result = ws.manager.execute(&source, &documents(), &ExecuteOptions::default());

    assert!(result.success, "{}", result.message);
    assert_eq!(result.action, ActionTaken::Performed(OperationKind::Move));
    let moved = ws.base.join("Documents").join("report.pdf");
    assert_eq!(result.new_path.as_deref(), Some(moved.as_path()));
    assert!(moved.exists());
    assert!(!source.exists());
    assert!(result.time_saved > 0.0);

    let logs = ws.store.recent_logs(10).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(Some(logs[0].id), result.log_id);
    assert_eq!(logs[0].operation, "move");
    assert_eq!(logs[0].category.as_deref(), Some("Documents"));
    assert_eq!(ws.store.stats(StatsPeriod::Today).unwrap().files_organised, 1);
}

#[test]
fn test_rename_inside_base() {
    let ws = workspace_with(|_| ActionConfig::default(), true);
    let source = ws.inbox.join("scan0001.pdf");
    write(&source, b"scanned invoice");
    let classification = Classification::new("Invoices", 0.9).with_suggested_name("invoice-2024.pdf");

    let result = ws.manager.execute(&source, &classification, &ExecuteOptions::default());

    assert!(result.success, "{}", result.message);
    assert_eq!(result.action, ActionTaken::Performed(OperationKind::Rename));
    assert!(ws.inbox.join("invoice-2024.pdf").exists());
    assert_eq!(ws.root, ws.base);
}

#[test]
fn test_dry_run_is_idempotent_and_unaudited() {
    let ws = workspace();
    let source = ws.inbox.join("notes.txt");
    write(&source, b"some notes");
    let options = ExecuteOptions {
        dry_run: true,
        ..ExecuteOptions::default()
    };

    let first = ws.manager.execute(&source, &documents(), &options);
    let second = ws.manager.execute(&source, &documents(), &options);

    assert!(first.success && second.success);
    assert_eq!(first.action, second.action);
    assert_eq!(first.action, ActionTaken::DryRun(OperationKind::Move));
    assert_eq!(first.action.label(), "move_dry_run");
    assert!(first.message.starts_with("[DRY RUN]"));
    assert_eq!(first.new_path, second.new_path);
    assert!(source.exists());
    assert!(!ws.base.join("Documents").exists());
    assert!(ws.store.recent_logs(10).unwrap().is_empty());
    assert_eq!(ws.store.stats(StatsPeriod::All).unwrap().files_organised, 0);
}

#[test]
fn test_traversal_in_suggestion_is_rejected_before_guardian() {
    let ws = workspace();
    let source = ws.inbox.join("a.txt");
    write(&source, b"content");
    let evil = Classification::new("Documents", 0.9).with_suggested_path("../../etc");

    let result = ws.manager.execute(&source, &evil, &ExecuteOptions::default());

    assert!(!result.success);
    assert_eq!(result.action, ActionTaken::Blocked);
    assert_eq!(result.origin, Some(ErrorOrigin::Validation));
    assert!(result.message.starts_with("Security:"));
    assert!(result.evaluation.is_none());
    assert!(source.exists());
}

#[test]
fn test_policy_blocks() {
    let ws = workspace_with(
        |root| ActionConfig {
            path_blacklist: vec![root.join("inbox").join("private")],
            ..ActionConfig::default()
        },
        false,
    );
    let secret = ws.inbox.join("private").join("diary.txt");
    write(&secret, b"dear diary");
    let result = ws.manager.execute(&secret, &documents(), &ExecuteOptions::default());
    assert_eq!(result.action, ActionTaken::Blocked);
    assert_eq!(result.origin, Some(ErrorOrigin::Policy));
    assert!(result.message.starts_with("Blocked by policy: path is blacklisted"));
    assert!(secret.exists());

    let source = ws.inbox.join("keep.txt");
    write(&source, b"stay here");
    let options = ExecuteOptions {
        folder_policy: Some(FolderPolicy { allow_move: false }),
        ..ExecuteOptions::default()
    };
    let result = ws.manager.execute(&source, &documents(), &options);
    assert_eq!(result.origin, Some(ErrorOrigin::Policy));
    assert!(source.exists());
}

#[test]
fn test_guardian_block_leaves_file_in_place() {
    let ws = workspace();
    let app = ws.inbox.join("Tool");
    write(&app.join("tool.exe"), b"MZ binary");
    write(&app.join("tool.dll"), b"MZ library");
    let manual = app.join("manual.txt");
    write(&manual, b"how to use the tool");

    let result = ws.manager.execute(&manual, &documents(), &ExecuteOptions {
        user_approved: true,
        ..ExecuteOptions::default()
    });

    assert!(!result.success);
    assert!(result.is_blocked());
    assert_eq!(result.action, ActionTaken::BlockedByGuardian);
    assert_eq!(result.origin, Some(ErrorOrigin::Guardian));
    assert!(result.message.starts_with("Blocked by safety guardian:"));
    assert!(result.evaluation.as_ref().unwrap().has_critical_finding());
    assert!(manual.exists());
    assert!(ws.store.recent_logs(10).unwrap().is_empty());
    assert_eq!(ws.store.blocked_count().unwrap(), 1);

    let stats = ws.manager.stats(StatsPeriod::All).unwrap();
    assert_eq!(stats.guardian.total_blocked, 1);
    assert_eq!(stats.persisted_blocked, 1);
}

#[test]
fn test_missing_source_reports_not_found() {
    let ws = workspace();
    let result = ws.manager.execute(
        &ws.inbox.join("ghost.txt"),
        &documents(),
        &ExecuteOptions::default(),
    );
    assert!(!result.success);
    assert_eq!(result.action, ActionTaken::None);
    assert_eq!(result.message, "File not found");
}

#[test]
fn test_oversized_file_blocked() {
    let ws = workspace_with(
        |_| ActionConfig {
            max_file_size: 8,
            ..ActionConfig::default()
        },
        false,
    );
    let source = ws.inbox.join("big.txt");
    write(&source, b"more than eight bytes");
    let result = ws.manager.execute(&source, &documents(), &ExecuteOptions::default());
    assert_eq!(result.action, ActionTaken::Blocked);
    assert!(result.message.contains("too large"));
}

#[test]
fn test_undo_restores_original_location() {
    let ws = workspace();
    let source = ws.inbox.join("photo.jpg");
    write(&source, b"jpeg bytes");
    let pictures = Classification::new("Pictures", 0.9).with_suggested_path("Pictures");
    let moved = ws.manager.execute(&source, &pictures, &ExecuteOptions::default());
    assert!(moved.success, "{}", moved.message);
    assert_eq!(ws.manager.undo_history().len(), 1);

    let preview = ws.manager.undo_last(true);
    assert_eq!(preview.action, ActionTaken::UndoDryRun);
    assert!(!source.exists());

    let undone = ws.manager.undo_last(false);
    assert!(undone.success, "{}", undone.message);
    assert_eq!(undone.action, ActionTaken::Undo);
    assert!(source.exists());
    assert!(ws.manager.undo_history().is_empty());

    let log = ws.store.log_entry(moved.log_id.unwrap()).unwrap().unwrap();
    assert!(log.undone_at.is_some());

    let nothing = ws.manager.undo_last(false);
    assert!(!nothing.success);
    assert_eq!(nothing.message, "Nothing to undo");
}

#[test]
fn test_undo_refuses_occupied_original() {
    let ws = workspace();
    let source = ws.inbox.join("a.txt");
    write(&source, b"first version");
    assert!(ws.manager.execute(&source, &documents(), &ExecuteOptions::default()).success);
    write(&source, b"someone recreated it");

    let result = ws.manager.undo_last(false);
    assert!(!result.success);
    assert_eq!(result.action, ActionTaken::Blocked);
    assert_eq!(fs::read(&source).unwrap(), b"someone recreated it");
}

#[test]
fn test_archive_and_delete() {
    let ws = workspace();
    let old = ws.inbox.join("old-invoice.pdf");
    write(&old, b"paid long ago");
    let archived = ws.manager.archive(&old, Some(Path::new("Archive/2020")), false, false);
    assert!(archived.success, "{}", archived.message);
    assert_eq!(archived.action, ActionTaken::Performed(OperationKind::Archive));
    assert!(ws.base.join("Archive/2020/old-invoice.pdf").exists());

    let junk = ws.inbox.join("junk.tmp");
    write(&junk, b"throwaway");
    let preview = ws.manager.delete(&junk, true, true);
    assert_eq!(preview.action, ActionTaken::DryRun(OperationKind::Delete));
    assert!(junk.exists());

    let deleted = ws.manager.delete(&junk, true, false);
    assert!(deleted.success, "{}", deleted.message);
    assert!(deleted.new_path.is_none());
    assert!(!junk.exists());

    let logs = ws.store.recent_logs(10).unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].operation, "delete");
}

#[test]
fn test_batch_keeps_input_order() {
    let ws = workspace();
    let requests: Vec<(PathBuf, Classification)> = (0..8)
        .map(|i| {
            let path = ws.inbox.join(format!("file{}.txt", i));
            write(&path, format!("content {}", i).as_bytes());
            (path, documents())
        })
        .collect();

    let results = ws.manager.execute_batch(&requests, &ExecuteOptions::default());

    assert_eq!(results.len(), 8);
    for ((path, _), result) in requests.iter().zip(&results) {
        assert_eq!(&result.old_path, path);
        assert!(result.success, "{}", result.message);
    }
    assert_eq!(ws.store.stats(StatsPeriod::Today).unwrap().files_organised, 8);
}

#[test]
fn test_failed_audit_write_keeps_the_move_with_a_warning() {
    let ws = workspace();
    let source = ws.inbox.join("letter.txt");
    write(&source, b"dear sir or madam");
    ws.store
        .connection()
        .unwrap()
        .execute_batch("DROP TABLE files_log")
        .unwrap();

    let result = ws.manager.execute(&source, &documents(), &ExecuteOptions::default());

    assert!(result.success, "{}", result.message);
    assert_eq!(result.action, ActionTaken::Performed(OperationKind::Move));
    assert_eq!(result.origin, Some(ErrorOrigin::Persistence));
    assert!(result.log_id.is_none());
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].starts_with("Persistence error"));
    assert!(ws.base.join("Documents").join("letter.txt").exists());
    assert!(!source.exists());
}

#[test]
fn test_lock_held_elsewhere_gives_retryable_failure() {
    let ws = workspace_with(
        |_| ActionConfig {
            lock_timeout_secs: 0,
            ..ActionConfig::default()
        },
        false,
    );
    let source = ws.inbox.join("busy.txt");
    write(&source, b"in use by another process");

    // A separate registry stands in for another process holding the sidecar.
    let other = PathLocks::new(Duration::from_secs(1));
    let held = other.acquire(&source).unwrap();

    let result = ws.manager.execute(&source, &documents(), &ExecuteOptions::default());
    assert!(!result.success);
    assert_eq!(result.action, ActionTaken::Error);
    assert_eq!(result.origin, Some(ErrorOrigin::Lock));
    assert!(result.retryable);
    assert!(source.exists());
    assert!(ws.store.recent_logs(10).unwrap().is_empty());

    drop(held);
    let retry = ws.manager.execute(&source, &documents(), &ExecuteOptions::default());
    assert!(retry.success, "{}", retry.message);
}

#[cfg(unix)]
#[test]
fn test_approved_delete_of_read_only_file_is_refused() {
    use std::fs::OpenOptions;
    use std::os::unix::fs::PermissionsExt;

    let ws = workspace();
    let source = ws.inbox.join("contract.pdf");
    write(&source, b"signed contract");
    fs::set_permissions(&source, fs::Permissions::from_mode(0o444)).unwrap();
    if OpenOptions::new().write(true).open(&source).is_ok() {
        // Running with privileges that ignore file modes.
        return;
    }

    let result = ws.manager.delete(&source, true, false);

    assert!(!result.success);
    assert_eq!(result.action, ActionTaken::BlockedByGuardian);
    assert!(result.evaluation.as_ref().unwrap().has_critical_finding());
    assert!(source.exists());
    assert!(ws.store.recent_logs(10).unwrap().is_empty());
}
