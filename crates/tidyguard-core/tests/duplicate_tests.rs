use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::tempdir;

use tidyguard_core::config::{DuplicateConfig, GuardianConfig};
use tidyguard_core::duplicates::{suggest_keep, KeepStrategy};
use tidyguard_core::guardian::ProtectionRules;
use tidyguard_core::hasher::HashAlgorithm;
use tidyguard_core::{AuditStore, DuplicateFinder, SilentReporter};

fn finder_with(min_file_size: u64, algorithm: HashAlgorithm) -> DuplicateFinder {
    let config = DuplicateConfig {
        min_file_size,
        algorithm,
        ..DuplicateConfig::default()
    };
    DuplicateFinder::new(config, Arc::new(ProtectionRules::new(&GuardianConfig::default())))
}

fn finder() -> DuplicateFinder {
    finder_with(1, HashAlgorithm::default())
}

/// Layout:
///   root/
///     folder_a/
///       unique_a.txt     ("unique content a")
///       shared.txt       ("shared content xyz")
///     folder_b/
///       unique_b.txt     ("unique content b")
///       shared.txt       ("shared content xyz")
///       nested/deep.txt  ("shared content xyz")
///     folder_c/
///       large_dup_1.bin  (8KB of 0xAA)
///       large_dup_2.bin  (8KB of 0xAA)
///       large_diff.bin   (8KB of 0xAA, last byte differs)
fn create_test_tree(root: &Path) {
    let folder_a = root.join("folder_a");
    let folder_b = root.join("folder_b");
    let folder_c = root.join("folder_c");
    fs::create_dir_all(&folder_a).unwrap();
    fs::create_dir_all(folder_b.join("nested")).unwrap();
    fs::create_dir_all(&folder_c).unwrap();

    fs::write(folder_a.join("unique_a.txt"), "unique content a").unwrap();
    fs::write(folder_b.join("unique_b.txt"), "unique content b").unwrap();

    fs::write(folder_a.join("shared.txt"), "shared content xyz").unwrap();
    fs::write(folder_b.join("shared.txt"), "shared content xyz").unwrap();
    fs::write(folder_b.join("nested").join("deep.txt"), "shared content xyz").unwrap();

    // Same size and same first kilobyte: only the full digest tells them apart.
    let large = vec![0xAAu8; 8192];
    let mut different = large.clone();
    different[8191] = 0xAB;
    fs::File::create(folder_c.join("large_dup_1.bin"))
        .unwrap()
        .write_all(&large)
        .unwrap();
    fs::File::create(folder_c.join("large_dup_2.bin"))
        .unwrap()
        .write_all(&large)
        .unwrap();
    fs::write(folder_c.join("large_diff.bin"), &different).unwrap();
}

#[test]
fn test_twelve_byte_duplicates_form_one_group() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), b"hello world!").unwrap();
    fs::write(dir.path().join("b.txt"), b"hello world!").unwrap();

    let groups = finder_with(12, HashAlgorithm::default())
        .find_in_directory(dir.path(), true, &SilentReporter)
        .unwrap();

    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].count(), 2);
    assert_eq!(groups[0].size, 12);
    assert_eq!(groups[0].wasted_space, 12);
    let plan = suggest_keep(&groups[0]).unwrap();
    assert_eq!(plan.delete.len(), 1);
    assert_ne!(plan.keep, plan.delete[0]);
}

#[test]
fn test_groups_across_folders_and_tail_difference() {
    let dir = tempdir().unwrap();
    create_test_tree(dir.path());

    let groups = finder()
        .find_in_directory(dir.path(), true, &SilentReporter)
        .unwrap();

    assert_eq!(groups.len(), 2, "{:#?}", groups);
    // Sorted by wasted space: the 8KB pair first.
    assert_eq!(groups[0].size, 8192);
    assert_eq!(groups[0].count(), 2);
    assert!(groups[0]
        .paths
        .iter()
        .all(|p| !p.ends_with("large_diff.bin")));
    assert_eq!(groups[1].count(), 3);
    assert_eq!(groups[1].wasted_space, 18 * 2);
}

#[test]
fn test_non_recursive_scan_ignores_subfolders() {
    let dir = tempdir().unwrap();
    create_test_tree(dir.path());
    let folder_b = dir.path().join("folder_b");
    fs::write(folder_b.join("copy.txt"), "shared content xyz").unwrap();

    let recursive = finder()
        .find_in_directory(&folder_b, true, &SilentReporter)
        .unwrap();
    let flat = finder()
        .find_in_directory(&folder_b, false, &SilentReporter)
        .unwrap();

    assert_eq!(recursive[0].count(), 3);
    assert_eq!(flat[0].count(), 2);
}

#[test]
fn test_parallel_matches_sequential_for_every_algorithm() {
    let dir = tempdir().unwrap();
    create_test_tree(dir.path());

    for algorithm in [HashAlgorithm::Blake3, HashAlgorithm::Xxh64, HashAlgorithm::Sha256] {
        let sequential = finder_with(1, algorithm)
            .find_in_directory(dir.path(), true, &SilentReporter)
            .unwrap();
        let parallel = finder_with(1, algorithm)
            .find_in_directory_parallel(dir.path(), true, &SilentReporter)
            .unwrap();
        assert_eq!(sequential, parallel, "{:?}", algorithm);
    }
}

#[test]
fn test_min_size_and_ignore_patterns() {
    let dir = tempdir().unwrap();
    create_test_tree(dir.path());

    let large_only = finder_with(1024, HashAlgorithm::default())
        .find_in_directory(dir.path(), true, &SilentReporter)
        .unwrap();
    assert_eq!(large_only.len(), 1);
    assert_eq!(large_only[0].size, 8192);

    let config = DuplicateConfig {
        min_file_size: 1,
        ignore_patterns: vec!["**/folder_c/**".to_string()],
        ..DuplicateConfig::default()
    };
    let f = DuplicateFinder::new(config, Arc::new(ProtectionRules::new(&GuardianConfig::default())));
    let groups = f.find_in_directory(dir.path(), true, &SilentReporter).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].size, 18);
}

#[test]
fn test_overlapping_roots_are_scanned_once() {
    let dir = tempdir().unwrap();
    create_test_tree(dir.path());

    let groups = finder()
        .find_in_directories(
            vec![dir.path().join("folder_a"), dir.path().to_path_buf()],
            true,
            &SilentReporter,
        )
        .unwrap();
    let shared = groups.iter().find(|g| g.size == 18).unwrap();
    assert_eq!(shared.count(), 3);
}

#[test]
fn test_one_protected_member_poisons_the_group() {
    let dir = tempdir().unwrap();
    create_test_tree(dir.path());
    let game = dir.path().join("Game");
    fs::create_dir_all(&game).unwrap();
    fs::write(game.join("game.exe"), b"MZ game").unwrap();
    fs::write(game.join("engine.dll"), b"MZ engine").unwrap();
    fs::write(game.join("shared.txt"), "shared content xyz").unwrap();

    let f = finder();
    let groups = f.find_in_directory(dir.path(), true, &SilentReporter).unwrap();
    let total = groups.len();
    let filter = f.filter_protected(groups);

    assert_eq!(filter.protected.len(), 1);
    assert_eq!(filter.safe.len(), total - 1);
    let poisoned = &filter.protected[0];
    assert_eq!(poisoned.count(), 4);
    assert_eq!(filter.protected_files.len(), 1);
    assert_eq!(filter.protected_files[0].0, game.join("shared.txt"));
    assert!(filter.safe.iter().all(|g| g.hash != poisoned.hash));
}

#[test]
fn test_plans_keep_exactly_one_copy() {
    let dir = tempdir().unwrap();
    create_test_tree(dir.path());
    let groups = finder()
        .find_in_directory(dir.path(), true, &SilentReporter)
        .unwrap();

    for strategy in [KeepStrategy::ShortestPath, KeepStrategy::Newest, KeepStrategy::Oldest] {
        let plans = DuplicateFinder::plan(&groups, strategy);
        assert_eq!(plans.len(), groups.len());
        for (plan, group) in plans.iter().zip(&groups) {
            assert_eq!(plan.delete.len() + 1, group.count());
            assert!(group.paths.contains(&plan.keep));
            assert!(!plan.delete.contains(&plan.keep));
        }
    }
    let summary = DuplicateFinder::summary(&groups);
    assert_eq!(summary.redundant_files, 3);
    assert_eq!(summary.wasted_space, 8192 + 36);
}

#[test]
fn test_scan_results_are_persisted() {
    let dir = tempdir().unwrap();
    create_test_tree(dir.path());
    let store = Arc::new(AuditStore::open_in_memory().unwrap());
    let f = finder().with_store(Arc::clone(&store));

    let groups = f.find_in_directory(dir.path(), true, &SilentReporter).unwrap();
    let records = store.duplicate_records(None).unwrap();
    assert_eq!(records.len(), 5);
    let first: Vec<PathBuf> = store
        .duplicate_records(Some(groups[0].hash.as_str()))
        .unwrap()
        .into_iter()
        .map(|r| PathBuf::from(r.file_path))
        .collect();
    assert_eq!(first.len(), 2);

    // Re-scanning does not duplicate the registry.
    f.find_in_directory(dir.path(), true, &SilentReporter).unwrap();
    assert_eq!(store.duplicate_records(None).unwrap().len(), 5);
}

#[test]
fn test_stale_cancel_does_not_poison_next_scan() {
    let dir = tempdir().unwrap();
    create_test_tree(dir.path());
    let f = finder();
    f.cancel();
    let groups = f.find_in_directory(dir.path(), true, &SilentReporter).unwrap();
    assert_eq!(groups.len(), 2);
}

#[test]
fn test_cross_drive_on_a_fake_volume() {
    let volume = tempdir().unwrap();
    create_test_tree(volume.path());

    let report = finder()
        .find_duplicates_cross_drive(Some(vec![volume.path().to_path_buf()]), &SilentReporter)
        .unwrap();

    assert_eq!(report.candidates.len(), 3);
    // folder_a and folder_b are scanned together, so the shared copies group.
    let shared = report.groups.iter().find(|g| g.size == 18).unwrap();
    assert_eq!(shared.count(), 3);
    assert_eq!(report.plans.len(), report.groups.len());
    assert!(report.plans.iter().all(|p| p.strategy == KeepStrategy::Newest));
    assert_eq!(report.space_to_free, 8192 + 36);
    assert!(volume.path().join("folder_a/shared.txt").exists());
}

#[test]
fn test_junk_scan_skips_application_folders() {
    let dir = tempdir().unwrap();
    let downloads = dir.path().join("downloads");
    let game = dir.path().join("Game");
    fs::create_dir_all(&downloads).unwrap();
    fs::create_dir_all(&game).unwrap();
    fs::write(downloads.join("installer.exe.crdownload"), b"partial").unwrap();
    fs::write(downloads.join("draft.bak"), b"old").unwrap();
    fs::write(downloads.join("photo.jpg"), b"keep").unwrap();
    fs::write(game.join("game.exe"), b"MZ game").unwrap();
    fs::write(game.join("engine.dll"), b"MZ engine").unwrap();
    fs::write(game.join("save.tmp"), b"in use").unwrap();

    let scan = finder().find_temp_and_junk_files(dir.path());

    assert_eq!(
        scan.files,
        vec![downloads.join("draft.bak"), downloads.join("installer.exe.crdownload")]
    );
    assert_eq!(scan.total_size, 10);
    assert_eq!(scan.protected.len(), 1);
    assert_eq!(scan.protected[0].0, game.join("save.tmp"));

    assert!(finder()
        .find_temp_and_junk_files(&dir.path().join("missing"))
        .files
        .is_empty());
}

#[test]
fn test_structure_report_for_scanned_folders() {
    let dir = tempdir().unwrap();
    create_test_tree(dir.path());
    let out = dir.path().join("structure.json");
    let folders = vec![dir.path().join("folder_a"), dir.path().join("folder_b")];

    let report = finder().generate_structure_report(&folders, Some(&out));

    assert_eq!(report.directories.len(), 2);
    assert_eq!(report.directories[0].file_count, 2);
    // nested/deep.txt is below the first level.
    assert_eq!(report.directories[1].file_count, 2);
    assert_eq!(report.directories[1].total_size, 16 + 18);
    assert!(out.exists());
}
