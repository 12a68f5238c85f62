//! Content-based duplicate detection and safe keep planning.
//!
//! A scan buckets files by size, hashes only buckets with more than one
//! member (partial hash first, full digest on collisions) and returns groups
//! of identical files. Nothing here deletes; cleanup goes through the
//! [`ActionManager`](crate::actions::ActionManager).

pub mod junk;
pub mod plan;
pub mod report;

use dashmap::DashMap;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{self, DuplicateConfig};
use crate::error::Error;
use crate::guardian::path_security;
use crate::guardian::ProtectionRules;
use crate::hasher::{self, HashCache};
use crate::platform;
use crate::progress::ProgressReporter;
use crate::scanner::{self, CandidateDirectory, DiscoveryOptions, WalkOptions};
use crate::storage::AuditStore;

pub use plan::{compare_by_date, plan_group, suggest_keep, KeepPlan, KeepStrategy};
pub use report::{DirectoryStructure, SampleFile, StructureReport};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub hash: String,
    pub size: u64,
    /// Sorted.
    pub paths: Vec<PathBuf>,
    /// `size * (count - 1)`
    pub wasted_space: u64,
}

impl DuplicateGroup {
    pub fn new(hash: String, size: u64, mut paths: Vec<PathBuf>) -> Self {
        paths.sort();
        paths.dedup();
        let wasted_space = size * paths.len().saturating_sub(1) as u64;
        Self {
            hash,
            size,
            paths,
            wasted_space,
        }
    }

    pub fn count(&self) -> usize {
        self.paths.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateSummary {
    pub groups: usize,
    pub duplicate_files: usize,
    /// Files that could go while keeping one copy per group.
    pub redundant_files: usize,
    pub wasted_space: u64,
}

/// Groups split by whether every member may be touched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProtectionFilter {
    pub safe: Vec<DuplicateGroup>,
    pub protected: Vec<DuplicateGroup>,
    /// Each refused member with the rule that refused it.
    pub protected_files: Vec<(PathBuf, String)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrossDriveReport {
    pub volumes: Vec<PathBuf>,
    pub candidates: Vec<CandidateDirectory>,
    pub groups: Vec<DuplicateGroup>,
    pub plans: Vec<KeepPlan>,
    pub protected_groups: usize,
    pub summary: DuplicateSummary,
    pub space_to_free: u64,
}

/// Junk under one directory, split by whether the protection rules allow touching it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JunkScan {
    pub files: Vec<PathBuf>,
    pub total_size: u64,
    pub protected: Vec<(PathBuf, String)>,
}

pub struct DuplicateFinder {
    config: DuplicateConfig,
    rules: Arc<ProtectionRules>,
    cache: HashCache,
    store: Option<Arc<AuditStore>>,
    cancel: Arc<AtomicBool>,
    pruned_dirs: Vec<PathBuf>,
}

impl DuplicateFinder {
    pub fn new(config: DuplicateConfig, rules: Arc<ProtectionRules>) -> Self {
        let cache = HashCache::new(config.algorithm, config.chunk_size);
        let pruned_dirs = rules.system_directories().to_vec();
        Self {
            config,
            rules,
            cache,
            store: None,
            cancel: Arc::new(AtomicBool::new(false)),
            pruned_dirs,
        }
    }

    /// Persist every group member to the `duplicates` table after each scan.
    pub fn with_store(mut self, store: Arc<AuditStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &DuplicateConfig {
        &self.config
    }

    /// Shared flag; setting it stops the running scan between files.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cached_hashes(&self) -> usize {
        self.cache.len()
    }

    /// Digest of one file, or `None` when it is below the minimum size.
    pub fn hash(&self, path: &Path) -> Result<Option<String>, Error> {
        let meta = fs::metadata(path)?;
        if !meta.is_file() || meta.len() < self.config.min_file_size {
            return Ok(None);
        }
        Ok(Some(self.cache.get_or_hash(path)?))
    }

    pub fn find_in_directory(
        &self,
        root: &Path,
        recursive: bool,
        reporter: &dyn ProgressReporter,
    ) -> Result<Vec<DuplicateGroup>, Error> {
        self.scan(&[self.checked_root(root)?], recursive, false, reporter)
    }

    /// Same result as [`find_in_directory`](Self::find_in_directory) with
    /// hashing fanned out across the rayon pool.
    pub fn find_in_directory_parallel(
        &self,
        root: &Path,
        recursive: bool,
        reporter: &dyn ProgressReporter,
    ) -> Result<Vec<DuplicateGroup>, Error> {
        self.scan(&[self.checked_root(root)?], recursive, true, reporter)
    }

    /// Scan several roots as one pool, so duplicates across roots are found.
    /// Nested roots are collapsed into their ancestor first; missing roots are skipped.
    pub fn find_in_directories(
        &self,
        roots: Vec<PathBuf>,
        parallel: bool,
        reporter: &dyn ProgressReporter,
    ) -> Result<Vec<DuplicateGroup>, Error> {
        let roots: Vec<PathBuf> = config::non_overlapping_directories(roots)
            .into_iter()
            .filter(|root| {
                let ok = root.is_dir();
                if !ok {
                    warn!("Skipping {}: not a directory", root.display());
                }
                ok
            })
            .collect();
        info!("Processing directories: {:?}", roots);
        self.scan(&roots, true, parallel, reporter)
    }

    fn checked_root(&self, root: &Path) -> Result<PathBuf, Error> {
        if !root.is_dir() {
            return Err(Error::Validation(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        Ok(path_security::absolutize(root))
    }

    fn scan(
        &self,
        roots: &[PathBuf],
        recursive: bool,
        parallel: bool,
        reporter: &dyn ProgressReporter,
    ) -> Result<Vec<DuplicateGroup>, Error> {
        self.cancel.store(false, Ordering::Relaxed);

        info!("Scanning files...");
        reporter.on_scan_start();
        let scan_start = Instant::now();
        let options = WalkOptions {
            recursive,
            min_file_size: self.config.min_file_size,
            ignore_globs: &self.config.ignore_patterns,
            pruned_dirs: &self.pruned_dirs,
        };
        let size_map = scanner::build_size_to_files_map(roots, &options, &self.cancel, reporter);
        let total_files: usize = size_map.iter().map(|e| e.value().len()).sum();
        reporter.on_scan_complete(total_files, scan_start.elapsed().as_secs_f64());
        debug!(
            "Scan completed in {:.2}s: {} distinct sizes, {} files",
            scan_start.elapsed().as_secs_f64(),
            size_map.len(),
            total_files
        );

        info!("Building content hash for possible dupes...");
        let hash_start = Instant::now();
        let content = hasher::build_content_hash_map(
            size_map,
            &self.cache,
            parallel,
            &self.cancel,
            reporter,
        );
        let groups = into_groups(content);
        reporter.on_hash_complete(groups.len(), hash_start.elapsed().as_secs_f64());
        info!(
            "Found {} duplicate groups in {:.2}s",
            groups.len(),
            hash_start.elapsed().as_secs_f64()
        );
        if self.cancel.load(Ordering::Relaxed) {
            warn!("Scan cancelled, results are partial");
        }

        self.persist(&groups);
        Ok(groups)
    }

    fn persist(&self, groups: &[DuplicateGroup]) {
        let Some(store) = &self.store else {
            return;
        };
        match store.add_duplicate_groups(groups) {
            Ok(inserted) => debug!("Recorded {} new duplicate records", inserted),
            Err(e) => warn!("Failed to record duplicate groups: {}", e),
        }
    }

    pub fn summary(groups: &[DuplicateGroup]) -> DuplicateSummary {
        DuplicateSummary {
            groups: groups.len(),
            duplicate_files: groups.iter().map(DuplicateGroup::count).sum(),
            redundant_files: groups.iter().map(|g| g.count().saturating_sub(1)).sum(),
            wasted_space: groups.iter().map(|g| g.wasted_space).sum(),
        }
    }

    pub fn plan(groups: &[DuplicateGroup], strategy: KeepStrategy) -> Vec<KeepPlan> {
        groups
            .iter()
            .filter_map(|group| plan_group(group, strategy))
            .collect()
    }

    /// Drop every group with at least one protected member. A group is never
    /// split: one protected file keeps all of its copies.
    pub fn filter_protected(&self, groups: Vec<DuplicateGroup>) -> ProtectionFilter {
        let mut filter = ProtectionFilter::default();
        for group in groups {
            let refused: Vec<(PathBuf, String)> = group
                .paths
                .iter()
                .filter_map(|path| {
                    let (safe, reason) = self
                        .rules
                        .is_file_safe_to_modify(&path_security::absolutize(path));
                    (!safe).then(|| (path.clone(), reason))
                })
                .collect();
            if refused.is_empty() {
                filter.safe.push(group);
            } else {
                for (path, reason) in &refused {
                    debug!("Protected duplicate {}: {}", path.display(), reason);
                }
                filter.protected_files.extend(refused);
                filter.protected.push(group);
            }
        }
        if !filter.protected.is_empty() {
            info!(
                "Excluded {} duplicate groups containing protected files",
                filter.protected.len()
            );
        }
        filter
    }

    /// Sample the volumes, scan the best candidate directories as one pool and
    /// plan a newest-copy cleanup for every unprotected group. Nothing is deleted.
    pub fn find_duplicates_cross_drive(
        &self,
        volumes: Option<Vec<PathBuf>>,
        reporter: &dyn ProgressReporter,
    ) -> Result<CrossDriveReport, Error> {
        let volumes = volumes.unwrap_or_else(platform::volume_roots);
        info!("Detected volumes: {:?}", volumes);

        let home = config::home_dir();
        let user_folders: Vec<PathBuf> = if volumes.iter().any(|v| home.starts_with(v)) {
            self.config
                .user_folders
                .iter()
                .map(|name| home.join(name))
                .collect()
        } else {
            Vec::new()
        };
        let options = DiscoveryOptions {
            sample_depth: self.config.sample_depth,
            min_files: self.config.candidate_min_files,
            top_n: self.config.candidate_top_n,
            file_limit: self.config.sample_file_limit,
            exclude_globs: &self.config.ignore_patterns,
            pruned_dirs: &self.pruned_dirs,
            extra_candidates: &user_folders,
        };
        let candidates =
            scanner::detect_candidate_directories(&volumes, &options, &self.cancel, reporter);
        info!("Will scan {} candidate directories", candidates.len());

        let directories: Vec<PathBuf> = candidates.iter().map(|c| c.path.clone()).collect();
        let groups = self.find_in_directories(directories, true, reporter)?;
        let filter = self.filter_protected(groups.clone());
        let plans = Self::plan(&filter.safe, KeepStrategy::Newest);
        let space_to_free = plans.iter().map(KeepPlan::space_freed).sum();

        Ok(CrossDriveReport {
            volumes,
            candidates,
            summary: Self::summary(&groups),
            protected_groups: filter.protected.len(),
            groups,
            plans,
            space_to_free,
        })
    }

    /// Temporary and leftover files under `directory` that may be removed.
    /// A missing directory yields an empty scan.
    pub fn find_temp_and_junk_files(&self, directory: &Path) -> JunkScan {
        let mut scan = JunkScan::default();
        if !directory.is_dir() {
            debug!("No junk scan for {}: not a directory", directory.display());
            return scan;
        }
        self.cancel.store(false, Ordering::Relaxed);
        let root = path_security::absolutize(directory);
        for path in junk::find_junk_files(&root, &self.config.junk_patterns, &self.pruned_dirs, &self.cancel) {
            let (safe, reason) = self.rules.is_file_safe_to_modify(&path);
            if !safe {
                debug!("Protected junk {}: {}", path.display(), reason);
                scan.protected.push((path, reason));
                continue;
            }
            scan.total_size += fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            scan.files.push(path);
        }
        info!(
            "Found {} junk files ({} bytes) under {}, {} protected",
            scan.files.len(),
            scan.total_size,
            root.display(),
            scan.protected.len()
        );
        scan
    }

    /// Describe each directory's first level. When `out_path` is given the
    /// report is also written there as JSON; a failed write is logged only.
    pub fn generate_structure_report(
        &self,
        directories: &[PathBuf],
        out_path: Option<&Path>,
    ) -> StructureReport {
        let report = report::build_structure_report(directories, self.config.report_sample_limit);
        if let Some(out_path) = out_path {
            if let Err(e) = report::write_structure_report(&report, out_path) {
                warn!("Failed to write structure report {}: {}", out_path.display(), e);
            }
        }
        report
    }
}

fn into_groups(content: DashMap<String, (u64, Vec<PathBuf>)>) -> Vec<DuplicateGroup> {
    let mut groups: Vec<DuplicateGroup> = content
        .into_iter()
        .map(|(hash, (size, paths))| DuplicateGroup::new(hash, size, paths))
        .filter(|group| group.count() > 1)
        .collect();
    groups.sort_by(|a, b| {
        b.wasted_space
            .cmp(&a.wasted_space)
            .then_with(|| a.hash.cmp(&b.hash))
    });
    groups
}
