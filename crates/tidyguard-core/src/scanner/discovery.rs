//! Shallow sampling of mounted volumes to pick which subtrees deserve a full
//! duplicate scan.

use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::walk::compile_patterns;
use crate::platform;
use crate::progress::ProgressReporter;

/// Folder names that are never worth sampling, whatever volume they sit on.
const SKIPPED_NAMES: &[&str] = &[
    "system volume information",
    "$recycle.bin",
    "windowsapps",
    "lost+found",
    ".trashes",
    ".spotlight-v100",
    ".fseventsd",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateDirectory {
    pub path: PathBuf,
    pub file_count: usize,
    pub total_size: u64,
    /// Sampling stopped at the file limit.
    pub truncated: bool,
}

pub struct DiscoveryOptions<'a> {
    /// Levels below each candidate that are sampled.
    pub sample_depth: usize,
    pub min_files: usize,
    pub top_n: usize,
    /// Sampling of one candidate stops once this many files were seen.
    pub file_limit: usize,
    pub exclude_globs: &'a [String],
    pub pruned_dirs: &'a [PathBuf],
    /// Extra directories (typically the user's own folders) sampled as candidates.
    pub extra_candidates: &'a [PathBuf],
}

/// Rank the immediate children of every volume (plus any extra candidates) by
/// sampled file count, then total size, and return the best `top_n`.
pub fn detect_candidate_directories(
    volumes: &[PathBuf],
    options: &DiscoveryOptions<'_>,
    cancel: &AtomicBool,
    reporter: &dyn ProgressReporter,
) -> Vec<CandidateDirectory> {
    let excludes = compile_patterns(options.exclude_globs);
    let excluded = |path: &Path| {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        SKIPPED_NAMES.contains(&name.as_str())
            || excludes.iter().any(|p| p.matches_path(path))
            || options
                .pruned_dirs
                .iter()
                .any(|pruned| platform::path_starts_with(path, pruned))
    };

    let mut roots: Vec<PathBuf> = Vec::new();
    for volume in volumes {
        match std::fs::read_dir(volume) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                    if is_dir {
                        roots.push(entry.path());
                    }
                }
            }
            Err(e) => debug!("Cannot list volume {}: {}", volume.display(), e),
        }
    }
    roots.extend(options.extra_candidates.iter().filter(|p| p.is_dir()).cloned());
    roots.sort();
    roots.dedup();
    roots.retain(|root| !excluded(root));
    info!("Sampling {} candidate directories", roots.len());

    let mut candidates: Vec<CandidateDirectory> = roots
        .par_iter()
        .filter_map(|root| {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            let candidate = sample_directory(root, options, &excluded);
            reporter.on_discovery_root(&root.to_string_lossy(), candidate.file_count);
            (candidate.file_count >= options.min_files.max(1)).then_some(candidate)
        })
        .collect();

    candidates.sort_by(|a, b| {
        (b.file_count, b.total_size)
            .cmp(&(a.file_count, a.total_size))
            .then_with(|| a.path.cmp(&b.path))
    });
    candidates.truncate(options.top_n);
    candidates
}

fn sample_directory(
    root: &Path,
    options: &DiscoveryOptions<'_>,
    excluded: &(dyn Fn(&Path) -> bool + Sync),
) -> CandidateDirectory {
    let mut candidate = CandidateDirectory {
        path: root.to_path_buf(),
        file_count: 0,
        total_size: 0,
        truncated: false,
    };
    let walker = WalkDir::new(root)
        .follow_links(false)
        .max_depth(options.sample_depth + 1)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !excluded(entry.path()));
    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(meta) = entry.metadata() {
            candidate.file_count += 1;
            candidate.total_size += meta.len();
        }
        if candidate.file_count >= options.file_limit {
            candidate.truncated = true;
            break;
        }
    }
    candidate
}
