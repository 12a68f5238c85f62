use dashmap::DashMap;
use glob::Pattern;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{error, warn};

use crate::platform;
use crate::progress::ProgressReporter;

pub struct WalkOptions<'a> {
    pub recursive: bool,
    pub min_file_size: u64,
    pub ignore_globs: &'a [String],
    /// Directories never descended into, typically the platform system list.
    pub pruned_dirs: &'a [PathBuf],
}

pub fn compile_patterns(globs: &[String]) -> Vec<Pattern> {
    globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect()
}

/// Parallel directory traversal. Builds a map of file_size → Vec<PathBuf>,
/// filtering by glob ignore patterns and the minimum size. Never follows
/// symlinks; unreadable entries are logged and skipped.
pub fn build_size_to_files_map(
    root_paths: &[PathBuf],
    options: &WalkOptions<'_>,
    cancel: &AtomicBool,
    reporter: &dyn ProgressReporter,
) -> DashMap<u64, Vec<PathBuf>> {
    let map: DashMap<u64, Vec<PathBuf>> = DashMap::new();
    let ignore_patterns = compile_patterns(options.ignore_globs);
    let ctx = WalkContext {
        map: &map,
        ignore_patterns: &ignore_patterns,
        options,
        cancel,
        reporter,
        found: AtomicUsize::new(0),
    };

    root_paths.par_iter().for_each(|root| {
        if let Err(e) = visit_dirs(root, &ctx, true) {
            warn!("Error scanning {}: {}", root.display(), e);
        }
    });

    map
}

struct WalkContext<'a> {
    map: &'a DashMap<u64, Vec<PathBuf>>,
    ignore_patterns: &'a [Pattern],
    options: &'a WalkOptions<'a>,
    cancel: &'a AtomicBool,
    reporter: &'a dyn ProgressReporter,
    found: AtomicUsize,
}

impl WalkContext<'_> {
    fn ignored(&self, path: &Path) -> bool {
        self.ignore_patterns
            .iter()
            .any(|pattern| pattern.matches_path(path))
    }

    fn pruned(&self, dir: &Path) -> bool {
        self.options
            .pruned_dirs
            .iter()
            .any(|pruned| platform::path_starts_with(dir, pruned))
    }
}

fn visit_dirs(dir: &Path, ctx: &WalkContext<'_>, is_root: bool) -> io::Result<()> {
    if ctx.cancel.load(Ordering::Relaxed) || ctx.ignored(dir) || ctx.pruned(dir) {
        return Ok(());
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            error!("Access denied reading directory {}: {}", dir.display(), err);
            return Ok(());
        }
        Err(err) if !is_root => {
            warn!("Skipping directory {}: {}", dir.display(), err);
            return Ok(());
        }
        Err(err) => {
            return Err(io::Error::new(
                err.kind(),
                format!("Error reading directory {}: {}", dir.display(), err),
            ))
        }
    };

    entries.par_bridge().for_each(|entry_result| {
        let entry = match entry_result {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Error reading entry in directory {}: {}", dir.display(), err);
                return;
            }
        };

        let path = entry.path();
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!("Error getting metadata for {}: {}", path.display(), err);
                return;
            }
        };

        if metadata.file_type().is_symlink() {
            return;
        }
        if metadata.is_dir() {
            if ctx.options.recursive {
                let _ = visit_dirs(&path, ctx, false);
            }
        } else if metadata.is_file()
            && metadata.len() > 0
            && metadata.len() >= ctx.options.min_file_size
            && !ctx.ignored(&path)
        {
            ctx.map.entry(metadata.len()).or_default().push(path.clone());
            let found = ctx.found.fetch_add(1, Ordering::Relaxed) + 1;
            if found % 1000 == 0 {
                ctx.reporter
                    .on_scan_progress(found, &path.to_string_lossy());
            }
        }
    });

    Ok(())
}
