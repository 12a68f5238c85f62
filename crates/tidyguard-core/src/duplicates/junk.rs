//! Temporary and leftover files such as partial downloads and editor backups.

use glob::{MatchOptions, Pattern};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error};
use walkdir::WalkDir;

use crate::platform;

pub const DEFAULT_JUNK_PATTERNS: &[&str] = &[
    "*.tmp",
    "*.temp",
    "*.cache",
    "*.crdownload",
    "*.part",
    "*.partial",
    "*.download",
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    "*.bak",
    "*~",
];

const NAME_MATCH: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Every regular file under `root` whose name matches one of `patterns`,
/// sorted. Symlinks are not followed and pruned directories are skipped.
pub fn find_junk_files(
    root: &Path,
    patterns: &[String],
    pruned_dirs: &[PathBuf],
    cancel: &AtomicBool,
) -> Vec<PathBuf> {
    let patterns: Vec<Pattern> = patterns
        .iter()
        .filter_map(|p| match Pattern::new(p) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                error!("Invalid junk pattern '{}': {}", p, e);
                None
            }
        })
        .collect();
    if patterns.is_empty() {
        return Vec::new();
    }

    let mut junk: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            !cancel.load(Ordering::Relaxed)
                && !(entry.file_type().is_dir()
                    && pruned_dirs
                        .iter()
                        .any(|pruned| platform::path_starts_with(entry.path(), pruned)))
        })
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            patterns.iter().any(|p| p.matches_with(&name, NAME_MATCH))
        })
        .map(|entry| entry.into_path())
        .collect();
    junk.sort();
    junk
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn defaults() -> Vec<String> {
        DEFAULT_JUNK_PATTERNS.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_matches_names_case_insensitively() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("downloads").join("old");
        fs::create_dir_all(&nested).unwrap();
        for name in ["movie.mp4.crdownload", "notes.txt~", "THUMBS.DB", "keep.txt", "report.bak"] {
            fs::write(dir.path().join("downloads").join(name), b"x").unwrap();
        }
        fs::write(nested.join("setup.part"), b"x").unwrap();
        fs::create_dir_all(dir.path().join("cache.tmp")).unwrap();

        let stop = AtomicBool::new(false);
        let junk = find_junk_files(dir.path(), &defaults(), &[], &stop);
        // Sorted by path, so the nested file comes before report.bak.
        let names: Vec<String> = junk
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["THUMBS.DB", "movie.mp4.crdownload", "notes.txt~", "setup.part", "report.bak"]
        );
    }

    #[test]
    fn test_pruned_directories_are_skipped() {
        let dir = tempdir().unwrap();
        let pruned = dir.path().join("system");
        fs::create_dir_all(&pruned).unwrap();
        fs::write(pruned.join("swap.tmp"), b"x").unwrap();
        fs::write(dir.path().join("mine.tmp"), b"x").unwrap();

        let stop = AtomicBool::new(false);
        let junk = find_junk_files(dir.path(), &defaults(), &[pruned], &stop);
        assert_eq!(junk, vec![dir.path().join("mine.tmp")]);
    }
}
