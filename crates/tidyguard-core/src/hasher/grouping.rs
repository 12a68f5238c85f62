use dashmap::DashMap;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::error;

use super::cache::HashCache;
use super::digest::partial_hash;
use crate::progress::ProgressReporter;

/// Digest → (file size, paths) for confirmed duplicates only.
pub type ContentGroups = DashMap<String, (u64, Vec<PathBuf>)>;

/// Two-tier grouping:
/// 1. Partial hash (first 1KB via XxHash64) to quickly eliminate non-matches
/// 2. Full content digest only on partial-hash collisions
///
/// Unreadable files are logged and dropped from their bucket. Setting `cancel`
/// stops hashing new buckets; groups already confirmed are kept.
pub fn build_content_hash_map(
    size_to_file_map: DashMap<u64, Vec<PathBuf>>,
    cache: &HashCache,
    parallel: bool,
    cancel: &AtomicBool,
    reporter: &dyn ProgressReporter,
) -> ContentGroups {
    let confirmed: ContentGroups = DashMap::new();
    let buckets: Vec<(u64, Vec<PathBuf>)> = size_to_file_map
        .into_iter()
        .filter(|(_, files)| files.len() > 1)
        .collect();

    let total: usize = buckets.iter().map(|(_, files)| files.len()).sum();
    let hashed = AtomicUsize::new(0);
    reporter.on_hash_start(total);

    let process = |(size, files): &(u64, Vec<PathBuf>)| {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        for (digest, paths) in group_bucket(files, cache, parallel) {
            confirmed
                .entry(digest)
                .or_insert_with(|| (*size, Vec::new()))
                .1
                .extend(paths);
        }
        let done = hashed.fetch_add(files.len(), Ordering::Relaxed) + files.len();
        reporter.on_hash_progress(done, total);
    };

    if parallel {
        buckets.par_iter().for_each(process);
    } else {
        buckets.iter().for_each(process);
    }

    confirmed
}

fn group_bucket(files: &[PathBuf], cache: &HashCache, parallel: bool) -> Vec<(String, Vec<PathBuf>)> {
    // First pass: partial hash to eliminate non-dupes quickly
    let partial: Vec<(u64, &PathBuf)> = if parallel {
        files
            .par_iter()
            .filter_map(|file| log_failure(file, partial_hash(file)).map(|h| (h, file)))
            .collect()
    } else {
        files
            .iter()
            .filter_map(|file| log_failure(file, partial_hash(file)).map(|h| (h, file)))
            .collect()
    };

    let mut by_partial: HashMap<u64, Vec<&PathBuf>> = HashMap::new();
    for (hash, file) in partial {
        by_partial.entry(hash).or_default().push(file);
    }

    // Second pass: full digest only on partial-hash collisions (>1 file)
    let candidates: Vec<&PathBuf> = by_partial
        .into_values()
        .filter(|files| files.len() > 1)
        .flatten()
        .collect();

    let full: Vec<(String, PathBuf)> = if parallel {
        candidates
            .par_iter()
            .filter_map(|file| log_failure(file, cache.get_or_hash(file)).map(|d| (d, (*file).clone())))
            .collect()
    } else {
        candidates
            .iter()
            .filter_map(|file| log_failure(file, cache.get_or_hash(file)).map(|d| (d, (*file).clone())))
            .collect()
    };

    let mut by_digest: HashMap<String, Vec<PathBuf>> = HashMap::new();
    for (digest, file) in full {
        by_digest.entry(digest).or_default().push(file);
    }

    by_digest
        .into_iter()
        .filter(|(_, files)| files.len() > 1)
        .collect()
}

fn log_failure<T>(file: &Path, result: std::io::Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            error!("Error processing file '{}': {}", file.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::HashAlgorithm;
    use crate::progress::SilentReporter;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_same_size_different_content_not_grouped() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        let c = dir.path().join("c.txt");
        fs::write(&a, b"aaaa").unwrap();
        fs::write(&b, b"aaaa").unwrap();
        fs::write(&c, b"bbbb").unwrap();

        let map = DashMap::new();
        map.insert(4u64, vec![a.clone(), b.clone(), c]);
        let cache = HashCache::new(HashAlgorithm::Xxh64, 4096);

        for parallel in [false, true] {
            let groups = build_content_hash_map(
                map.clone(),
                &cache,
                parallel,
                &AtomicBool::new(false),
                &SilentReporter,
            );
            assert_eq!(groups.len(), 1);
            let entry = groups.iter().next().unwrap();
            let (size, paths) = entry.value();
            assert_eq!(*size, 4);
            let mut paths = paths.clone();
            paths.sort();
            assert_eq!(paths, vec![a.clone(), b.clone()]);
        }
    }

    #[test]
    fn test_cancel_before_start_yields_nothing() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, b"same").unwrap();
        fs::write(&b, b"same").unwrap();

        let map = DashMap::new();
        map.insert(4u64, vec![a, b]);
        let cache = HashCache::new(HashAlgorithm::Blake3, 4096);
        let groups =
            build_content_hash_map(map, &cache, true, &AtomicBool::new(true), &SilentReporter);
        assert!(groups.is_empty());
    }
}
