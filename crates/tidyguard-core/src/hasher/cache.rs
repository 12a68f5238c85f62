use dashmap::DashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::trace;

use super::digest::{hash_file, HashAlgorithm};

#[derive(Debug, Clone)]
struct CachedDigest {
    len: u64,
    modified: Option<SystemTime>,
    digest: String,
}

/// Per-finder digest cache keyed on path. An entry is only reused while the
/// file's size and modification time still match what was hashed.
#[derive(Debug)]
pub struct HashCache {
    algorithm: HashAlgorithm,
    chunk_size: usize,
    entries: DashMap<PathBuf, CachedDigest>,
}

impl HashCache {
    pub fn new(algorithm: HashAlgorithm, chunk_size: usize) -> Self {
        Self {
            algorithm,
            chunk_size,
            entries: DashMap::new(),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Cached digest when fresh, otherwise hash and remember.
    pub fn get_or_hash(&self, path: &Path) -> io::Result<String> {
        let metadata = fs::metadata(path)?;
        let len = metadata.len();
        let modified = metadata.modified().ok();

        if let Some(entry) = self.entries.get(path) {
            if entry.len == len && entry.modified == modified {
                trace!("Found digest for {} in cache", path.display());
                return Ok(entry.digest.clone());
            }
        }

        let digest = hash_file(path, self.algorithm, self.chunk_size)?;
        self.entries.insert(
            path.to_path_buf(),
            CachedDigest {
                len,
                modified,
                digest: digest.clone(),
            },
        );
        Ok(digest)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
