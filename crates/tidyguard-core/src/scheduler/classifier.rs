use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::model::Classification;

/// External categoriser consulted by the sweep loop. Its output is untrusted
/// and goes through full validation in [`ActionManager::execute`](crate::ActionManager::execute).
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    /// When false the sweep leaves due items queued for a later tick.
    fn is_available(&self) -> bool {
        true
    }

    fn classify(&self, path: &Path) -> Result<Classification, Error>;

    /// Relative cost of one call; 0 for local rules.
    fn cost_estimate(&self) -> f64 {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEventKind {
    Created,
    Modified,
    Moved,
    Removed,
}

/// One notification from a filesystem watcher. Duplicates and stale events
/// for files that are already gone are expected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
}

impl WatchEvent {
    pub fn new(path: impl Into<PathBuf>, kind: WatchEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}
