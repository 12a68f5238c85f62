use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::model::OperationKind;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UndoEntry {
    pub action: OperationKind,
    pub old_path: PathBuf,
    pub new_path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

/// Bounded history of this session's relocations. The oldest entry is evicted
/// once `capacity` is reached.
pub struct UndoStack {
    entries: Mutex<VecDeque<UndoEntry>>,
    capacity: usize,
}

impl UndoStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<UndoEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, entry: UndoEntry) {
        let mut entries = self.entries();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Drop the newest entry that moved `old_path` to `new_path`.
    pub fn forget(&self, old_path: &Path, new_path: &Path) -> bool {
        let mut entries = self.entries();
        match entries
            .iter()
            .rposition(|e| e.old_path == old_path && e.new_path == new_path)
        {
            Some(index) => entries.remove(index).is_some(),
            None => false,
        }
    }

    /// Newest first.
    pub fn history(&self) -> Vec<UndoEntry> {
        self.entries().iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
