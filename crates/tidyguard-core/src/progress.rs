/// Progress callbacks for long-running duplicate scans, discovery and cleanup.
///
/// The CLI implements this with indicatif bars. All methods default to no-ops so
/// library callers and tests can pass [`SilentReporter`].
pub trait ProgressReporter: Send + Sync {
    fn on_scan_start(&self) {}
    fn on_scan_progress(&self, _files_found: usize, _current_path: &str) {}
    fn on_scan_complete(&self, _total_files: usize, _duration_secs: f64) {}
    fn on_hash_start(&self, _candidates: usize) {}
    fn on_hash_progress(&self, _files_hashed: usize, _total_files: usize) {}
    fn on_hash_complete(&self, _total_groups: usize, _duration_secs: f64) {}
    fn on_discovery_root(&self, _root: &str, _files_sampled: usize) {}
    fn on_cleanup_progress(&self, _processed: usize, _total: usize) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
