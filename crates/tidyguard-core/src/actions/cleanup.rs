use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

use super::{ActionManager, ActionTaken};
use crate::duplicates::KeepPlan;
use crate::progress::ProgressReporter;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub groups: usize,
    pub files_deleted: usize,
    pub space_freed: u64,
    pub skipped_protected: Vec<PathBuf>,
    pub errors: Vec<String>,
    pub dry_run: bool,
}

impl ActionManager {
    /// Delete the `delete` side of every plan through the guarded delete path.
    ///
    /// A plan whose keep copy no longer exists is skipped whole. Protected
    /// files are skipped and reported. Deleting a duplicate counts as user
    /// approved: the caller already chose which copy survives.
    pub fn cleanup_duplicates(
        &self,
        plans: &[KeepPlan],
        dry_run: bool,
        reporter: &dyn ProgressReporter,
    ) -> CleanupReport {
        let dry_run = self.is_dry_run(dry_run);
        let mut report = CleanupReport {
            dry_run,
            ..CleanupReport::default()
        };
        let total: usize = plans.iter().map(|p| p.delete.len()).sum();
        let mut processed = 0;

        for plan in plans {
            if !plan.keep.is_file() {
                warn!(
                    "Skipping group {}: keep copy {} is missing",
                    plan.hash,
                    plan.keep.display()
                );
                report.errors.push(format!(
                    "{}: keep copy is missing, group skipped",
                    plan.keep.display()
                ));
                processed += plan.delete.len();
                reporter.on_cleanup_progress(processed, total);
                continue;
            }
            report.groups += 1;

            for path in &plan.delete {
                processed += 1;
                let (safe, reason) = self.guardian.is_file_safe_to_modify(path);
                if !safe {
                    info!("Skipping protected duplicate {}: {}", path.display(), reason);
                    report.skipped_protected.push(path.clone());
                    reporter.on_cleanup_progress(processed, total);
                    continue;
                }

                let result = self.delete(path, true, dry_run);
                if result.success {
                    report.files_deleted += 1;
                    report.space_freed += plan.size;
                    if matches!(result.action, ActionTaken::Performed(_)) {
                        if let Err(e) = self.store.remove_duplicate(path) {
                            warn!("Failed to drop duplicate record for {}: {}", path.display(), e);
                        }
                    }
                } else {
                    report
                        .errors
                        .push(format!("{}: {}", path.display(), result.message));
                }
                reporter.on_cleanup_progress(processed, total);
            }
        }

        if !dry_run && report.files_deleted > 0 {
            if let Err(e) = self.store.record_duplicates_removed(report.files_deleted as u64) {
                warn!("Failed to record removed duplicates: {}", e);
            }
        }
        info!(
            "{}Removed {} duplicate files, {} bytes freed, {} protected, {} errors",
            if dry_run { "[DRY RUN] " } else { "" },
            report.files_deleted,
            report.space_freed,
            report.skipped_protected.len(),
            report.errors.len()
        );
        report
    }
}
