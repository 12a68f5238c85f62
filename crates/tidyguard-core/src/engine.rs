use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::actions::{ActionManager, CleanupReport};
use crate::config::AppConfig;
use crate::duplicates::{DuplicateFinder, DuplicateGroup, DuplicateSummary, KeepPlan, KeepStrategy};
use crate::error::Error;
use crate::guardian::{Guardian, RiskEvaluation, SecondaryReasoner};
use crate::model::{Classification, OperationKind};
use crate::progress::ProgressReporter;
use crate::scheduler::{Classifier, DeferredScheduler};
use crate::storage::AuditStore;

/// Wires the store, guardian, action manager and duplicate finder together
/// from one [`AppConfig`]. The store is the only shared resource.
pub struct Engine {
    config: AppConfig,
    store: Arc<AuditStore>,
    guardian: Arc<Guardian>,
    actions: Arc<ActionManager>,
    finder: DuplicateFinder,
}

#[derive(Debug, Serialize)]
pub struct DuplicateScan {
    pub scan_duration: Duration,
    /// Groups with no protected member.
    pub groups: Vec<DuplicateGroup>,
    pub protected_groups: Vec<DuplicateGroup>,
    pub protected_files: Vec<(PathBuf, String)>,
    pub plans: Vec<KeepPlan>,
    pub summary: DuplicateSummary,
}

impl DuplicateScan {
    pub fn space_to_free(&self) -> u64 {
        self.plans.iter().map(KeepPlan::space_freed).sum()
    }
}

impl Engine {
    /// Open the on-disk store at `config.database_path`.
    pub fn new(config: AppConfig) -> Result<Self, Error> {
        let store = AuditStore::open(&config.database_path, &config.database)?;
        Self::with_store(config, Arc::new(store), None)
    }

    pub fn in_memory(config: AppConfig) -> Result<Self, Error> {
        Self::with_store(config, Arc::new(AuditStore::open_in_memory()?), None)
    }

    pub fn with_store(
        config: AppConfig,
        store: Arc<AuditStore>,
        reasoner: Option<Arc<dyn SecondaryReasoner>>,
    ) -> Result<Self, Error> {
        let mut guardian = Guardian::new(&config.base_destination, config.guardian.clone())
            .with_store(Arc::clone(&store));
        if let Some(reasoner) = reasoner {
            guardian = guardian.with_reasoner(reasoner);
        }
        let guardian = Arc::new(guardian);
        let actions = Arc::new(ActionManager::new(
            &config.base_destination,
            config.actions.clone(),
            Arc::clone(&guardian),
            Arc::clone(&store),
        )?);
        let finder = DuplicateFinder::new(config.duplicates.clone(), guardian.protection_rules())
            .with_store(Arc::clone(&store));
        debug!(
            "Engine ready, base destination {}",
            config.base_destination.display()
        );
        Ok(Self {
            config,
            store,
            guardian,
            actions,
            finder,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<AuditStore> {
        &self.store
    }

    pub fn guardian(&self) -> &Arc<Guardian> {
        &self.guardian
    }

    pub fn actions(&self) -> &Arc<ActionManager> {
        &self.actions
    }

    pub fn finder(&self) -> &DuplicateFinder {
        &self.finder
    }

    /// Preview an operation without touching anything.
    pub fn evaluate(
        &self,
        source: &Path,
        destination: &Path,
        operation: OperationKind,
        classification: Option<&Classification>,
        user_approved: bool,
    ) -> RiskEvaluation {
        self.guardian
            .evaluate(source, destination, operation, classification, user_approved)
    }

    pub fn scheduler(&self, classifier: Arc<dyn Classifier>) -> Arc<DeferredScheduler> {
        Arc::new(DeferredScheduler::new(
            self.config.scheduler.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.actions),
            classifier,
        ))
    }

    /// Scan `roots` as one pool, drop protected groups and plan which copy of
    /// each remaining group survives. Nothing is deleted.
    pub fn scan_duplicates(
        &self,
        roots: Vec<PathBuf>,
        parallel: bool,
        strategy: KeepStrategy,
        reporter: &dyn ProgressReporter,
    ) -> Result<DuplicateScan, Error> {
        let start = Instant::now();
        let groups = self.finder.find_in_directories(roots, parallel, reporter)?;
        let summary = DuplicateFinder::summary(&groups);
        let filter = self.finder.filter_protected(groups);
        let plans = DuplicateFinder::plan(&filter.safe, strategy);
        let scan_duration = start.elapsed();
        info!(
            "Duplicate scan finished in {:.2}s: {} groups, {} protected, {} bytes reclaimable",
            scan_duration.as_secs_f64(),
            summary.groups,
            filter.protected.len(),
            plans.iter().map(KeepPlan::space_freed).sum::<u64>()
        );
        Ok(DuplicateScan {
            scan_duration,
            groups: filter.safe,
            protected_groups: filter.protected,
            protected_files: filter.protected_files,
            plans,
            summary,
        })
    }

    pub fn cleanup(
        &self,
        plans: &[KeepPlan],
        dry_run: bool,
        reporter: &dyn ProgressReporter,
    ) -> CleanupReport {
        self.actions.cleanup_duplicates(plans, dry_run, reporter)
    }
}
