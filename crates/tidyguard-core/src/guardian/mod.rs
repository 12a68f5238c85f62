//! Risk evaluation for proposed file operations.
//!
//! [`Guardian::evaluate`] runs the deterministic check layers, folds the
//! findings into a [`RiskLevel`], optionally asks a [`SecondaryReasoner`] about
//! borderline cases and decides approval. Refusals are kept in a bounded
//! in-memory trail and, when a store is attached, persisted.

mod checks;
pub mod path_security;
pub mod protection;
pub mod reasoner;
pub mod types;

use chrono::Utc;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::GuardianConfig;
use crate::model::{Classification, OperationKind};
use crate::storage::AuditStore;
use checks::Subject;

pub use protection::{AppMarker, ProtectionRules};
pub use reasoner::{ReasoningContext, SecondaryOpinion, SecondaryReasoner};
pub use types::{
    BlockedOperation, GuardianStats, RecommendedAction, RiskEvaluation, RiskLevel, Severity,
    ThreatFinding, ThreatType,
};

pub struct Guardian {
    base_destination: PathBuf,
    config: GuardianConfig,
    rules: Arc<ProtectionRules>,
    reasoner: Option<Arc<dyn SecondaryReasoner>>,
    store: Option<Arc<AuditStore>>,
    blocked: Mutex<VecDeque<BlockedOperation>>,
}

impl Guardian {
    pub fn new(base_destination: impl Into<PathBuf>, config: GuardianConfig) -> Self {
        let rules = Arc::new(ProtectionRules::new(&config));
        Self {
            base_destination: base_destination.into(),
            config,
            rules,
            reasoner: None,
            store: None,
            blocked: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_reasoner(mut self, reasoner: Arc<dyn SecondaryReasoner>) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    /// Persist every refusal to `blocked_operations` in addition to the in-memory trail.
    pub fn with_store(mut self, store: Arc<AuditStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn base_destination(&self) -> &Path {
        &self.base_destination
    }

    pub fn config(&self) -> &GuardianConfig {
        &self.config
    }

    pub fn protection_rules(&self) -> Arc<ProtectionRules> {
        Arc::clone(&self.rules)
    }

    /// Evaluate one proposed operation. Never fails and never touches the
    /// filesystem beyond metadata reads.
    ///
    /// A relative `destination` is taken relative to the base destination.
    /// For deletes pass the source path as the destination.
    pub fn evaluate(
        &self,
        source: &Path,
        destination: &Path,
        operation: OperationKind,
        classification: Option<&Classification>,
        user_approved: bool,
    ) -> RiskEvaluation {
        let source_abs = path_security::absolutize(source);
        let destination_abs = if destination.is_absolute() {
            destination.to_path_buf()
        } else {
            self.base_destination.join(destination)
        };
        let subject = Subject {
            source: &source_abs,
            raw_destination: destination,
            destination: &destination_abs,
            kind: operation,
        };

        let mut findings = Vec::new();
        let mut warnings = Vec::new();
        checks::path_security(&subject, &self.base_destination, &self.config, &mut findings);
        checks::system_protection(&subject, &self.rules, &mut findings);
        checks::application_integrity(&subject, &self.rules, &mut findings);
        checks::data_loss(&subject, &self.config, &mut findings);
        if let Some(classification) = classification {
            checks::classification_sanity(&subject, classification, &self.config, &mut warnings);
        }
        checks::permissions(&subject, &mut findings);

        let mut risk_level = calculate_risk_level(&findings, &warnings);

        let mut secondary_opinion = None;
        if matches!(risk_level, RiskLevel::Caution | RiskLevel::HighRisk) {
            if let Some(reasoner) = &self.reasoner {
                let context = ReasoningContext {
                    source: source_abs.clone(),
                    destination: destination_abs.clone(),
                    operation,
                    classification: classification.cloned(),
                    findings: findings.clone(),
                    warnings: warnings.clone(),
                    preliminary_level: risk_level,
                };
                let timeout = Duration::from_secs(self.config.reasoning_timeout_secs);
                if let Some(opinion) = reasoner::consult(reasoner, context, timeout) {
                    risk_level = reasoner::apply_opinion(risk_level, &opinion, !findings.is_empty());
                    secondary_opinion = Some(opinion);
                }
            }
        }

        let approved = self.should_approve(risk_level, user_approved, &findings);
        let reasoning = build_reasoning(risk_level, &findings, &warnings, secondary_opinion.as_ref());
        let evaluation = RiskEvaluation {
            risk_level,
            approved,
            requires_confirmation: matches!(risk_level, RiskLevel::Caution | RiskLevel::HighRisk),
            recommended_action: RecommendedAction::for_level(risk_level, user_approved),
            reasoning,
            findings,
            warnings,
            secondary_opinion,
        };

        if approved {
            debug!(
                "Guardian approved {} {} ({})",
                operation,
                source_abs.display(),
                risk_level
            );
        } else {
            self.record_blocked(operation, &source_abs, &destination_abs, &evaluation);
        }
        info!(
            "Guardian evaluation: {} - {}",
            risk_level,
            if approved { "APPROVED" } else { "BLOCKED" }
        );

        evaluation
    }

    fn should_approve(&self, level: RiskLevel, user_approved: bool, findings: &[ThreatFinding]) -> bool {
        match level {
            RiskLevel::Critical => false,
            RiskLevel::HighRisk => user_approved,
            RiskLevel::Caution => {
                if findings.iter().any(|f| f.severity() == Severity::Critical) {
                    return false;
                }
                user_approved || self.config.auto_approve_caution
            }
            RiskLevel::Safe => true,
        }
    }

    fn trail(&self) -> MutexGuard<'_, VecDeque<BlockedOperation>> {
        self.blocked.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_blocked(
        &self,
        operation: OperationKind,
        source: &Path,
        destination: &Path,
        evaluation: &RiskEvaluation,
    ) {
        let blocked = BlockedOperation {
            timestamp: Utc::now(),
            operation,
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            risk_level: evaluation.risk_level,
            findings: evaluation.findings.clone(),
        };
        warn!(
            "[SECURITY AUDIT] Blocked {} {} -> {}: {}",
            operation,
            source.display(),
            destination.display(),
            evaluation.summary()
        );

        if let Some(store) = &self.store {
            if let Err(e) = store.record_blocked(&blocked) {
                warn!("Failed to persist blocked operation: {}", e);
            }
        }

        let mut trail = self.trail();
        trail.push_back(blocked);
        while trail.len() > self.config.max_blocked_history.max(1) {
            trail.pop_front();
        }
    }

    /// Snapshot of the in-memory trail, oldest first.
    pub fn blocked_operations(&self) -> Vec<BlockedOperation> {
        self.trail().iter().cloned().collect()
    }

    pub fn statistics(&self) -> GuardianStats {
        let trail = self.trail();
        let mut stats = GuardianStats {
            total_blocked: trail.len(),
            ..GuardianStats::default()
        };
        for blocked in trail.iter() {
            *stats.risk_levels.entry(blocked.risk_level).or_default() += 1;
            for finding in &blocked.findings {
                *stats.threat_types.entry(finding.threat_type()).or_default() += 1;
            }
        }
        stats
    }

    /// Protection-only answer used by dedupe cleanup and the scheduler.
    pub fn is_file_safe_to_modify(&self, path: &Path) -> (bool, String) {
        self.rules
            .is_file_safe_to_modify(&path_security::absolutize(path))
    }
}

/// Any CRITICAL finding wins. Two or more HIGH findings make HIGH_RISK, a
/// single HIGH makes CAUTION, and any remaining finding or warning is CAUTION.
pub fn calculate_risk_level(findings: &[ThreatFinding], warnings: &[String]) -> RiskLevel {
    if findings.iter().any(|f| f.severity() == Severity::Critical) {
        return RiskLevel::Critical;
    }
    let high = findings
        .iter()
        .filter(|f| f.severity() == Severity::High)
        .count();
    if high >= 2 {
        RiskLevel::HighRisk
    } else if high == 1 || !findings.is_empty() || !warnings.is_empty() {
        RiskLevel::Caution
    } else {
        RiskLevel::Safe
    }
}

fn build_reasoning(
    level: RiskLevel,
    findings: &[ThreatFinding],
    warnings: &[String],
    opinion: Option<&SecondaryOpinion>,
) -> String {
    let mut parts = vec![format!("Risk level: {}", level)];
    if !findings.is_empty() {
        parts.push(format!("Threats detected ({}):", findings.len()));
        parts.extend(findings.iter().take(5).map(|f| format!("  - {}", f)));
    }
    if !warnings.is_empty() {
        parts.push(format!("Warnings ({}):", warnings.len()));
        parts.extend(warnings.iter().take(5).map(|w| format!("  - {}", w)));
    }
    if let Some(opinion) = opinion {
        parts.push(format!("Secondary review: {}", opinion.reasoning));
    }
    parts.push(
        match level {
            RiskLevel::Critical => "Operation blocked: critical safety concerns detected.",
            RiskLevel::HighRisk => "High risk: explicit user approval required.",
            RiskLevel::Caution => "Caution: review recommended before proceeding.",
            RiskLevel::Safe => "Operation appears safe to proceed.",
        }
        .to_string(),
    );
    parts.join("\n")
}
