//! Optional second opinion on borderline evaluations.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use super::types::{RiskLevel, ThreatFinding};
use crate::error::Error;
use crate::model::{Classification, OperationKind};

/// Everything the reasoner may look at. Owned so the call can run on its own thread.
#[derive(Debug, Clone, Serialize)]
pub struct ReasoningContext {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub operation: OperationKind,
    pub classification: Option<Classification>,
    pub findings: Vec<ThreatFinding>,
    pub warnings: Vec<String>,
    pub preliminary_level: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryOpinion {
    pub risk_level: RiskLevel,
    pub reasoning: String,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub confidence: f32,
}

/// A slow, fallible advisor consulted only for CAUTION and HIGH_RISK results.
pub trait SecondaryReasoner: Send + Sync {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool {
        true
    }

    fn assess(&self, context: &ReasoningContext) -> Result<SecondaryOpinion, Error>;
}

/// Ask the reasoner on a helper thread and give up after `timeout`. Any failure
/// or timeout returns `None` and the deterministic verdict stands.
pub(crate) fn consult(
    reasoner: &Arc<dyn SecondaryReasoner>,
    context: ReasoningContext,
    timeout: Duration,
) -> Option<SecondaryOpinion> {
    if !reasoner.is_available() {
        debug!("Secondary reasoner '{}' unavailable, skipping", reasoner.name());
        return None;
    }

    let (tx, rx) = mpsc::channel();
    let worker = Arc::clone(reasoner);
    let spawned = thread::Builder::new()
        .name("tidyguard-reasoner".to_string())
        .spawn(move || {
            let _ = tx.send(worker.assess(&context));
        });
    if let Err(e) = spawned {
        warn!("Could not start secondary reasoner: {}", e);
        return None;
    }

    match rx.recv_timeout(timeout) {
        Ok(Ok(opinion)) => Some(opinion),
        Ok(Err(e)) => {
            warn!("Secondary reasoner '{}' failed: {}", reasoner.name(), e);
            None
        }
        Err(_) => {
            warn!(
                "Secondary reasoner '{}' gave no answer within {:?}",
                reasoner.name(),
                timeout
            );
            None
        }
    }
}

/// Fold an opinion into the deterministic level. The opinion can escalate
/// freely but only clears a CAUTION that carries no findings.
pub(crate) fn apply_opinion(level: RiskLevel, opinion: &SecondaryOpinion, has_findings: bool) -> RiskLevel {
    match opinion.risk_level {
        RiskLevel::Critical => RiskLevel::Critical,
        RiskLevel::HighRisk if level == RiskLevel::Caution => RiskLevel::HighRisk,
        RiskLevel::Safe if level == RiskLevel::Caution && !has_findings => RiskLevel::Safe,
        _ => level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(RiskLevel, Duration);

    impl SecondaryReasoner for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn assess(&self, _context: &ReasoningContext) -> Result<SecondaryOpinion, Error> {
            thread::sleep(self.1);
            Ok(SecondaryOpinion {
                risk_level: self.0,
                reasoning: "fixed".into(),
                concerns: vec![],
                confidence: 1.0,
            })
        }
    }

    fn context() -> ReasoningContext {
        ReasoningContext {
            source: PathBuf::from("/a"),
            destination: PathBuf::from("/b"),
            operation: OperationKind::Move,
            classification: None,
            findings: vec![],
            warnings: vec!["low confidence".into()],
            preliminary_level: RiskLevel::Caution,
        }
    }

    fn opinion(level: RiskLevel) -> SecondaryOpinion {
        SecondaryOpinion {
            risk_level: level,
            reasoning: String::new(),
            concerns: vec![],
            confidence: 0.9,
        }
    }

    #[test]
    fn test_opinion_never_clears_high_risk() {
        assert_eq!(
            apply_opinion(RiskLevel::HighRisk, &opinion(RiskLevel::Safe), true),
            RiskLevel::HighRisk
        );
        assert_eq!(
            apply_opinion(RiskLevel::HighRisk, &opinion(RiskLevel::Safe), false),
            RiskLevel::HighRisk
        );
    }

    #[test]
    fn test_opinion_escalates() {
        assert_eq!(
            apply_opinion(RiskLevel::Caution, &opinion(RiskLevel::Critical), false),
            RiskLevel::Critical
        );
        assert_eq!(
            apply_opinion(RiskLevel::Caution, &opinion(RiskLevel::HighRisk), true),
            RiskLevel::HighRisk
        );
    }

    #[test]
    fn test_opinion_clears_only_warning_caution() {
        assert_eq!(
            apply_opinion(RiskLevel::Caution, &opinion(RiskLevel::Safe), false),
            RiskLevel::Safe
        );
        assert_eq!(
            apply_opinion(RiskLevel::Caution, &opinion(RiskLevel::Safe), true),
            RiskLevel::Caution
        );
    }

    #[test]
    fn test_consult_times_out() {
        let slow: Arc<dyn SecondaryReasoner> =
            Arc::new(Fixed(RiskLevel::Critical, Duration::from_millis(500)));
        assert!(consult(&slow, context(), Duration::from_millis(20)).is_none());

        let fast: Arc<dyn SecondaryReasoner> = Arc::new(Fixed(RiskLevel::Safe, Duration::ZERO));
        let answer = consult(&fast, context(), Duration::from_secs(5)).unwrap();
        assert_eq!(answer.risk_level, RiskLevel::Safe);
    }
}
