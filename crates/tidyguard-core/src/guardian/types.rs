use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::reasoner::SecondaryOpinion;
use crate::model::OperationKind;

/// Ordered: SAFE < CAUTION < HIGH_RISK < CRITICAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Safe,
    Caution,
    HighRisk,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Caution => "caution",
            RiskLevel::HighRisk => "high_risk",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "safe" => Ok(RiskLevel::Safe),
            "caution" => Ok(RiskLevel::Caution),
            "high_risk" | "high" => Ok(RiskLevel::HighRisk),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(format!("unknown risk level '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    SystemFile,
    ApplicationFile,
    PathTraversal,
    DataLoss,
    PermissionEscalation,
    CircularReference,
    HiddenSystem,
    AppBundle,
    ExecutableModification,
    SymlinkAttack,
}

impl ThreatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatType::SystemFile => "system_file",
            ThreatType::ApplicationFile => "application_file",
            ThreatType::PathTraversal => "path_traversal",
            ThreatType::DataLoss => "data_loss",
            ThreatType::PermissionEscalation => "permission_escalation",
            ThreatType::CircularReference => "circular_reference",
            ThreatType::HiddenSystem => "hidden_system",
            ThreatType::AppBundle => "app_bundle",
            ThreatType::ExecutableModification => "executable_modification",
            ThreatType::SymlinkAttack => "symlink_attack",
        }
    }
}

impl fmt::Display for ThreatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single detected hazard. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatFinding {
    threat_type: ThreatType,
    severity: Severity,
    message: String,
}

impl ThreatFinding {
    pub fn new(threat_type: ThreatType, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            threat_type,
            severity,
            message: message.into(),
        }
    }

    pub fn critical(threat_type: ThreatType, message: impl Into<String>) -> Self {
        Self::new(threat_type, Severity::Critical, message)
    }

    pub fn high(threat_type: ThreatType, message: impl Into<String>) -> Self {
        Self::new(threat_type, Severity::High, message)
    }

    pub fn medium(threat_type: ThreatType, message: impl Into<String>) -> Self {
        Self::new(threat_type, Severity::Medium, message)
    }

    pub fn threat_type(&self) -> ThreatType {
        self.threat_type
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ThreatFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}: {}", self.severity, self.threat_type, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Proceed,
    Confirm,
    ConfirmHighRisk,
    ProceedWithCaution,
    Block,
}

impl RecommendedAction {
    pub fn for_level(level: RiskLevel, user_approved: bool) -> Self {
        match level {
            RiskLevel::Safe => RecommendedAction::Proceed,
            RiskLevel::Caution => RecommendedAction::Confirm,
            RiskLevel::HighRisk if user_approved => RecommendedAction::ProceedWithCaution,
            RiskLevel::HighRisk => RecommendedAction::ConfirmHighRisk,
            RiskLevel::Critical => RecommendedAction::Block,
        }
    }
}

/// Verdict for one proposed operation.
#[derive(Debug, Clone, Serialize)]
pub struct RiskEvaluation {
    pub risk_level: RiskLevel,
    pub findings: Vec<ThreatFinding>,
    pub warnings: Vec<String>,
    pub approved: bool,
    pub requires_confirmation: bool,
    pub reasoning: String,
    pub recommended_action: RecommendedAction,
    pub secondary_opinion: Option<SecondaryOpinion>,
}

impl RiskEvaluation {
    pub fn has_critical_finding(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.severity() == Severity::Critical)
    }

    /// One-line summary for results and logs.
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = self.findings.iter().map(|f| f.message().to_string()).collect();
        parts.extend(self.warnings.iter().cloned());
        if parts.is_empty() {
            format!("{}: {}", self.risk_level, self.reasoning)
        } else {
            format!("{}: {}", self.risk_level, parts.join("; "))
        }
    }
}

/// An operation the guardian refused, kept for audit.
#[derive(Debug, Clone, Serialize)]
pub struct BlockedOperation {
    pub timestamp: DateTime<Utc>,
    pub operation: OperationKind,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub risk_level: RiskLevel,
    pub findings: Vec<ThreatFinding>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GuardianStats {
    pub total_blocked: usize,
    pub threat_types: BTreeMap<ThreatType, usize>,
    pub risk_levels: BTreeMap<RiskLevel, usize>,
}
