//! Request-side types shared by the guardian, the action manager and the scheduler.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed action vocabulary. Nothing outside these four kinds can reach the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Move,
    Rename,
    Delete,
    Archive,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Move => "move",
            OperationKind::Rename => "rename",
            OperationKind::Delete => "delete",
            OperationKind::Archive => "archive",
        }
    }

    /// Kinds that relocate the file rather than destroy it.
    pub fn is_relocation(&self) -> bool {
        !matches!(self, OperationKind::Delete)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "move" => Ok(OperationKind::Move),
            "rename" => Ok(OperationKind::Rename),
            "delete" => Ok(OperationKind::Delete),
            "archive" => Ok(OperationKind::Archive),
            other => Err(format!("unknown operation kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationMethod {
    Ai,
    #[default]
    Rule,
}

/// Output of an external classifier. Untrusted: every field is re-validated before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    /// 0.0 to 1.0
    pub confidence: f32,
    /// Destination directory relative to the base destination.
    #[serde(default)]
    pub suggested_path: Option<String>,
    /// Optional new file name.
    #[serde(default)]
    pub suggested_name: Option<String>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub method: ClassificationMethod,
}

impl Classification {
    pub fn new(category: impl Into<String>, confidence: f32) -> Self {
        Self {
            category: category.into(),
            confidence,
            suggested_path: None,
            suggested_name: None,
            reasoning: String::new(),
            method: ClassificationMethod::Rule,
        }
    }

    pub fn with_suggested_path(mut self, path: impl Into<String>) -> Self {
        self.suggested_path = Some(path.into());
        self
    }

    pub fn with_suggested_name(mut self, name: impl Into<String>) -> Self {
        self.suggested_name = Some(name.into());
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_method(mut self, method: ClassificationMethod) -> Self {
        self.method = method;
        self
    }

    pub fn is_ai_suggested(&self) -> bool {
        self.method == ClassificationMethod::Ai
    }
}

/// Per-folder policy supplied by the caller. `allow_move == false` blocks any
/// relocation out of the folder before the guardian is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderPolicy {
    pub allow_move: bool,
}

impl Default for FolderPolicy {
    fn default() -> Self {
        Self { allow_move: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_kind_round_trips_through_str() {
        for kind in [
            OperationKind::Move,
            OperationKind::Rename,
            OperationKind::Delete,
            OperationKind::Archive,
        ] {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
        }
        assert!("execute_script".parse::<OperationKind>().is_err());
    }

    #[test]
    fn test_classification_deserializes_with_defaults() {
        let c: Classification =
            serde_json::from_str(r#"{"category":"Documents","confidence":0.9}"#).unwrap();
        assert_eq!(c.category, "Documents");
        assert!(c.suggested_path.is_none());
        assert_eq!(c.method, ClassificationMethod::Rule);
        assert!(!c.is_ai_suggested());
    }
}
