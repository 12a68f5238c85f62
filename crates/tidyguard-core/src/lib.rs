pub mod actions;
pub mod config;
pub mod duplicates;
pub mod engine;
pub mod error;
pub mod guardian;
pub mod hasher;
pub mod model;
pub mod platform;
pub mod progress;
pub mod scanner;
pub mod scheduler;
pub mod storage;

pub use actions::{ActionManager, ActionResult, ActionTaken, ErrorOrigin, ExecuteOptions};
pub use config::AppConfig;
pub use duplicates::{DuplicateFinder, DuplicateGroup, KeepPlan};
pub use engine::Engine;
pub use error::Error;
pub use guardian::{Guardian, RiskEvaluation, RiskLevel, Severity, ThreatFinding, ThreatType};
pub use model::{Classification, ClassificationMethod, FolderPolicy, OperationKind};
pub use progress::{ProgressReporter, SilentReporter};
pub use scheduler::{Classifier, DeferredScheduler, WatchEvent, WatchEventKind};
pub use storage::AuditStore;
