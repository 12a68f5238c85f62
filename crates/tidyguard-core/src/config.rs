use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::duplicates::junk::DEFAULT_JUNK_PATTERNS;
use crate::hasher::HashAlgorithm;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Every organising move lands under this directory.
    pub base_destination: PathBuf,
    pub database_path: PathBuf,
    pub guardian: GuardianConfig,
    pub actions: ActionConfig,
    pub duplicates: DuplicateConfig,
    pub scheduler: SchedulerConfig,
    pub database: DatabaseConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let home = home_dir();
        Self {
            base_destination: home.join("Organized"),
            database_path: home.join(".tidyguard").join("tidyguard.db"),
            guardian: GuardianConfig::default(),
            actions: ActionConfig::default(),
            duplicates: DuplicateConfig::default(),
            scheduler: SchedulerConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuardianConfig {
    pub auto_approve_caution: bool,
    /// Classifications below this confidence raise a warning.
    pub min_confidence: f32,
    pub max_symlink_depth: usize,
    /// How many parent levels to inspect for application markers.
    pub max_app_levels: usize,
    pub extra_protected_paths: Vec<PathBuf>,
    pub extra_app_folder_names: Vec<String>,
    pub extra_protected_extensions: Vec<String>,
    pub reasoning_timeout_secs: u64,
    pub max_blocked_history: usize,
    pub large_delete_bytes: u64,
    /// Overwriting a destination more than this many times larger than the source is HIGH.
    pub overwrite_ratio: u64,
    pub max_destination_chars: usize,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            auto_approve_caution: false,
            min_confidence: 0.75,
            max_symlink_depth: 32,
            max_app_levels: 5,
            extra_protected_paths: Vec::new(),
            extra_app_folder_names: Vec::new(),
            extra_protected_extensions: Vec::new(),
            reasoning_timeout_secs: 30,
            max_blocked_history: 500,
            large_delete_bytes: 100 * 1024 * 1024,
            overwrite_ratio: 2,
            max_destination_chars: 250,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    pub dry_run: bool,
    pub max_file_size: u64,
    pub path_blacklist: Vec<PathBuf>,
    pub lock_timeout_secs: u64,
    pub undo_capacity: usize,
    pub worker_threads: usize,
    /// Overrides `<base>/Archive/YYYY/MM` when set.
    pub archive_dir: Option<PathBuf>,
    pub time_estimates: TimeEstimates,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_file_size: 100 * 1024 * 1024,
            path_blacklist: Vec::new(),
            lock_timeout_secs: 10,
            undo_capacity: 50,
            worker_threads: 4,
            archive_dir: None,
            time_estimates: TimeEstimates::default(),
        }
    }
}

/// Minutes of manual work saved per operation kind.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TimeEstimates {
    pub move_minutes: f64,
    pub rename_minutes: f64,
    pub delete_minutes: f64,
    pub archive_minutes: f64,
}

impl Default for TimeEstimates {
    fn default() -> Self {
        Self {
            move_minutes: 0.5,
            rename_minutes: 0.3,
            delete_minutes: 0.2,
            archive_minutes: 0.4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DuplicateConfig {
    pub algorithm: HashAlgorithm,
    pub min_file_size: u64,
    pub chunk_size: usize,
    pub ignore_patterns: Vec<String>,
    pub sample_depth: usize,
    pub sample_file_limit: usize,
    pub candidate_min_files: usize,
    pub candidate_top_n: usize,
    pub user_folders: Vec<String>,
    /// File name globs for temporary and leftover files.
    pub junk_patterns: Vec<String>,
    /// Files listed per directory in a structure report.
    pub report_sample_limit: usize,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::Blake3,
            min_file_size: 1024,
            chunk_size: 64 * 1024,
            ignore_patterns: vec![
                "**/.git/**".to_string(),
                "**/node_modules/**".to_string(),
                "**/*.tidyguard.lock".to_string(),
            ],
            sample_depth: 1,
            sample_file_limit: 2000,
            candidate_min_files: 1,
            candidate_top_n: 30,
            user_folders: ["Desktop", "Documents", "Downloads", "Pictures", "Videos", "Music"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            junk_patterns: DEFAULT_JUNK_PATTERNS.iter().map(|s| s.to_string()).collect(),
            report_sample_limit: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    pub batch_size: usize,
    pub default_delay_hours: f64,
    pub move_if_older_days: u32,
    pub shutdown_timeout_secs: u64,
    /// Sweeps run unattended, so items are not user-approved unless this is
    /// set. CAUTION results then pass only with `guardian.auto_approve_caution`.
    pub pre_approved: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 60,
            batch_size: 100,
            default_delay_hours: 24.0,
            move_if_older_days: 30,
            shutdown_timeout_secs: 5,
            pre_approved: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub max_connections: usize,
    pub acquire_timeout_secs: u64,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            acquire_timeout_secs: 30,
            busy_timeout_ms: 5000,
        }
    }
}

/// Layered load: built-in defaults, then `Config.toml` when present, then
/// `TIDYGUARD_*` environment variables (`__` separates nested keys).
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(
            Environment::with_prefix("TIDYGUARD")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

pub fn load_configuration_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::from(path))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

pub(crate) fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for dir in dirs {
        if result.iter().any(|kept| dir.starts_with(kept)) {
            continue;
        }
        result.retain(|kept| !kept.starts_with(&dir));
        result.push(dir);
    }

    result
}
