//! Static protection knowledge: system directories, application install
//! markers, launcher folders and file types that must stay where they are.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::GuardianConfig;
use crate::platform;

const LAUNCHER_FOLDERS: &[&str] = &[
    "steam",
    "steamapps",
    "steamlibrary",
    "epic games",
    "epicgames",
    "origin games",
    "gog galaxy",
    "gog games",
    "ubisoft",
    "uplay",
    "ubisoft game launcher",
    "battle.net",
    "blizzard",
    "riot games",
    "microsoft games",
    "xboxgames",
    "microsoft visual studio",
    "visual studio",
    "jetbrains",
    "pycharm",
    "intellij",
    "nodejs",
    "node_modules",
    ".git",
    ".svn",
    "site-packages",
    "__pycache__",
    ".venv",
    "venv",
];

/// Never moved out of a system or program directory.
const SYSTEM_EXTENSIONS: &[&str] = &[
    "sys", "dll", "exe", "drv", "ocx", "so", "dylib", "a", "ini", "cfg", "conf",
];

/// Parent-directory names that put a [`SYSTEM_EXTENSIONS`] file in system context.
const SYSTEM_CONTEXT_NAMES: &[&str] = &[
    "windows",
    "system32",
    "syswow64",
    "program files",
    "program files (x86)",
    "bin",
    "sbin",
    "lib",
    "lib64",
];

const PROTECTED_FILE_TYPES: &[&str] = &[
    // executables and scripts
    "exe", "dll", "sys", "ocx", "drv", "msi", "bat", "cmd", "ps1",
    // game engine archives
    "pak", "assets", "bundle", "uasset", "umap", "wad", "pk3", "bsp", "vpk", "esm", "esp", "forge",
    "jar",
    // save games
    "sav", "save", "profile", "slot",
];

const ENGINE_FOLDERS: &[&str] = &["unrealengine", "ue4", "ue5", "unity", "engine"];

/// Per-user application data locations, as lowercase component runs.
const APP_DATA_FRAGMENTS: &[&[&str]] = &[
    &["appdata", "local"],
    &["appdata", "roaming"],
    &["appdata", "locallow"],
    &[".config"],
    &[".local", "share"],
    &["library", "application support"],
];

/// Installation roots where executables and configs belong to an application.
const APP_INSTALL_FRAGMENTS: &[&[&str]] = &[
    &["program files"],
    &["program files (x86)"],
    &["programdata"],
    &["appdata", "local", "programs"],
    &["applications"],
    &["opt"],
];

const GAME_ARCHIVE_THRESHOLD: usize = 10;

/// Why a directory (or one of its ancestors) belongs to an installed application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppMarker {
    ExecutableWithLibrary(PathBuf),
    Uninstaller(PathBuf),
    EngineFolder(PathBuf),
    GameArchives(PathBuf, usize),
    LauncherFolder(String),
    AppBundle(PathBuf),
    ProtectedPath(PathBuf),
    /// Could not list the directory; treated as protected.
    Unreadable(PathBuf),
}

impl fmt::Display for AppMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppMarker::ExecutableWithLibrary(dir) => {
                write!(f, "executable and libraries installed in {}", dir.display())
            }
            AppMarker::Uninstaller(dir) => write!(f, "uninstaller present in {}", dir.display()),
            AppMarker::EngineFolder(dir) => write!(f, "game engine folder in {}", dir.display()),
            AppMarker::GameArchives(dir, n) => {
                write!(f, "{} game archives in {}", n, dir.display())
            }
            AppMarker::LauncherFolder(name) => write!(f, "inside launcher or tool folder '{}'", name),
            AppMarker::AppBundle(bundle) => write!(f, "inside application bundle {}", bundle.display()),
            AppMarker::ProtectedPath(root) => write!(f, "inside protected path {}", root.display()),
            AppMarker::Unreadable(dir) => write!(f, "cannot inspect {}", dir.display()),
        }
    }
}

fn lower_components(path: &Path) -> Vec<String> {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
        .collect()
}

fn contains_run(components: &[String], run: &[&str]) -> bool {
    !run.is_empty()
        && components
            .windows(run.len())
            .any(|window| window.iter().zip(run).all(|(c, r)| c == r))
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

#[derive(Debug, Clone)]
pub struct ProtectionRules {
    system_dirs: Vec<PathBuf>,
    protected_paths: Vec<PathBuf>,
    launcher_folders: HashSet<String>,
    protected_file_types: HashSet<String>,
    max_app_levels: usize,
}

impl ProtectionRules {
    pub fn new(config: &GuardianConfig) -> Self {
        let mut launcher_folders: HashSet<String> =
            LAUNCHER_FOLDERS.iter().map(|s| s.to_string()).collect();
        launcher_folders.extend(config.extra_app_folder_names.iter().map(|s| s.to_lowercase()));

        let mut protected_file_types: HashSet<String> =
            PROTECTED_FILE_TYPES.iter().map(|s| s.to_string()).collect();
        protected_file_types.extend(
            config
                .extra_protected_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase()),
        );

        Self {
            system_dirs: platform::system_directories(),
            protected_paths: config.extra_protected_paths.clone(),
            launcher_folders,
            protected_file_types,
            max_app_levels: config.max_app_levels,
        }
    }

    pub fn system_directories(&self) -> &[PathBuf] {
        &self.system_dirs
    }

    pub fn system_directory_for(&self, path: &Path) -> Option<&Path> {
        self.system_dirs
            .iter()
            .find(|dir| platform::path_starts_with(path, dir))
            .map(PathBuf::as_path)
    }

    pub fn protected_path_for(&self, path: &Path) -> Option<&Path> {
        self.protected_paths
            .iter()
            .find(|dir| platform::path_starts_with(path, dir))
            .map(PathBuf::as_path)
    }

    /// Launcher or tool folder name appearing anywhere in the path.
    pub fn launcher_folder_in(&self, path: &Path) -> Option<String> {
        lower_components(path)
            .into_iter()
            .find(|name| self.launcher_folders.contains(name))
    }

    pub fn app_bundle_in(&self, path: &Path) -> Option<PathBuf> {
        let mut bundle = PathBuf::new();
        for component in path.components() {
            bundle.push(component);
            if component
                .as_os_str()
                .to_string_lossy()
                .to_lowercase()
                .ends_with(".app")
            {
                return Some(bundle);
            }
        }
        None
    }

    pub fn is_system_extension(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| SYSTEM_EXTENSIONS.contains(&ext.as_str()))
    }

    /// A parent directory name marks the file as living among system binaries.
    pub fn in_system_context(&self, path: &Path) -> bool {
        path.parent()
            .map(lower_components)
            .unwrap_or_default()
            .iter()
            .any(|name| SYSTEM_CONTEXT_NAMES.contains(&name.as_str()))
    }

    pub fn is_in_app_data(&self, path: &Path) -> bool {
        let components = lower_components(path);
        APP_DATA_FRAGMENTS
            .iter()
            .any(|run| contains_run(&components, run))
    }

    pub fn is_in_app_install_dir(&self, path: &Path) -> bool {
        let components = lower_components(path);
        APP_INSTALL_FRAGMENTS
            .iter()
            .any(|run| contains_run(&components, run))
    }

    pub fn is_protected_file_type(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.protected_file_types.contains(&ext))
    }

    /// Inspect one directory's immediate entries for installation markers.
    pub fn inspect_directory(&self, dir: &Path) -> Option<AppMarker> {
        if !dir.is_dir() {
            return None;
        }
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return Some(AppMarker::Unreadable(dir.to_path_buf())),
        };

        let mut has_exe = false;
        let mut has_dll = false;
        let mut archives = 0usize;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_lowercase();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                if ENGINE_FOLDERS.contains(&name.as_str()) {
                    return Some(AppMarker::EngineFolder(dir.to_path_buf()));
                }
                continue;
            }
            if name.ends_with(".exe") {
                if name.starts_with("unins") || name.contains("uninstall") {
                    return Some(AppMarker::Uninstaller(dir.to_path_buf()));
                }
                has_exe = true;
            } else if name.ends_with(".dll") {
                has_dll = true;
            } else if name.ends_with(".pak") || name.ends_with(".assets") {
                archives += 1;
            }
        }

        if has_exe && has_dll {
            Some(AppMarker::ExecutableWithLibrary(dir.to_path_buf()))
        } else if archives > GAME_ARCHIVE_THRESHOLD {
            Some(AppMarker::GameArchives(dir.to_path_buf(), archives))
        } else {
            None
        }
    }

    /// Walk up from the file's directory at most `max_app_levels` levels looking
    /// for installation markers.
    pub fn application_marker(&self, path: &Path) -> Option<AppMarker> {
        let mut current = if path.is_dir() {
            Some(path)
        } else {
            path.parent()
        };
        let mut levels = 0;
        while let Some(dir) = current {
            if levels >= self.max_app_levels || dir.as_os_str().is_empty() {
                break;
            }
            if let Some(marker) = self.inspect_directory(dir) {
                return Some(marker);
            }
            current = dir.parent();
            levels += 1;
        }
        None
    }

    /// Every protection layer in one answer, with the reason when refused.
    pub fn is_file_safe_to_modify(&self, path: &Path) -> (bool, String) {
        if let Some(dir) = self.system_directory_for(path) {
            return (false, format!("inside system directory {}", dir.display()));
        }
        if let Some(root) = self.protected_path_for(path) {
            return (false, AppMarker::ProtectedPath(root.to_path_buf()).to_string());
        }
        if let Some(name) = self.launcher_folder_in(path) {
            return (false, AppMarker::LauncherFolder(name).to_string());
        }
        if let Some(bundle) = self.app_bundle_in(path) {
            return (false, AppMarker::AppBundle(bundle).to_string());
        }
        if self.is_protected_file_type(path) {
            let ext = extension_of(path).unwrap_or_default();
            return (false, format!("protected file type .{}", ext));
        }
        if let Some(marker) = self.application_marker(path) {
            return (false, marker.to_string());
        }
        (true, "no protection rule applies".to_string())
    }
}
