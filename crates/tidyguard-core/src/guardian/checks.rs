//! The deterministic check layers. Each appends findings or warnings and never fails.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;

use super::path_security::{self, ResolveError};
use super::protection::ProtectionRules;
use super::types::{ThreatFinding, ThreatType};
use crate::config::GuardianConfig;
use crate::model::{Classification, OperationKind};
use crate::platform;

/// Names that belong to the OS or shell even when they sit in user folders.
const HIDDEN_SYSTEM_NAMES: &[&str] = &[
    "desktop.ini",
    "thumbs.db",
    "ntuser.dat",
    ".ds_store",
    ".localized",
    ".bashrc",
    ".bash_profile",
    ".profile",
    ".zshrc",
];

const EXECUTABLE_EXTENSIONS: &[&str] = &[
    "exe", "msi", "bat", "cmd", "ps1", "com", "scr", "sh", "app", "dll", "so", "dylib",
];

/// (source extensions, destination folder words that make no sense for them)
const SUSPICIOUS_DESTINATIONS: &[(&[&str], &[&str])] = &[
    (&["pdf", "doc", "docx", "txt"], &["pictures", "images", "photos"]),
    (&["jpg", "jpeg", "png", "gif", "bmp"], &["documents", "text"]),
    (&["exe", "msi", "app"], &["documents", "pictures"]),
    (&["mp4", "avi", "mkv"], &["documents", "pictures"]),
];

pub(crate) struct Subject<'a> {
    pub source: &'a Path,
    /// As supplied, before joining onto the base.
    pub raw_destination: &'a Path,
    pub destination: &'a Path,
    pub kind: OperationKind,
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

pub(crate) fn path_security(
    subject: &Subject<'_>,
    base: &Path,
    config: &GuardianConfig,
    findings: &mut Vec<ThreatFinding>,
) {
    if path_security::has_parent_traversal(subject.raw_destination) {
        findings.push(ThreatFinding::critical(
            ThreatType::PathTraversal,
            format!(
                "Destination contains '..' traversal: {}",
                subject.raw_destination.display()
            ),
        ));
    }
    if path_security::has_control_characters(subject.raw_destination) {
        findings.push(ThreatFinding::critical(
            ThreatType::PathTraversal,
            "Destination contains control characters",
        ));
    }

    let max_links = config.max_symlink_depth;
    match fs::symlink_metadata(subject.source) {
        Ok(meta) if meta.file_type().is_symlink() => findings.push(ThreatFinding::high(
            ThreatType::SymlinkAttack,
            format!("Source is a symbolic link: {}", subject.source.display()),
        )),
        _ => {}
    }
    match path_security::resolve_bounded(subject.source, max_links) {
        Ok(_) => {}
        Err(ResolveError::LinkDepthExceeded(n)) => findings.push(ThreatFinding::critical(
            ThreatType::SymlinkAttack,
            format!("Source path follows more than {} symbolic links", n),
        )),
        Err(e) => findings.push(ThreatFinding::critical(
            ThreatType::PathTraversal,
            format!("Cannot validate source path: {}", e),
        )),
    }

    // Deletes have no destination of their own.
    if !subject.kind.is_relocation() {
        return;
    }

    let resolved_base = match path_security::resolve_bounded(base, max_links) {
        Ok(resolved) => resolved,
        Err(e) => {
            findings.push(ThreatFinding::critical(
                ThreatType::PathTraversal,
                format!("Cannot resolve base destination {}: {}", base.display(), e),
            ));
            return;
        }
    };
    match path_security::resolve_bounded(subject.destination, max_links) {
        Ok(resolved) => {
            if !path_security::is_within(&resolved, &resolved_base) {
                findings.push(ThreatFinding::critical(
                    ThreatType::PathTraversal,
                    format!(
                        "Destination escapes base directory: {} is outside {}",
                        resolved.display(),
                        resolved_base.display()
                    ),
                ));
            }
        }
        Err(ResolveError::LinkDepthExceeded(n)) => findings.push(ThreatFinding::critical(
            ThreatType::SymlinkAttack,
            format!("Destination path follows more than {} symbolic links", n),
        )),
        Err(e) => findings.push(ThreatFinding::critical(
            ThreatType::PathTraversal,
            format!("Cannot validate destination path: {}", e),
        )),
    }
}

pub(crate) fn system_protection(
    subject: &Subject<'_>,
    rules: &ProtectionRules,
    findings: &mut Vec<ThreatFinding>,
) {
    if let Some(dir) = rules.system_directory_for(subject.source) {
        findings.push(ThreatFinding::critical(
            ThreatType::SystemFile,
            format!("File is in system directory {}", dir.display()),
        ));
    } else if rules.is_system_extension(subject.source) && rules.in_system_context(subject.source) {
        findings.push(ThreatFinding::critical(
            ThreatType::SystemFile,
            format!(
                "System file type .{} inside a system or program directory",
                extension_of(subject.source).unwrap_or_default()
            ),
        ));
    }

    if subject.kind.is_relocation() {
        if let Some(dir) = rules.system_directory_for(subject.destination) {
            findings.push(ThreatFinding::critical(
                ThreatType::PermissionEscalation,
                format!("Destination is inside system directory {}", dir.display()),
            ));
        }
    }

    let name = subject
        .source
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if HIDDEN_SYSTEM_NAMES.contains(&name.as_str()) {
        findings.push(ThreatFinding::high(
            ThreatType::HiddenSystem,
            format!("{} is a hidden system or shell file", name),
        ));
    }

    if subject.kind.is_relocation() {
        let from = extension_of(subject.source);
        let to = extension_of(subject.destination);
        let executable = |ext: &Option<String>| {
            ext.as_deref()
                .is_some_and(|e| EXECUTABLE_EXTENSIONS.contains(&e))
        };
        if from != to && (executable(&from) || executable(&to)) {
            findings.push(ThreatFinding::high(
                ThreatType::ExecutableModification,
                format!(
                    "Operation changes an executable extension ({} -> {})",
                    from.as_deref().unwrap_or("none"),
                    to.as_deref().unwrap_or("none")
                ),
            ));
        }
    }
}

pub(crate) fn application_integrity(
    subject: &Subject<'_>,
    rules: &ProtectionRules,
    findings: &mut Vec<ThreatFinding>,
) {
    let source = subject.source;
    if let Some(bundle) = rules.app_bundle_in(source) {
        findings.push(ThreatFinding::critical(
            ThreatType::AppBundle,
            format!("File is inside application bundle {}", bundle.display()),
        ));
        return;
    }

    if rules.is_in_app_install_dir(source) {
        match extension_of(source).as_deref() {
            Some("exe" | "dll" | "so" | "dylib" | "app") => {
                findings.push(ThreatFinding::critical(
                    ThreatType::ApplicationFile,
                    "Executable or library in an application directory",
                ));
                return;
            }
            Some("ini" | "cfg" | "conf" | "plist") => findings.push(ThreatFinding::high(
                ThreatType::ApplicationFile,
                "Configuration file in an application directory",
            )),
            _ => {}
        }
    }

    if let Some(name) = rules.launcher_folder_in(source) {
        findings.push(ThreatFinding::critical(
            ThreatType::ApplicationFile,
            format!("File belongs to launcher or tool folder '{}'", name),
        ));
    } else if let Some(marker) = rules.application_marker(source) {
        findings.push(ThreatFinding::critical(
            ThreatType::ApplicationFile,
            format!("File belongs to an installed application: {}", marker),
        ));
    } else if rules.is_in_app_data(source) {
        findings.push(ThreatFinding::high(
            ThreatType::ApplicationFile,
            "File lives in per-user application data",
        ));
    }

    if let Some(root) = rules.protected_path_for(source) {
        findings.push(ThreatFinding::critical(
            ThreatType::ApplicationFile,
            format!("File is under protected path {}", root.display()),
        ));
    }
}

pub(crate) fn data_loss(
    subject: &Subject<'_>,
    config: &GuardianConfig,
    findings: &mut Vec<ThreatFinding>,
) {
    let source_len = fs::metadata(subject.source).ok().filter(|m| m.is_file()).map(|m| m.len());

    if subject.kind.is_relocation() {
        if platform::path_eq(subject.source, subject.destination) || same_file(subject.source, subject.destination) {
            findings.push(ThreatFinding::medium(
                ThreatType::CircularReference,
                "Source and destination are the same file",
            ));
            return;
        }
        if let (Some(src), Ok(dest)) = (source_len, fs::metadata(subject.destination)) {
            if dest.is_file() && dest.len() > src.saturating_mul(config.overwrite_ratio) {
                findings.push(ThreatFinding::high(
                    ThreatType::DataLoss,
                    format!(
                        "Destination file is significantly larger ({} vs {} bytes); overwriting may lose data",
                        dest.len(),
                        src
                    ),
                ));
            }
        }
    } else if let Some(len) = source_len {
        if len > config.large_delete_bytes {
            findings.push(ThreatFinding::high(
                ThreatType::DataLoss,
                format!(
                    "Deleting large file ({:.1} MB); this cannot be undone",
                    len as f64 / (1024.0 * 1024.0)
                ),
            ));
        }
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

pub(crate) fn classification_sanity(
    subject: &Subject<'_>,
    classification: &Classification,
    config: &GuardianConfig,
    warnings: &mut Vec<String>,
) {
    if classification.confidence < config.min_confidence {
        warnings.push(format!(
            "Classification confidence {:.2} is below {:.2}; recommendation may be inaccurate",
            classification.confidence, config.min_confidence
        ));
    }

    if let Some(ext) = extension_of(subject.source) {
        let folders: Vec<String> = subject
            .destination
            .parent()
            .map(|p| {
                p.components()
                    .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
                    .collect()
            })
            .unwrap_or_default();
        for (extensions, wrong) in SUSPICIOUS_DESTINATIONS {
            if extensions.contains(&ext.as_str())
                && folders.iter().any(|f| wrong.contains(&f.as_str()))
            {
                warnings.push(format!(
                    ".{} file being moved to {}; verify the classification",
                    ext,
                    subject.destination.display()
                ));
                break;
            }
        }
    }

    let length = subject.destination.to_string_lossy().chars().count();
    if length > config.max_destination_chars {
        warnings.push(format!(
            "Destination path is very long ({} chars); may fail on Windows",
            length
        ));
    }
}

/// Only paths that exist are checked. Missing sources are the executor's concern.
pub(crate) fn permissions(subject: &Subject<'_>, findings: &mut Vec<ThreatFinding>) {
    if let Ok(meta) = fs::metadata(subject.source) {
        if meta.is_file() {
            if let Err(e) = fs::File::open(subject.source) {
                if e.kind() == io::ErrorKind::PermissionDenied {
                    findings.push(ThreatFinding::critical(
                        ThreatType::PermissionEscalation,
                        format!("No read permission for source {}", subject.source.display()),
                    ));
                }
            }
            if let Err(e) = OpenOptions::new().write(true).open(subject.source) {
                if e.kind() == io::ErrorKind::PermissionDenied {
                    let message =
                        format!("No write permission for source {}", subject.source.display());
                    // Read-only files are never deleted, even with approval.
                    findings.push(if subject.kind == OperationKind::Delete {
                        ThreatFinding::critical(ThreatType::PermissionEscalation, message)
                    } else {
                        ThreatFinding::high(ThreatType::PermissionEscalation, message)
                    });
                }
            }
        }
    }

    if subject.kind.is_relocation() {
        if let Some(parent) = subject.destination.parent() {
            if let Ok(meta) = fs::metadata(parent) {
                if meta.is_dir() && meta.permissions().readonly() {
                    findings.push(ThreatFinding::critical(
                        ThreatType::PermissionEscalation,
                        format!("No write permission for destination directory {}", parent.display()),
                    ));
                }
            }
        }
    }
}
