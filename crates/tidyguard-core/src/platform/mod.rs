#[cfg(target_os = "windows")]
pub mod windows;

use std::path::{Path, PathBuf};

const UNIX_SYSTEM_DIRECTORIES: &[&str] = &[
    "/bin",
    "/sbin",
    "/boot",
    "/dev",
    "/etc",
    "/lib",
    "/lib32",
    "/lib64",
    "/proc",
    "/root",
    "/sys",
    "/usr/bin",
    "/usr/sbin",
    "/usr/lib",
    "/usr/local/bin",
    "/var/lib",
    "/var/log",
    "/System",
    "/Library",
    "/Applications",
    "/private/etc",
    "/private/var/db",
];

const WINDOWS_SYSTEM_DIRECTORIES: &[&str] = &[
    "C:\\Windows",
    "C:\\Program Files",
    "C:\\Program Files (x86)",
    "C:\\ProgramData",
    "C:\\$Recycle.Bin",
    "C:\\System Volume Information",
    "C:\\Recovery",
    "C:\\Boot",
];

/// Directories that must never be the source or target of a file operation.
pub fn system_directories() -> Vec<PathBuf> {
    let list = if cfg!(target_os = "windows") {
        WINDOWS_SYSTEM_DIRECTORIES
    } else {
        UNIX_SYSTEM_DIRECTORIES
    };
    list.iter().map(PathBuf::from).collect()
}

/// Component-wise prefix test. Case-insensitive on Windows.
pub fn path_starts_with(path: &Path, prefix: &Path) -> bool {
    if cfg!(target_os = "windows") {
        let lower = |p: &Path| -> Vec<String> {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
                .collect()
        };
        let (path, prefix) = (lower(path), lower(prefix));
        path.len() >= prefix.len() && path[..prefix.len()] == prefix[..]
    } else {
        path.starts_with(prefix)
    }
}

pub fn path_eq(a: &Path, b: &Path) -> bool {
    if cfg!(target_os = "windows") {
        a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
    } else {
        a == b
    }
}

/// Mounted volumes worth scanning: drive roots on Windows, `/` plus removable
/// and network mounts elsewhere.
#[cfg(target_os = "windows")]
pub fn volume_roots() -> Vec<PathBuf> {
    windows::drive_roots()
}

#[cfg(not(target_os = "windows"))]
pub fn volume_roots() -> Vec<PathBuf> {
    let mut roots = vec![PathBuf::from("/")];
    for mount_parent in ["/Volumes", "/mnt", "/media"] {
        let Ok(entries) = std::fs::read_dir(mount_parent) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            // /media/<user>/<volume>
            if mount_parent == "/media" {
                if let Ok(nested) = std::fs::read_dir(&path) {
                    roots.extend(nested.flatten().map(|e| e.path()).filter(|p| p.is_dir()));
                }
            } else {
                roots.push(path);
            }
        }
    }
    roots.sort();
    roots.dedup();
    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_directories_not_empty() {
        assert!(!system_directories().is_empty());
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_path_starts_with_is_component_wise() {
        assert!(path_starts_with(Path::new("/etc/passwd"), Path::new("/etc")));
        assert!(!path_starts_with(Path::new("/etcetera/x"), Path::new("/etc")));
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_volume_roots_include_filesystem_root() {
        assert!(volume_roots().contains(&PathBuf::from("/")));
    }
}
