//! Path resolution that never follows more than a bounded number of symlinks.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("more than {0} symbolic links while resolving path")]
    LinkDepthExceeded(usize),
    #[error("failed to inspect {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

enum Part {
    Prefix(OsString),
    RootDir(OsString),
    Parent,
    Normal(OsString),
}

fn parts_of(path: &Path) -> VecDeque<Part> {
    path.components()
        .filter_map(|component| match component {
            Component::Prefix(_) => Some(Part::Prefix(component.as_os_str().to_os_string())),
            Component::RootDir => Some(Part::RootDir(component.as_os_str().to_os_string())),
            Component::CurDir => None,
            Component::ParentDir => Some(Part::Parent),
            Component::Normal(name) => Some(Part::Normal(name.to_os_string())),
        })
        .collect()
}

/// Make `path` absolute against the current directory without touching the filesystem.
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Resolve `path` component by component, substituting symlinks as they are met.
///
/// Components that do not exist yet are appended lexically, so destinations
/// that are about to be created still resolve. Fails once more than
/// `max_links` symlinks have been substituted.
pub fn resolve_bounded(path: &Path, max_links: usize) -> Result<PathBuf, ResolveError> {
    let mut pending = parts_of(&absolutize(path));
    let mut resolved = PathBuf::new();
    let mut hops = 0usize;
    let mut missing = false;

    while let Some(part) = pending.pop_front() {
        match part {
            Part::Prefix(prefix) => resolved = PathBuf::from(prefix),
            Part::RootDir(root) => {
                // Keep the drive prefix, drop everything after it.
                let prefix = resolved
                    .components()
                    .next()
                    .filter(|c| matches!(c, Component::Prefix(_)))
                    .map(|c| c.as_os_str().to_os_string());
                resolved = prefix.map(PathBuf::from).unwrap_or_default();
                resolved.push(root);
            }
            Part::Parent => {
                resolved.pop();
            }
            Part::Normal(name) => {
                let candidate = resolved.join(&name);
                if missing {
                    resolved = candidate;
                    continue;
                }
                match fs::symlink_metadata(&candidate) {
                    Ok(meta) if meta.file_type().is_symlink() => {
                        hops += 1;
                        if hops > max_links {
                            return Err(ResolveError::LinkDepthExceeded(max_links));
                        }
                        let target = fs::read_link(&candidate).map_err(|source| ResolveError::Io {
                            path: candidate.clone(),
                            source,
                        })?;
                        let mut substituted = parts_of(&target);
                        if target.is_absolute() {
                            resolved = PathBuf::new();
                        }
                        substituted.extend(pending.drain(..));
                        pending = substituted;
                    }
                    Ok(_) => resolved = candidate,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        missing = true;
                        resolved = candidate;
                    }
                    Err(source) => {
                        return Err(ResolveError::Io {
                            path: candidate,
                            source,
                        })
                    }
                }
            }
        }
    }

    Ok(resolved)
}

/// Lexical containment after both sides are resolved.
pub fn is_within(path: &Path, base: &Path) -> bool {
    crate::platform::path_starts_with(path, base)
}

/// True when the raw path carries a `..` component.
pub fn has_parent_traversal(path: &Path) -> bool {
    path.components().any(|c| matches!(c, Component::ParentDir))
}

pub fn has_control_characters(path: &Path) -> bool {
    path.to_string_lossy().chars().any(|c| c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_components_resolve_lexically() {
        let dir = tempdir().unwrap();
        let base = resolve_bounded(dir.path(), 8).unwrap();
        let target = resolve_bounded(&dir.path().join("not/yet/created.txt"), 8).unwrap();
        assert_eq!(target, base.join("not/yet/created.txt"));
    }

    #[test]
    fn test_parent_components_collapse() {
        let dir = tempdir().unwrap();
        let base = resolve_bounded(dir.path(), 8).unwrap();
        let escaped = resolve_bounded(&dir.path().join("a/../../outside"), 8).unwrap();
        assert!(!is_within(&escaped, &base));
        assert!(has_parent_traversal(Path::new("a/../../outside")));
        assert!(!has_parent_traversal(Path::new("report..final.pdf")));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_visible_after_resolution() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let base = dir.path().join("base");
        fs::create_dir(&base).unwrap();
        std::os::unix::fs::symlink(outside.path(), base.join("escape")).unwrap();

        let resolved_base = resolve_bounded(&base, 8).unwrap();
        let resolved = resolve_bounded(&base.join("escape/file.txt"), 8).unwrap();
        assert!(!is_within(&resolved, &resolved_base));
        assert!(is_within(
            &resolved,
            &resolve_bounded(outside.path(), 8).unwrap()
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_is_bounded() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::os::unix::fs::symlink(&b, &a).unwrap();
        std::os::unix::fs::symlink(&a, &b).unwrap();

        match resolve_bounded(&a.join("file"), 16) {
            Err(ResolveError::LinkDepthExceeded(16)) => {}
            other => panic!("expected link depth error, got {:?}", other),
        }
    }

    #[test]
    fn test_control_characters_detected() {
        assert!(has_control_characters(Path::new("/data/evil\u{0007}.txt")));
        assert!(!has_control_characters(Path::new("/data/fine.txt")));
    }
}
