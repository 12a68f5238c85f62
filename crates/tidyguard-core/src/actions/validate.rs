//! Request-shape checks applied before the filesystem or the guardian is touched.

use std::path::{Component, Path, PathBuf};

use crate::error::Error;
use crate::guardian::path_security;
use crate::model::Classification;
use crate::platform;

pub const MAX_SOURCE_PATH_CHARS: usize = 4096;
pub const MAX_SUGGESTED_PATH_CHARS: usize = 2048;
pub const MAX_NAME_CHARS: usize = 255;

const DANGEROUS_PATTERNS: &[&str] = &["..", "\0", "<", ">", ":", "\"", "|", "?", "*", "\n", "\r", "\t"];

#[cfg(windows)]
const RESERVED_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

pub fn validate_source_path(path: &Path) -> Result<(), Error> {
    let text = path.to_string_lossy();
    if text.is_empty() {
        return Err(Error::Validation("Invalid file path: must be non-empty".into()));
    }
    if text.chars().count() > MAX_SOURCE_PATH_CHARS {
        return Err(Error::Validation("File path too long".into()));
    }
    if path_security::has_control_characters(path) {
        return Err(Error::Validation("File path contains control characters".into()));
    }
    Ok(())
}

pub fn validate_classification(classification: &Classification) -> Result<(), Error> {
    if classification.category.trim().is_empty() {
        return Err(Error::Validation("Invalid classification: empty category".into()));
    }
    let confidence = classification.confidence;
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(Error::Validation(format!(
            "Invalid classification: confidence {} outside 0..1",
            confidence
        )));
    }
    if let Some(path) = &classification.suggested_path {
        validate_suggested_path(path)?;
    }
    if let Some(name) = &classification.suggested_name {
        validate_name(name)?;
    }
    Ok(())
}

/// A suggested directory must be relative, short, and free of traversal or
/// reserved characters, both as given and after percent-decoding.
pub fn validate_suggested_path(suggested: &str) -> Result<(), Error> {
    if suggested.chars().count() > MAX_SUGGESTED_PATH_CHARS {
        return Err(Error::Validation("Suggested path too long".into()));
    }
    if let Some(pattern) = dangerous_pattern(suggested) {
        return Err(Error::Validation(format!(
            "Suggested path contains dangerous pattern '{}'",
            pattern.escape_default()
        )));
    }
    if let Some(decoded) = percent_decode(suggested) {
        if let Some(pattern) = dangerous_pattern(&decoded) {
            return Err(Error::Validation(format!(
                "Decoded suggested path contains dangerous pattern '{}'",
                pattern.escape_default()
            )));
        }
    }
    if Path::new(suggested).is_absolute() || suggested.starts_with('/') || suggested.starts_with('\\') {
        return Err(Error::Validation("Absolute suggested paths are not allowed".into()));
    }
    Ok(())
}

pub fn validate_name(name: &str) -> Result<(), Error> {
    if name.trim().is_empty() {
        return Err(Error::Validation("Suggested name is empty".into()));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(Error::Validation("Suggested name too long".into()));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(Error::Validation("Suggested name must not contain path separators".into()));
    }
    if name == "." || name == ".." {
        return Err(Error::Validation(format!("Suggested name '{}' is not a file name", name)));
    }
    if let Some(pattern) = dangerous_pattern(name) {
        return Err(Error::Validation(format!(
            "Suggested name contains dangerous pattern '{}'",
            pattern.escape_default()
        )));
    }
    #[cfg(windows)]
    {
        let stem = name.split('.').next().unwrap_or(name).to_ascii_uppercase();
        if RESERVED_DEVICE_NAMES.contains(&stem.as_str()) {
            return Err(Error::Validation(format!(
                "Reserved device name '{}' is not allowed on Windows",
                name
            )));
        }
    }
    Ok(())
}

fn dangerous_pattern(text: &str) -> Option<&'static str> {
    DANGEROUS_PATTERNS
        .iter()
        .copied()
        .find(|pattern| text.contains(pattern))
}

/// `None` when the text carries no well-formed `%XX` escape.
fn percent_decode(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut changed = false;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                decoded.push(value);
                changed = true;
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    changed.then(|| String::from_utf8_lossy(&decoded).into_owned())
}

/// `base/suggested/name`, refused unless it still resolves inside `base`.
pub fn build_destination(
    base: &Path,
    source: &Path,
    suggested_path: &str,
    suggested_name: Option<&str>,
    max_links: usize,
) -> Result<PathBuf, Error> {
    validate_suggested_path(suggested_path)?;
    let relative: PathBuf = Path::new(suggested_path)
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    let file_name = match suggested_name {
        Some(name) => {
            validate_name(name)?;
            PathBuf::from(name)
        }
        None => source
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| Error::Validation("Source has no file name".into()))?,
    };
    let destination = base.join(relative).join(file_name);

    let resolved_base = path_security::resolve_bounded(base, max_links)
        .map_err(|e| Error::Validation(format!("Cannot resolve base directory: {}", e)))?;
    let resolved = path_security::resolve_bounded(&destination, max_links)
        .map_err(|e| Error::Validation(format!("Cannot resolve destination: {}", e)))?;
    if !path_security::is_within(&resolved, &resolved_base) {
        return Err(Error::Validation(format!(
            "Destination escapes base directory: {}",
            resolved.display()
        )));
    }
    Ok(destination)
}

/// The blacklist entry covering `path`, if any.
pub fn blacklisted_by<'a>(path: &Path, blacklist: &'a [PathBuf]) -> Option<&'a Path> {
    let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path_security::absolutize(path));
    blacklist
        .iter()
        .find(|entry| {
            let entry_resolved =
                std::fs::canonicalize(entry).unwrap_or_else(|_| path_security::absolutize(entry));
            platform::path_starts_with(&resolved, &entry_resolved)
                || platform::path_starts_with(path, entry)
        })
        .map(PathBuf::as_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_traversal_and_reserved_characters_rejected() {
        for bad in ["../etc", "a/../../b", "Docs/<x>", "C:/Windows", "a|b", "what?", "x*y", "..."] {
            assert!(validate_suggested_path(bad).is_err(), "{} should be rejected", bad);
        }
        assert!(validate_suggested_path("Documents/Work").is_ok());
    }

    #[test]
    fn test_percent_encoded_traversal_rejected() {
        assert!(validate_suggested_path("%2e%2e/etc").is_err());
        assert!(validate_suggested_path("Docs%3Cx").is_err());
        assert!(validate_suggested_path("100%-done").is_ok());
    }

    #[test]
    fn test_absolute_suggested_path_rejected() {
        assert!(validate_suggested_path("/etc/cron.d").is_err());
        assert!(validate_suggested_path("\\\\server\\share").is_err());
    }

    #[test]
    fn test_length_limits() {
        assert!(validate_suggested_path(&"a".repeat(MAX_SUGGESTED_PATH_CHARS + 1)).is_err());
        assert!(validate_name(&"n".repeat(MAX_NAME_CHARS + 1)).is_err());
        assert!(validate_name(&"n".repeat(MAX_NAME_CHARS)).is_ok());
        let long = PathBuf::from("/".to_string() + &"p".repeat(MAX_SOURCE_PATH_CHARS));
        assert!(validate_source_path(&long).is_err());
    }

    #[test]
    fn test_name_rules() {
        assert!(validate_name("report-final.pdf").is_ok());
        assert!(validate_name("sub/dir.pdf").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("   ").is_err());
    }

    #[test]
    fn test_classification_fields() {
        assert!(validate_classification(&Classification::new("Documents", 0.9)).is_ok());
        assert!(validate_classification(&Classification::new("", 0.9)).is_err());
        assert!(validate_classification(&Classification::new("Docs", 1.5)).is_err());
        assert!(validate_classification(&Classification::new("Docs", f32::NAN)).is_err());
        let escaping = Classification::new("Docs", 0.9).with_suggested_path("../../etc");
        assert!(validate_classification(&escaping).is_err());
    }

    #[test]
    fn test_build_destination_stays_inside_base() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("organized");
        let dest = build_destination(
            &base,
            Path::new("/inbox/report.pdf"),
            "Documents/2024",
            None,
            32,
        )
        .unwrap();
        assert_eq!(dest, base.join("Documents/2024/report.pdf"));

        let renamed = build_destination(
            &base,
            Path::new("/inbox/report.pdf"),
            "Documents",
            Some("q3-report.pdf"),
            32,
        )
        .unwrap();
        assert_eq!(renamed, base.join("Documents/q3-report.pdf"));
    }

    #[cfg(unix)]
    #[test]
    fn test_build_destination_refuses_symlinked_escape() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("organized");
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&base).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, base.join("Docs")).unwrap();

        let result = build_destination(&base, Path::new("/inbox/a.txt"), "Docs", None, 32);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_blacklist_matches_by_component() {
        let dir = tempdir().unwrap();
        let private = dir.path().join("private");
        std::fs::create_dir_all(&private).unwrap();
        let file = private.join("a.txt");
        std::fs::write(&file, b"x").unwrap();

        let blacklist = vec![private.clone()];
        assert_eq!(blacklisted_by(&file, &blacklist), Some(private.as_path()));
        let sibling = dir.path().join("private-notes.txt");
        assert!(blacklisted_by(&sibling, &blacklist).is_none());
    }
}
