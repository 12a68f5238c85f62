use std::path::Path;
use tidyguard_core::{Classification, ClassificationMethod, Classifier, Error};

/// Extension lookup; lowercase extensions only.
const RULES: &[(&str, &[&str])] = &[
    ("Documents", &["pdf", "doc", "docx", "odt", "rtf", "txt", "md", "xls", "xlsx", "csv", "ppt", "pptx"]),
    ("Pictures", &["jpg", "jpeg", "png", "gif", "bmp", "webp", "heic", "tiff", "svg"]),
    ("Music", &["mp3", "flac", "wav", "ogg", "m4a", "aac"]),
    ("Videos", &["mp4", "mkv", "mov", "avi", "webm", "wmv"]),
    ("Archives", &["zip", "tar", "gz", "7z", "rar", "xz", "bz2"]),
];

/// Files a path by its extension. Unknown extensions get no suggestion, so the
/// sweep records them as errors instead of guessing.
pub struct RuleClassifier;

impl Classifier for RuleClassifier {
    fn name(&self) -> &str {
        "rules"
    }

    fn classify(&self, path: &Path) -> Result<Classification, Error> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .ok_or_else(|| Error::Classifier(format!("{} has no extension", path.display())))?;

        let category = RULES
            .iter()
            .find(|(_, extensions)| extensions.contains(&extension.as_str()))
            .map(|(category, _)| *category);

        Ok(match category {
            Some(category) => Classification::new(category, 0.9)
                .with_suggested_path(category)
                .with_reasoning(format!("extension .{}", extension))
                .with_method(ClassificationMethod::Rule),
            None => Classification::new("Unsorted", 0.0)
                .with_reasoning(format!("no rule for .{}", extension)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_extension_suggests_category_folder() {
        let c = RuleClassifier.classify(Path::new("/inbox/Holiday.JPG")).unwrap();
        assert_eq!(c.category, "Pictures");
        assert_eq!(c.suggested_path.as_deref(), Some("Pictures"));
        assert!(!c.is_ai_suggested());
    }

    #[test]
    fn test_unknown_extension_has_no_suggestion() {
        let c = RuleClassifier.classify(Path::new("/inbox/data.xyz")).unwrap();
        assert!(c.suggested_path.is_none());
        assert!(c.suggested_name.is_none());
    }

    #[test]
    fn test_missing_extension_is_an_error() {
        assert!(RuleClassifier.classify(Path::new("/inbox/Makefile")).is_err());
    }
}
