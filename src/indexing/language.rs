//! Language detection from file extension or file name.

use std::path::Path;

/// Infers the language tag recorded on file rows and entities.
#[derive(Debug, Default, Clone, Copy)]
pub struct LanguageDetector;

impl LanguageDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(&self, path: &Path) -> Option<String> {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name == "Dockerfile" || name.starts_with("Dockerfile.") || name == "Containerfile" {
                return Some("dockerfile".to_string());
            }
            if name == "Rakefile" || name == "Gemfile" {
                return Some("ruby".to_string());
            }
        }

        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        let language = match ext.as_str() {
            "py" | "pyi" => "python",
            "go" => "go",
            "rs" => "rust",
            "java" => "java",
            "kt" | "kts" => "kotlin",
            "ts" | "tsx" => "typescript",
            "js" | "jsx" | "mjs" | "cjs" => "javascript",
            "rb" | "rake" | "gemspec" => "ruby",
            "md" | "markdown" => "markdown",
            "html" | "htm" => "html",
            "yaml" | "yml" => "yaml",
            _ => return None,
        };
        Some(language.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_extension() {
        let detector = LanguageDetector::new();
        assert_eq!(detector.detect(Path::new("a.py")).as_deref(), Some("python"));
        assert_eq!(detector.detect(Path::new("a.RS")).as_deref(), Some("rust"));
        assert_eq!(
            detector.detect(Path::new("a.tsx")).as_deref(),
            Some("typescript")
        );
        assert_eq!(detector.detect(Path::new("a.bin")), None);
    }

    #[test]
    fn test_detect_by_file_name() {
        let detector = LanguageDetector::new();
        assert_eq!(
            detector.detect(Path::new("deploy/Dockerfile")).as_deref(),
            Some("dockerfile")
        );
        assert_eq!(
            detector.detect(Path::new("Dockerfile.dev")).as_deref(),
            Some("dockerfile")
        );
        assert_eq!(
            detector.detect(Path::new("Gemfile")).as_deref(),
            Some("ruby")
        );
    }
}
