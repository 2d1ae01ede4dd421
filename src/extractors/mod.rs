//! Language extractors: parse one file, emit entities and references.
//!
//! Every extractor walks a syntax tree (tree-sitter for the programming
//! languages, line or document scanning for Dockerfile/Markdown/HTML/YAML)
//! and emits a uniform [`ExtractionResult`]. Extractors are pure with
//! respect to the file: they read the provided source bytes and touch no
//! shared state.

pub mod dockerfile;
pub mod go;
pub mod html;
pub mod java;
pub mod javascript;
pub mod kotlin;
pub mod markdown;
pub mod python;
pub mod ruby;
pub mod rust;
pub mod treesitter;
pub mod typescript;
pub mod yaml;

use std::path::Path;

use uuid::Uuid;

use crate::config::FilesConfig;
use crate::error::ExtractError;
use crate::model::ExtractionResult;

/// Per-file input handed to an extractor.
pub struct ExtractionContext<'a> {
    pub file_path: &'a Path,
    pub file_id: Uuid,
    pub repository_id: Uuid,
    /// Pre-read source bytes (single read, owned by the pipeline)
    pub source: &'a [u8],
}

/// Contract for language-specific extractors.
pub trait Extractor: Send {
    /// Language identifier recorded on emitted entities.
    fn language(&self) -> &'static str;

    /// Whether this extractor handles the given path (extension or filename
    /// predicate).
    fn supports(&self, path: &Path) -> bool;

    /// Extract entities and references from the file. Must emit a result
    /// even when the tree contains parse errors.
    fn extract(&mut self, ctx: &ExtractionContext<'_>) -> Result<ExtractionResult, ExtractError>;
}

/// Registry that owns one instance of every extractor and selects by path.
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn Extractor>>,
}

impl ExtractorRegistry {
    /// Build the default registry with every supported language.
    pub fn create_default(files: &FilesConfig) -> Result<Self, ExtractError> {
        Ok(Self {
            extractors: vec![
                Box::new(python::PythonExtractor::new()?),
                Box::new(go::GoExtractor::new()?),
                Box::new(rust::RustExtractor::new()?),
                Box::new(java::JavaExtractor::new()?),
                Box::new(kotlin::KotlinExtractor::new()?),
                Box::new(typescript::TypeScriptExtractor::new()?),
                Box::new(javascript::JavaScriptExtractor::new()?),
                Box::new(ruby::RubyExtractor::new()?),
                Box::new(dockerfile::DockerfileExtractor::new()),
                Box::new(markdown::MarkdownExtractor::new()),
                Box::new(html::HtmlExtractor::new()),
                Box::new(yaml::YamlExtractor::new(files.yaml_max_depth)),
            ],
        })
    }

    /// The extractor whose `supports` matches, if any.
    pub fn get_for(&mut self, path: &Path) -> Option<&mut (dyn Extractor + '_)> {
        self.extractors
            .iter_mut()
            .find(|e| e.supports(path))
            .map(|e| e.as_mut() as &mut (dyn Extractor + '_))
    }

    /// Whether any extractor supports the path.
    pub fn supports(&self, path: &Path) -> bool {
        self.extractors.iter().any(|e| e.supports(path))
    }
}

/// Case-insensitive extension check helper used by `supports`
/// implementations.
pub(crate) fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            let lower = ext.to_ascii_lowercase();
            extensions.iter().any(|e| *e == lower)
        })
}

/// File-name predicate helper (`Dockerfile`, `Rakefile`, ...).
pub(crate) fn has_file_name(path: &Path, names: &[&str]) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| names.iter().any(|c| name.eq_ignore_ascii_case(c)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_selects_by_extension() {
        let mut registry = ExtractorRegistry::create_default(&FilesConfig::default()).unwrap();
        assert_eq!(
            registry.get_for(Path::new("a.py")).unwrap().language(),
            "python"
        );
        assert_eq!(
            registry.get_for(Path::new("a.go")).unwrap().language(),
            "go"
        );
        assert_eq!(
            registry.get_for(Path::new("Dockerfile")).unwrap().language(),
            "dockerfile"
        );
        assert_eq!(
            registry.get_for(Path::new("Rakefile")).unwrap().language(),
            "ruby"
        );
        assert!(registry.get_for(Path::new("binary.bin")).is_none());
    }

    #[test]
    fn test_extension_helpers() {
        assert!(has_extension(Path::new("a.PY"), &["py"]));
        assert!(!has_extension(Path::new("a.txt"), &["py"]));
        assert!(has_file_name(Path::new("/x/Dockerfile"), &["Dockerfile"]));
    }
}
