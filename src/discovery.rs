//! File discovery: repository walking, checksums, path normalization.

use std::io::Read;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;
use sha2::{Digest, Sha256};

use crate::config::FilesConfig;

/// Walks a repository root honoring gitignore rules and configured
/// include/exclude patterns.
pub struct RepositoryScanner {
    root: PathBuf,
    files: FilesConfig,
}

impl RepositoryScanner {
    pub fn new(root: impl Into<PathBuf>, files: FilesConfig) -> Self {
        Self {
            root: root.into(),
            files,
        }
    }

    /// Iterate all indexable files under the root.
    pub fn iter_files(&self) -> impl Iterator<Item = PathBuf> + '_ {
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .follow_links(false)
            .max_depth(self.files.max_depth)
            .require_git(false);

        let mut override_builder = OverrideBuilder::new(&self.root);
        for pattern in &self.files.include_patterns {
            if let Err(e) = override_builder.add(pattern) {
                tracing::warn!("invalid include pattern '{pattern}': {e}");
            }
        }
        for pattern in &self.files.exclude_patterns {
            // Leading ! marks an exclusion in override globs
            if let Err(e) = override_builder.add(&format!("!{pattern}")) {
                tracing::warn!("invalid exclude pattern '{pattern}': {e}");
            }
        }
        if let Ok(overrides) = override_builder.build() {
            builder.overrides(overrides);
        }

        builder
            .build()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .map(|entry| entry.into_path())
    }

    /// Whether a single path would be excluded by the configured patterns.
    /// Used by the event router to drop events for ignored paths.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let mut override_builder = OverrideBuilder::new(&self.root);
        for pattern in &self.files.exclude_patterns {
            let _ = override_builder.add(&format!("!{pattern}"));
        }
        match override_builder.build() {
            Ok(overrides) => overrides.matched(path, false).is_ignore(),
            Err(_) => false,
        }
    }
}

/// Converts absolute paths to repo-relative, POSIX-normalized form.
pub struct PathNormalizer {
    root: PathBuf,
}

impl PathNormalizer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Repo-relative path with forward slashes. Paths outside the root are
    /// returned as given (normalized).
    pub fn to_repo_relative(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let mut out = String::new();
        for component in relative.components() {
            if !out.is_empty() {
                out.push('/');
            }
            out.push_str(&component.as_os_str().to_string_lossy());
        }
        out
    }

    /// Rebuild the absolute path for a stored repo-relative path.
    pub fn to_absolute(&self, repo_relative: &str) -> PathBuf {
        self.root.join(repo_relative)
    }
}

/// SHA-256 checksum of a file's contents, hex-encoded.
pub fn compute_file_checksum(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
