//! Filesystem scanning helpers for extraction passes.

use std::path::{Path, PathBuf};

use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::ExclusionConfig;
use crate::errors::DuploResult;

const LANGUAGE_BY_EXTENSION: &[(&str, &str)] = &[
    (".py", "python"),
    (".pyx", "python"),
    (".js", "javascript"),
    (".jsx", "javascript"),
    (".mjs", "javascript"),
    (".ts", "typescript"),
    (".tsx", "typescript"),
    (".java", "java"),
    (".go", "go"),
    (".rs", "rust"),
];

const DEFAULT_SENSITIVE_EXCLUDE_PATTERNS: &[&str] = &[
    ".env",
    ".env.*",
    "*.pem",
    "*.key",
    "*.p12",
    "*secret*",
    "*secrets*",
    "*credential*",
    "id_rsa",
    "id_dsa",
];

const IMPLICIT_IGNORED_DIRS: &[&str] = &[".git", ".ci-registry"];

const TEST_PATH_MARKERS: &[&str] = &[
    "tests/", "test/", "__tests__/", "fixtures/", "testdata/", "spec/",
];

pub const IGNORE_FILE_NAME: &str = ".duploignore";

/// Configured exclusions and sensitive patterns as ignore overrides. Invalid
/// globs are logged and skipped.
fn exclusion_overrides(repo_root: &Path, exclusions: &ExclusionConfig) -> Option<Override> {
    let mut builder = OverrideBuilder::new(repo_root);
    let sensitive: &[&str] = if exclusions.exclude_sensitive {
        DEFAULT_SENSITIVE_EXCLUDE_PATTERNS
    } else {
        &[]
    };
    let patterns = exclusions
        .patterns()
        .into_iter()
        .chain(sensitive.iter().map(|p| p.to_string()));
    for pattern in patterns {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            continue;
        }
        if let Err(e) = builder.add(&format!("!{}", pattern)) {
            warn!(pattern, error = %e, "skipping invalid exclusion pattern");
        }
    }
    match builder.build() {
        Ok(overrides) => Some(overrides),
        Err(e) => {
            warn!(error = %e, "exclusion patterns unusable; scanning without them");
            None
        }
    }
}

/// Walk `repo_root` and return every file that survives `.gitignore` and
/// `.duploignore` files (nested ones included), the configured exclusions,
/// and (optionally) the sensitive-file patterns.
pub fn iter_repo_files(repo_root: &Path, exclusions: &ExclusionConfig) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(repo_root);
    builder
        .hidden(false)
        .parents(false)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(true)
        .require_git(false)
        .add_custom_ignore_filename(IGNORE_FILE_NAME)
        .sort_by_file_name(|a, b| a.cmp(b));
    if let Some(overrides) = exclusion_overrides(repo_root, exclusions) {
        builder.overrides(overrides);
    }
    builder.filter_entry(|entry| {
        let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
        !(is_dir
            && entry.depth() > 0
            && IMPLICIT_IGNORED_DIRS.contains(&&*entry.file_name().to_string_lossy()))
    });

    let mut files = Vec::new();
    for result in builder.build() {
        match result {
            Ok(entry) => {
                if entry.file_type().is_some_and(|t| t.is_file()) {
                    files.push(entry.into_path());
                }
            }
            Err(e) => debug!(error = %e, "skipping unreadable entry"),
        }
    }
    files
}

pub fn detect_language(path: &str) -> Option<&'static str> {
    let ext = Path::new(path)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))?;
    LANGUAGE_BY_EXTENSION
        .iter()
        .find(|(e, _)| *e == ext.as_str())
        .map(|(_, lang)| *lang)
}

/// Heuristic: does this path belong to test or fixture code?
pub fn is_test_path(path: &str) -> bool {
    let normalized = format!("/{}", path.replace('\\', "/").to_lowercase());
    let file_name = normalized.rsplit('/').next().unwrap_or("");
    TEST_PATH_MARKERS
        .iter()
        .any(|marker| normalized.contains(&format!("/{}", marker)))
        || file_name.starts_with("test_")
        || file_name.contains("_test.")
        || file_name.contains(".test.")
        || file_name.contains(".spec.")
        || file_name.contains("conftest")
}

pub fn compute_content_hash(path: &Path) -> DuploResult<String> {
    let mut hasher = Sha256::new();
    let data = std::fs::read(path)?;
    hasher.update(&data);
    Ok(format!("{:x}", hasher.finalize()))
}
