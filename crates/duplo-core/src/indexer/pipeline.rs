//! Extraction pipeline with Rayon-based parallelism.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::DuploConfig;
use crate::indexer::filesystem::{compute_content_hash, detect_language, iter_repo_files};
use crate::indexer::origin::{NameTableResolver, OriginTracker, SymbolResolver, TimeoutResolver};
use crate::indexer::symbols::extract_symbols;
use crate::models::Symbol;

#[derive(Clone, Debug)]
pub struct FileRecord {
    pub path: String,
    pub language: String,
    pub content_hash: String,
    pub size_bytes: i64,
}

#[derive(Debug)]
pub struct ExtractionResult {
    pub file_path: String,
    pub language: String,
    pub symbols: Vec<Symbol>,
    pub error_message: Option<String>,
}

fn extract_file_worker(repo_root: &Path, relative_path: &str, language: &str) -> ExtractionResult {
    let absolute = repo_root.join(relative_path);
    match std::fs::read_to_string(&absolute) {
        Ok(source) => ExtractionResult {
            file_path: relative_path.to_string(),
            language: language.to_string(),
            symbols: extract_symbols(&source, relative_path, language),
            error_message: None,
        },
        Err(e) => ExtractionResult {
            file_path: relative_path.to_string(),
            language: language.to_string(),
            symbols: vec![],
            error_message: Some(e.to_string()),
        },
    }
}

pub fn parallel_extract(
    repo_root: &Path,
    files: &[FileRecord],
    workers: usize,
) -> Vec<ExtractionResult> {
    if files.is_empty() {
        return vec![];
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build();

    match pool {
        Ok(pool) => pool.install(|| {
            files
                .par_iter()
                .map(|f| extract_file_worker(repo_root, &f.path, &f.language))
                .collect()
        }),
        Err(e) => {
            warn!(error = %e, "thread pool unavailable; extracting sequentially");
            files
                .iter()
                .map(|f| extract_file_worker(repo_root, &f.path, &f.language))
                .collect()
        }
    }
}

/// Scan a project for extractable files. Returns `(files_seen, records)`.
pub fn scan_repo_files(repo_root: &Path, config: &DuploConfig) -> (i64, Vec<FileRecord>) {
    let all_files = iter_repo_files(repo_root, &config.exclusions);
    let mut files_seen = 0i64;
    let mut records = Vec::new();

    for file_path in all_files {
        files_seen += 1;
        let Some(language) = detect_language(&file_path.to_string_lossy()) else {
            continue;
        };
        let rel_path = file_path
            .strip_prefix(repo_root)
            .unwrap_or(&file_path)
            .to_string_lossy()
            .replace('\\', "/");
        let content_hash = compute_content_hash(&file_path).unwrap_or_default();
        let size_bytes = file_path.metadata().map(|m| m.len() as i64).unwrap_or(0);

        records.push(FileRecord {
            path: rel_path,
            language: language.to_string(),
            content_hash,
            size_bytes,
        });
    }

    (files_seen, records)
}

/// Everything one extraction pass over a project produced.
#[derive(Debug, Default)]
pub struct ProjectExtraction {
    pub files_seen: i64,
    pub files: Vec<FileRecord>,
    /// Origin-tracked symbols for every extracted file.
    pub symbols: Vec<Symbol>,
    /// `(file, message)` for files that could not be read.
    pub errors: Vec<(String, String)>,
    pub elapsed_ms: i64,
}

/// Scan, extract in parallel, then run origin tracking against the
/// in-process name table.
pub fn extract_project(repo_root: &Path, config: &DuploConfig) -> ProjectExtraction {
    run_extraction(repo_root, config, |raw| {
        let table = NameTableResolver::from_symbols(raw);
        OriginTracker::new(&table).track_all(raw)
    })
}

/// As [`extract_project`] with an external resolution service, built from
/// the raw extracted symbols. Every lookup is bounded by
/// `finder.resolver_timeout_ms`.
pub fn extract_project_with<F>(
    repo_root: &Path,
    config: &DuploConfig,
    make_resolver: F,
) -> ProjectExtraction
where
    F: FnOnce(&[Symbol]) -> Arc<dyn SymbolResolver>,
{
    let timeout = Duration::from_millis(config.finder.resolver_timeout_ms.max(1));
    run_extraction(repo_root, config, |raw| {
        let resolver = TimeoutResolver::new(make_resolver(raw), timeout);
        OriginTracker::new(&resolver).track_all(raw)
    })
}

fn run_extraction<F>(repo_root: &Path, config: &DuploConfig, track: F) -> ProjectExtraction
where
    F: FnOnce(&[Symbol]) -> Vec<Symbol>,
{
    let started = Instant::now();
    let (files_seen, files) = scan_repo_files(repo_root, config);
    debug!(files_seen, candidates = files.len(), "scan complete");

    let results = parallel_extract(repo_root, &files, config.finder.workers);
    let mut raw = Vec::new();
    let mut errors = Vec::new();
    for result in results {
        match result.error_message {
            Some(message) => {
                warn!(file = %result.file_path, error = %message, "extraction failed");
                errors.push((result.file_path, message));
            }
            None => raw.extend(result.symbols),
        }
    }

    let symbols = track(&raw);
    let elapsed_ms = started.elapsed().as_millis() as i64;
    info!(
        files = files.len(),
        symbols = symbols.len(),
        errors = errors.len(),
        elapsed_ms,
        "extraction pass complete"
    );

    ProjectExtraction {
        files_seen,
        files,
        symbols,
        errors,
        elapsed_ms,
    }
}
