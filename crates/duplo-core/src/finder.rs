//! Duplicate detection over origin-tracked symbols.
//!
//! A scan extracts every source file under the project root, collapses
//! occurrences that share an origin signature, indexes each remaining
//! definition into a [`SimilarityIndex`] and queries its nearest neighbours.
//! Meaningful cross-file matches are grouped into one [`Finding`] per file
//! pair.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::config::DuploConfig;
use crate::errors::{DuploError, DuploResult};
use crate::indexer::filesystem::{detect_language, is_test_path};
use crate::indexer::origin::SymbolResolver;
use crate::indexer::pipeline::{extract_project, extract_project_with, ProjectExtraction};
use crate::models::{Finding, MatchedSymbol, SimilarityTier, Symbol, SymbolKind, SymbolMatch};
use crate::store::similarity::{SimilarityIndex, TokenIndex};
use crate::store::symbol_store::SymbolStore;

/// Loop counters and single-letter names that match everywhere.
const GENERIC_NAMES: &[&str] = &["i", "j", "k", "x", "y", "z", "n", "m", "e", "f", "v"];
const CONSTRUCTOR_NAMES: &[&str] = &["__init__", "constructor", "new", "init"];
const CONSTRUCTOR_MIN_SIMILARITY: f64 = 0.95;
const ACCESSOR_MIN_SIMILARITY: f64 = 0.90;
const HIGH_SEVERITY_AVERAGE: f64 = 0.85;

pub type IndexFactory = Box<dyn Fn() -> Box<dyn SimilarityIndex> + Send + Sync>;
pub type ResolverFactory = Box<dyn Fn(&[Symbol]) -> Arc<dyn SymbolResolver> + Send + Sync>;

fn is_accessor(symbol: &Symbol) -> bool {
    if symbol.kind == SymbolKind::Variable {
        return true;
    }
    ["get", "set"].iter().any(|prefix| {
        symbol
            .name
            .strip_prefix(prefix)
            .and_then(|rest| rest.chars().next())
            .is_some_and(|c| c == '_' || c.is_ascii_uppercase())
    })
}

/// Whether a candidate match is worth reporting at all.
pub fn is_meaningful_match(original: &Symbol, duplicate: &Symbol, similarity: f64) -> bool {
    if original.file == duplicate.file {
        return false;
    }
    for symbol in [original, duplicate] {
        if symbol.is_import
            || symbol.in_annotation
            || matches!(symbol.kind, SymbolKind::Import | SymbolKind::Constant)
        {
            return false;
        }
        if symbol.name.chars().count() <= 1 || GENERIC_NAMES.contains(&symbol.name.as_str()) {
            return false;
        }
    }
    let constructor = [original, duplicate]
        .iter()
        .any(|s| CONSTRUCTOR_NAMES.contains(&s.name.as_str()));
    if constructor && similarity < CONSTRUCTOR_MIN_SIMILARITY {
        return false;
    }
    if (is_accessor(original) || is_accessor(duplicate)) && similarity < ACCESSOR_MIN_SIMILARITY {
        return false;
    }
    true
}

/// Collapse occurrences sharing an origin signature, keeping the definition
/// (or the first occurrence when none is marked as one).
pub fn dedupe_by_origin(symbols: &[Symbol]) -> Vec<Symbol> {
    let mut by_origin: IndexMap<&str, &Symbol> = IndexMap::new();
    for symbol in symbols {
        let replace = match by_origin.get(symbol.origin_signature.as_str()) {
            Some(kept) => !kept.is_definition && symbol.is_definition,
            None => true,
        };
        if replace {
            by_origin.insert(symbol.origin_signature.as_str(), symbol);
        }
    }
    by_origin.into_values().cloned().collect()
}

fn normalize_changed_path(root: &Path, raw: &str) -> String {
    let path = Path::new(raw.trim());
    let relative = path.strip_prefix(root).unwrap_or(path);
    let normalized = relative.to_string_lossy().replace('\\', "/");
    normalized.trim_start_matches("./").to_string()
}

pub struct DuplicateFinder {
    config: Arc<DuploConfig>,
    store: Option<SymbolStore>,
    index_factory: IndexFactory,
    resolver_factory: Option<ResolverFactory>,
}

impl DuplicateFinder {
    pub fn new(config: Arc<DuploConfig>) -> Self {
        Self {
            config,
            store: None,
            index_factory: Box::new(|| Box::new(TokenIndex::new())),
            resolver_factory: None,
        }
    }

    /// Persist every scan's symbols into `store`.
    pub fn with_store(mut self, store: SymbolStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Swap the in-process token index for another backend. Called once per
    /// scan so each scan starts from an empty index.
    pub fn with_index_factory(mut self, factory: IndexFactory) -> Self {
        self.index_factory = factory;
        self
    }

    /// Resolve origins through an external service instead of the
    /// in-process name table.
    pub fn with_resolver_factory(mut self, factory: ResolverFactory) -> Self {
        self.resolver_factory = Some(factory);
        self
    }

    pub fn store(&self) -> Option<&SymbolStore> {
        self.store.as_ref()
    }

    /// Scan the whole project and report every duplicated file pair.
    pub fn analyze_project(&self, root: &Path) -> DuploResult<Vec<Finding>> {
        let extraction = self.extract(root)?;
        let findings = self.find_duplicates(&extraction.symbols, None);
        info!(root = %root.display(), findings = findings.len(), "project analysis complete");
        Ok(findings)
    }

    /// Only symbols from `files` are queried, but against the whole-project
    /// index, so a changed file still matches untouched code.
    pub fn analyze_changed_files(&self, root: &Path, files: &[String]) -> DuploResult<Vec<Finding>> {
        let extraction = self.extract(root)?;
        let changed: HashSet<String> = files
            .iter()
            .map(|f| normalize_changed_path(root, f))
            .filter(|f| !f.is_empty())
            .collect();
        let findings = self.find_duplicates(&extraction.symbols, Some(&changed));
        info!(
            root = %root.display(),
            changed = changed.len(),
            findings = findings.len(),
            "changed-file analysis complete"
        );
        Ok(findings)
    }

    fn extract(&self, root: &Path) -> DuploResult<ProjectExtraction> {
        if !root.is_dir() {
            return Err(DuploError::InvalidRoot(root.display().to_string()));
        }
        let extraction = match &self.resolver_factory {
            Some(factory) => extract_project_with(root, &self.config, |raw| factory(raw)),
            None => extract_project(root, &self.config),
        };
        if extraction.symbols.is_empty() {
            return Err(DuploError::SymbolExtraction(format!(
                "no symbols extracted from {} ({} candidate files, {} unreadable)",
                root.display(),
                extraction.files.len(),
                extraction.errors.len()
            )));
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.persist_extraction(&extraction) {
                warn!(error = %e, "failed to persist symbols; continuing with in-memory results");
            }
        }
        Ok(extraction)
    }

    /// Index `symbols` and group meaningful neighbour pairs by file pair.
    /// When `query_files` is set only symbols from those files are queried.
    pub fn find_duplicates(
        &self,
        symbols: &[Symbol],
        query_files: Option<&HashSet<String>>,
    ) -> Vec<Finding> {
        let finder = &self.config.finder;
        let candidates: Vec<Symbol> = dedupe_by_origin(symbols)
            .into_iter()
            .filter(|s| !s.is_reference && !s.is_import && !s.in_annotation)
            .filter(|s| s.line_count() >= finder.min_body_lines && !s.body.trim().is_empty())
            .collect();

        let index = (self.index_factory)();
        let mut by_id: HashMap<String, &Symbol> = HashMap::new();
        for symbol in &candidates {
            let id = symbol.id();
            if let Err(e) = index.insert(&id, &symbol.body) {
                warn!(symbol = %symbol.name, file = %symbol.file, error = %e, "similarity insert failed");
                continue;
            }
            by_id.insert(id, symbol);
        }
        debug!(indexed = by_id.len(), "similarity index built");

        let mut seen_pairs: HashSet<(String, String)> = HashSet::new();
        let mut groups: IndexMap<(String, String), Vec<SymbolMatch>> = IndexMap::new();

        for symbol in &candidates {
            if query_files.is_some_and(|files| !files.contains(&symbol.file)) {
                continue;
            }
            let id = symbol.id();
            let hits = match index.query(&symbol.body, finder.top_k + 1, finder.min_similarity) {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(symbol = %symbol.name, file = %symbol.file, error = %e, "similarity query failed");
                    continue;
                }
            };
            for (other_id, score) in hits {
                if other_id == id {
                    continue;
                }
                let Some(other) = by_id.get(&other_id).copied() else {
                    continue;
                };
                let pair_key = if id < other_id {
                    (id.clone(), other_id.clone())
                } else {
                    (other_id.clone(), id.clone())
                };
                if seen_pairs.contains(&pair_key) || !is_meaningful_match(symbol, other, score) {
                    continue;
                }
                seen_pairs.insert(pair_key);

                let (original, duplicate) = if symbol.file <= other.file {
                    (symbol, other)
                } else {
                    (other, symbol)
                };
                groups
                    .entry((original.file.clone(), duplicate.file.clone()))
                    .or_default()
                    .push(SymbolMatch {
                        original: MatchedSymbol::from(original),
                        duplicate: MatchedSymbol::from(duplicate),
                        similarity: score,
                        tier: finder.tiers.classify(score),
                    });
            }
        }

        aggregate_findings(groups)
    }
}

fn tier_counts(matches: &[SymbolMatch]) -> Map<String, Value> {
    let mut counts = Map::new();
    for tier in [
        SimilarityTier::Exact,
        SimilarityTier::High,
        SimilarityTier::Medium,
        SimilarityTier::Low,
    ] {
        let n = matches.iter().filter(|m| m.tier == Some(tier)).count();
        let key = serde_json::to_value(tier)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        counts.insert(key, json!(n));
    }
    counts
}

fn build_evidence(file_pair: &(String, String), matches: &[SymbolMatch]) -> Map<String, Value> {
    let mut unique: IndexMap<(&str, i64), &MatchedSymbol> = IndexMap::new();
    for m in matches {
        for side in [&m.original, &m.duplicate] {
            unique.entry((side.file.as_str(), side.line)).or_insert(side);
        }
    }
    let total_lines: i64 = unique.values().map(|s| s.line_count).sum();
    let max_complexity = unique.values().map(|s| s.complexity).max().unwrap_or(1);
    let kinds: BTreeSet<&str> = unique.values().map(|s| s.kind.as_str()).collect();
    let languages: BTreeSet<&str> = [file_pair.0.as_str(), file_pair.1.as_str()]
        .iter()
        .filter_map(|f| detect_language(f))
        .collect();

    let mut evidence = Map::new();
    evidence.insert("file_pair".into(), json!([file_pair.0, file_pair.1]));
    evidence.insert("total_lines".into(), json!(total_lines));
    evidence.insert("max_complexity".into(), json!(max_complexity));
    evidence.insert("symbol_kinds".into(), json!(kinds));
    evidence.insert("languages".into(), json!(languages));
    evidence.insert("tiers".into(), Value::Object(tier_counts(matches)));
    evidence.insert(
        "test_only".into(),
        json!(is_test_path(&file_pair.0) && is_test_path(&file_pair.1)),
    );
    evidence
}

/// One finding per file pair, best first, with sequential ids.
fn aggregate_findings(groups: IndexMap<(String, String), Vec<SymbolMatch>>) -> Vec<Finding> {
    let mut findings: Vec<Finding> = groups
        .into_iter()
        .map(|(file_pair, matches)| {
            let count = matches.len();
            let average = matches.iter().map(|m| m.similarity).sum::<f64>() / count.max(1) as f64;
            Finding {
                finding_id: String::new(),
                title: format!("Multiple duplicates between {} and {}", file_pair.0, file_pair.1),
                severity: if average >= HIGH_SEVERITY_AVERAGE { "high" } else { "medium" }.to_string(),
                evidence: build_evidence(&file_pair, &matches),
                file_pair,
                duplicate_count: count,
                average_similarity: average,
                duplicate_symbols: matches,
            }
        })
        .collect();

    findings.sort_by(|a, b| {
        b.average_similarity
            .total_cmp(&a.average_similarity)
            .then_with(|| b.duplicate_count.cmp(&a.duplicate_count))
    });
    for (i, finding) in findings.iter_mut().enumerate() {
        finding.finding_id = format!("aggregated_{:03}", i + 1);
    }
    findings
}
