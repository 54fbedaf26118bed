//! Building a [`DuplicationContext`] from a finding.
//!
//! Everything the matrix needs is read from the finding's evidence and its
//! symbol pairs. Project metrics (coverage, churn, dependencies) come from a
//! [`MetricsProvider`]; when a metric is unavailable the context falls back
//! to values that steer toward review rather than automatic fixes.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use serde_json::Value;

use crate::errors::{DuploError, DuploResult};
use crate::indexer::filesystem::is_test_path;
use crate::indexer::symbols::to_module_name;
use crate::models::{DuplicationContext, Finding, SymbolKind};

/// Used when no coverage data exists for either file.
pub const UNKNOWN_COVERAGE: f64 = 0.0;

/// Used when file age cannot be determined; treated as recently touched.
pub const UNKNOWN_MODIFIED_DAYS: i64 = 0;

/// Best-effort per-file project metrics.
pub trait MetricsProvider: Send + Sync {
    fn coverage_percentage(&self, root: &Path, file: &str) -> Option<f64>;

    fn last_modified_days_ago(&self, root: &Path, file: &str) -> Option<i64>;

    fn dependency_count(&self, root: &Path, file: &str) -> Option<u32>;
}

/// Metrics read straight off disk: no coverage, file age from mtime,
/// dependencies from import-like lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSystemMetrics;

const IMPORT_PREFIXES: &[&str] = &["import ", "from ", "use ", "#include ", "require("];

impl MetricsProvider for FileSystemMetrics {
    fn coverage_percentage(&self, _root: &Path, _file: &str) -> Option<f64> {
        None
    }

    fn last_modified_days_ago(&self, root: &Path, file: &str) -> Option<i64> {
        let modified = fs::metadata(root.join(file)).ok()?.modified().ok()?;
        let age = SystemTime::now().duration_since(modified).ok()?;
        Some((age.as_secs() / 86_400) as i64)
    }

    fn dependency_count(&self, root: &Path, file: &str) -> Option<u32> {
        let content = fs::read_to_string(root.join(file)).ok()?;
        let count = content
            .lines()
            .map(str::trim_start)
            .filter(|line| IMPORT_PREFIXES.iter().any(|p| line.starts_with(p)))
            .count();
        Some(count as u32)
    }
}

/// Two files belong to different modules when their parent packages differ.
pub fn is_cross_module(a: &str, b: &str) -> bool {
    fn parent(path: &str) -> String {
        let module = to_module_name(path);
        match module.rsplit_once('.') {
            Some((parent, _)) => parent.to_string(),
            None => String::new(),
        }
    }
    parent(a) != parent(b)
}

/// Naming heuristic: a leading underscore marks a symbol private.
fn looks_public(name: &str) -> bool {
    let bare = name.rsplit('.').next().unwrap_or(name);
    !bare.is_empty() && !bare.starts_with('_')
}

fn evidence_i64(finding: &Finding, key: &str) -> Option<i64> {
    match finding.evidence.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        _ => None,
    }
}

fn evidence_kinds(finding: &Finding) -> BTreeSet<SymbolKind> {
    finding
        .evidence
        .get("symbol_kinds")
        .and_then(Value::as_array)
        .map(|kinds| {
            kinds
                .iter()
                .filter_map(Value::as_str)
                .filter_map(SymbolKind::parse)
                .collect()
        })
        .unwrap_or_default()
}

/// Derive the matrix input for one finding.
pub fn build_context(
    finding: &Finding,
    root: &Path,
    metrics: &dyn MetricsProvider,
) -> DuploResult<DuplicationContext> {
    if finding.duplicate_symbols.is_empty() {
        return Err(DuploError::DecisionInput(format!(
            "finding {} has no duplicate symbols",
            finding.finding_id
        )));
    }
    let [file_a, file_b] = finding.files();
    if file_a.is_empty() || file_b.is_empty() {
        return Err(DuploError::DecisionInput(format!(
            "finding {} has an empty file in its file pair",
            finding.finding_id
        )));
    }

    let sides = || {
        finding
            .duplicate_symbols
            .iter()
            .flat_map(|m| [&m.original, &m.duplicate])
    };
    let files: BTreeSet<&str> = sides()
        .map(|s| s.file.as_str())
        .chain([file_a, file_b])
        .filter(|f| !f.is_empty())
        .collect();

    let total_line_count = evidence_i64(finding, "total_lines").unwrap_or_else(|| {
        let unique: BTreeSet<(&str, i64, i64)> = sides()
            .map(|s| (s.file.as_str(), s.line, s.line_count))
            .collect();
        unique.iter().map(|(_, _, n)| n).sum()
    });
    let cyclomatic_complexity = evidence_i64(finding, "max_complexity")
        .map(|c| c.max(1) as u32)
        .unwrap_or_else(|| sides().map(|s| s.complexity).max().unwrap_or(1));

    let mut symbol_types = finding.symbol_kinds();
    symbol_types.extend(evidence_kinds(finding));

    let test_only = finding
        .evidence
        .get("test_only")
        .and_then(Value::as_bool)
        .unwrap_or_else(|| files.iter().all(|f| is_test_path(f)));

    let test_coverage_percentage = files
        .iter()
        .filter_map(|f| metrics.coverage_percentage(root, f))
        .fold(None, |acc: Option<f64>, c| Some(acc.map_or(c, |a| a.min(c))))
        .unwrap_or(UNKNOWN_COVERAGE);
    let last_modified_days_ago = files
        .iter()
        .filter_map(|f| metrics.last_modified_days_ago(root, f))
        .min()
        .unwrap_or(UNKNOWN_MODIFIED_DAYS);
    let dependency_count = files
        .iter()
        .filter_map(|f| metrics.dependency_count(root, f))
        .max()
        .unwrap_or(0);

    Ok(DuplicationContext {
        similarity_score: finding.average_similarity,
        file_count: files.len(),
        total_line_count,
        symbol_types,
        cross_module_impact: is_cross_module(file_a, file_b),
        test_coverage_percentage,
        cyclomatic_complexity,
        dependency_count,
        is_public_api: sides().any(|s| looks_public(&s.name)),
        has_documentation: false,
        last_modified_days_ago,
        test_only,
    })
}
