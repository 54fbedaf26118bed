//! Expert routing: batch findings by language and prepare review packages.
//!
//! Every finding is assigned the dominant language of its file pair, and
//! each language group becomes exactly one package so the reviewer sees the
//! whole batch at once. The router only prepares hand-offs; invoking an
//! expert is the caller's business.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::errors::{DuploError, DuploResult};
use crate::indexer::filesystem::detect_language;
use crate::models::Finding;

const MAX_LISTED_FILE_PAIRS: usize = 10;
const MAX_LISTED_SYMBOLS: usize = 15;
pub const UNKNOWN_LANGUAGE: &str = "unknown";

/// Majority language across `files`; ties and unrecognised extensions give
/// [`UNKNOWN_LANGUAGE`].
pub fn detect_primary_language(files: &[&str]) -> &'static str {
    let mut counts: IndexMap<&'static str, usize> = IndexMap::new();
    for file in files {
        if let Some(language) = detect_language(file) {
            *counts.entry(language).or_insert(0) += 1;
        }
    }
    let Some(best) = counts.values().copied().max() else {
        return UNKNOWN_LANGUAGE;
    };
    let mut leaders = counts.iter().filter(|(_, n)| **n == best);
    match (leaders.next(), leaders.next()) {
        (Some((language, _)), None) => language,
        _ => UNKNOWN_LANGUAGE,
    }
}

pub fn expert_for_language(language: &str) -> &'static str {
    match language {
        "python" => "python-expert",
        "javascript" | "typescript" => "typescript-expert",
        _ => "cto",
    }
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

// ---------------------------------------------------------------------------
// Packages
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpertPackage {
    /// Stable reference for this hand-off, derived from the finding ids.
    pub package_ref: String,
    pub recommended_expert: String,
    pub language: String,
    pub finding_ids: Vec<String>,
    pub total_file_pairs: usize,
    pub total_duplicates: usize,
    pub complexity_level: String,
    pub task_description: String,
    pub instructions: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingFailure {
    pub language: String,
    pub recommended_expert: String,
    pub finding_ids: Vec<String>,
    pub error: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum RoutingResult {
    #[serde(rename = "ready_for_expert_review")]
    Ready(ExpertPackage),
    #[serde(rename = "error")]
    Failed(RoutingFailure),
}

impl RoutingResult {
    pub fn language(&self) -> &str {
        match self {
            RoutingResult::Ready(p) => &p.language,
            RoutingResult::Failed(f) => &f.language,
        }
    }

    pub fn finding_ids(&self) -> &[String] {
        match self {
            RoutingResult::Ready(p) => &p.finding_ids,
            RoutingResult::Failed(f) => &f.finding_ids,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, RoutingResult::Ready(_))
    }
}

fn package_ref(language: &str, finding_ids: &[String]) -> String {
    let mut hasher = Sha256::new();
    for id in finding_ids {
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("expert-review/{}/{}", language, &digest[..12])
}

fn complexity_level(total_duplicates: usize) -> &'static str {
    if total_duplicates > 100 {
        "high"
    } else if total_duplicates > 20 {
        "medium"
    } else {
        "low"
    }
}

/// Markdown brief handed to the reviewing expert.
pub fn batch_description(language: &str, findings: &[&Finding]) -> String {
    let total_pairs = findings.len();
    let total_duplicates: usize = findings.iter().map(|f| f.duplicate_count).sum();
    let average = if total_pairs > 0 {
        total_duplicates as f64 / total_pairs as f64
    } else {
        0.0
    };

    let mut pairs: Vec<String> = findings
        .iter()
        .take(MAX_LISTED_FILE_PAIRS)
        .map(|f| {
            format!(
                "- {} ↔ {} ({} duplicates)",
                file_name(&f.file_pair.0),
                file_name(&f.file_pair.1),
                f.duplicate_count
            )
        })
        .collect();
    if total_pairs > MAX_LISTED_FILE_PAIRS {
        pairs.push(format!(
            "... and {} more file pairs",
            total_pairs - MAX_LISTED_FILE_PAIRS
        ));
    }

    let all_matches: Vec<_> = findings.iter().flat_map(|f| &f.duplicate_symbols).collect();
    let mut symbols: Vec<String> = all_matches
        .iter()
        .take(MAX_LISTED_SYMBOLS)
        .map(|m| {
            format!(
                "- {} ↔ {} (similarity: {:.2})",
                m.original.name, m.duplicate.name, m.similarity
            )
        })
        .collect();
    if all_matches.len() > MAX_LISTED_SYMBOLS {
        symbols.push(format!(
            "... and {} more",
            all_matches.len() - MAX_LISTED_SYMBOLS
        ));
    }
    if symbols.is_empty() {
        symbols.push("- Pattern analysis needed".to_string());
    }

    format!(
        "# Comprehensive Code Duplication Review and Refactoring Strategy\n\
         \n\
         This batch covers every {language} duplication finding from the current scan. \
         Review it as a whole and plan one strategy for the batch.\n\
         \n\
         ## Batch Summary\n\
         \n\
         - **Language**: {language}\n\
         - **Total File Pairs**: {total_pairs}\n\
         - **Total Duplicates Found**: {total_duplicates}\n\
         - **Average Duplicates per Pair**: {average:.1}\n\
         \n\
         ### File Pairs\n\
         {pairs}\n\
         \n\
         ### Duplicate Symbols\n\
         {symbols}\n\
         \n\
         ## Strategic Review Requirements\n\
         \n\
         1. **Pattern analysis**: find systemic duplication (missing base classes, shared utilities).\n\
         2. **Batch strategy**: decide between one cohesive refactoring and per-pair fixes, ordered by risk.\n\
         3. **Implementation planning**: sequence the changes so dependent file pairs are handled together.\n\
         4. **Action decision**: low-risk batches get an implementation plan for /todo-orchestrate; \
         high-risk or complex batches get a written analysis for human review.\n",
        pairs = pairs.join("\n"),
        symbols = symbols.join("\n"),
    )
}

// ---------------------------------------------------------------------------
// ExpertRouter
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct ExpertRouter;

impl ExpertRouter {
    pub fn new() -> Self {
        Self
    }

    /// One result per detected language, in first-seen order.
    pub fn route(&self, findings: &[Finding]) -> Vec<RoutingResult> {
        let mut groups: IndexMap<&'static str, Vec<&Finding>> = IndexMap::new();
        for finding in findings {
            let language = detect_primary_language(&finding.files());
            groups.entry(language).or_default().push(finding);
        }

        groups
            .into_iter()
            .map(|(language, group)| {
                let expert = expert_for_language(language);
                match self.build_package(language, expert, &group) {
                    Ok(package) => {
                        debug!(
                            language,
                            expert,
                            findings = group.len(),
                            package = %package.package_ref,
                            "expert package ready"
                        );
                        RoutingResult::Ready(package)
                    }
                    Err(e) => {
                        warn!(language, error = %e, "expert package could not be built");
                        RoutingResult::Failed(RoutingFailure {
                            language: language.to_string(),
                            recommended_expert: expert.to_string(),
                            finding_ids: group.iter().map(|f| f.finding_id.clone()).collect(),
                            error: e.to_string(),
                        })
                    }
                }
            })
            .collect()
    }

    fn build_package(
        &self,
        language: &str,
        expert: &str,
        findings: &[&Finding],
    ) -> DuploResult<ExpertPackage> {
        for finding in findings {
            if finding.file_pair.0.trim().is_empty() || finding.file_pair.1.trim().is_empty() {
                return Err(DuploError::DecisionInput(format!(
                    "finding {} has an empty file in its file pair",
                    finding.finding_id
                )));
            }
        }
        let finding_ids: Vec<String> = findings.iter().map(|f| f.finding_id.clone()).collect();
        let total_duplicates: usize = findings.iter().map(|f| f.duplicate_count).sum();
        Ok(ExpertPackage {
            package_ref: package_ref(language, &finding_ids),
            recommended_expert: expert.to_string(),
            language: language.to_string(),
            total_file_pairs: findings.len(),
            total_duplicates,
            complexity_level: complexity_level(total_duplicates).to_string(),
            task_description: batch_description(language, findings),
            instructions: format!(
                "These {} duplicate findings require expert review. Invoke the {} agent \
                 with the complete task description and return its refactoring recommendations.",
                findings.len(),
                expert
            ),
            finding_ids,
        })
    }
}
