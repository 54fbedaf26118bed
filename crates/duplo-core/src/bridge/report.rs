//! Per-finding outcomes, the run summary, and its on-disk report.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{DuploResult, FailureStage};

pub const LATEST_REPORT_FILE: &str = "latest-analysis.json";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failure,
    /// Expert package emitted but not handed to an expert.
    ReadyForExpertReview,
}

impl OutcomeStatus {
    pub fn from_success(success: bool) -> Self {
        if success {
            OutcomeStatus::Success
        } else {
            OutcomeStatus::Failure
        }
    }
}

/// Terminal state of one finding, carrying only what that path produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FindingOutcome {
    AutomaticFix {
        finding_id: String,
        status: OutcomeStatus,
        output: String,
    },
    #[serde(rename = "github_issue")]
    HumanReview {
        finding_id: String,
        status: OutcomeStatus,
        issue_ref: Option<String>,
    },
    ExpertReview {
        finding_id: String,
        status: OutcomeStatus,
        language: String,
        agent: String,
        package_ref: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },
    Skipped {
        finding_id: String,
        reason: String,
    },
    Error {
        finding_id: String,
        stage: FailureStage,
        error: String,
    },
}

impl FindingOutcome {
    pub fn finding_id(&self) -> &str {
        match self {
            FindingOutcome::AutomaticFix { finding_id, .. }
            | FindingOutcome::HumanReview { finding_id, .. }
            | FindingOutcome::ExpertReview { finding_id, .. }
            | FindingOutcome::Skipped { finding_id, .. }
            | FindingOutcome::Error { finding_id, .. } => finding_id,
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            FindingOutcome::AutomaticFix { status, .. }
            | FindingOutcome::HumanReview { status, .. }
            | FindingOutcome::ExpertReview { status, .. } => {
                matches!(status, OutcomeStatus::Success | OutcomeStatus::ReadyForExpertReview)
            }
            FindingOutcome::Skipped { .. } | FindingOutcome::Error { .. } => false,
        }
    }

    pub fn error(finding_id: impl Into<String>, stage: FailureStage, error: impl ToString) -> Self {
        FindingOutcome::Error {
            finding_id: finding_id.into(),
            stage,
            error: error.to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCounts {
    pub automatic_fixes: usize,
    pub github_issues: usize,
    pub expert_reviews: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl ActionCounts {
    pub fn tally(outcomes: &[FindingOutcome]) -> Self {
        let mut counts = ActionCounts::default();
        for outcome in outcomes {
            match outcome {
                FindingOutcome::AutomaticFix { .. } => counts.automatic_fixes += 1,
                FindingOutcome::HumanReview { .. } => counts.github_issues += 1,
                FindingOutcome::ExpertReview { .. } => counts.expert_reviews += 1,
                FindingOutcome::Skipped { .. } => counts.skipped += 1,
                FindingOutcome::Error { .. } => counts.errors += 1,
            }
        }
        counts
    }
}

/// Result of one bridge run. `status` is always `"success"`: individual
/// findings fail inside `results`, never the run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BridgeSummary {
    pub status: String,
    pub findings_processed: usize,
    pub summary: ActionCounts,
    pub results: Vec<FindingOutcome>,
    pub agents_used: Vec<String>,
    pub successes: usize,
    pub duration_ms: u64,
    pub analyzed_at: DateTime<Utc>,
}

impl BridgeSummary {
    pub fn from_outcomes(results: Vec<FindingOutcome>, duration_ms: u64) -> Self {
        let agents: BTreeSet<&str> = results
            .iter()
            .filter_map(|r| match r {
                FindingOutcome::ExpertReview { agent, .. } => Some(agent.as_str()),
                _ => None,
            })
            .collect();
        let agents_used = agents.into_iter().map(str::to_string).collect();
        Self {
            status: "success".to_string(),
            findings_processed: results.len(),
            summary: ActionCounts::tally(&results),
            successes: results.iter().filter(|r| r.is_success()).count(),
            agents_used,
            results,
            duration_ms,
            analyzed_at: Utc::now(),
        }
    }
}

/// Write `latest-analysis.json` and a timestamped copy under `dir`.
/// Returns the path of the latest report.
pub fn save_report(dir: &Path, summary: &BridgeSummary) -> DuploResult<PathBuf> {
    fs::create_dir_all(dir)?;
    let body = serde_json::to_string_pretty(summary)?;
    let latest = dir.join(LATEST_REPORT_FILE);
    fs::write(&latest, &body)?;
    let stamped = dir.join(format!(
        "analysis_{}.json",
        summary.analyzed_at.format("%Y%m%d_%H%M%S")
    ));
    fs::write(&stamped, &body)?;
    info!(report = %latest.display(), "analysis report saved");
    Ok(latest)
}
