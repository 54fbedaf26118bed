//! Decision matrix: maps a [`DuplicationContext`] to a remediation action.
//!
//! Evaluation is pure. The action comes from two coarse risk levels:
//!
//! * **complexity risk**: cyclomatic complexity, line count, dependency
//!   count and whether structural kinds (classes, methods) are involved;
//! * **blast radius**: cross-module impact, public API exposure and test
//!   coverage.
//!
//! Near-identical code with low risk on both axes is fixed automatically,
//! high risk on both axes goes to a human, everything else to an expert.
//! A weighted 0–100 risk score, confidence level, suggested approach and
//! concern list ride along for reporting.

use crate::config::DecisionConfig;
use crate::errors::DuploResult;
use crate::models::{
    ActionType, Confidence, Decision, DuplicationContext, RiskLevel, SymbolKind,
};

// ---------------------------------------------------------------------------
// Risk-score weights
// ---------------------------------------------------------------------------

const WEIGHT_CROSS_MODULE: f64 = 3.0;
const WEIGHT_PUBLIC_API: f64 = 4.0;
const WEIGHT_DEPENDENCIES: f64 = 2.5;
const WEIGHT_COVERAGE: f64 = 2.0;
const WEIGHT_COMPLEXITY: f64 = 1.5;
const WEIGHT_RECENT_CHANGE: f64 = 1.5;
const WEIGHT_SCOPE: f64 = 2.0;
const MAX_RISK_SCORE: f64 = 100.0;
const HIGH_RISK_SCORE: f64 = 60.0;

/// Contexts with no structural risk still count as moderate past this many
/// dependencies.
const LOW_RISK_MAX_DEPENDENCIES: u32 = 5;

/// Weighted risk score in `[0, 100]`.
pub fn risk_score(ctx: &DuplicationContext) -> f64 {
    let mut score = 0.0;
    if ctx.cross_module_impact {
        score += 20.0 * WEIGHT_CROSS_MODULE;
    }
    if ctx.is_public_api {
        score += 25.0 * WEIGHT_PUBLIC_API;
    }
    score += WEIGHT_DEPENDENCIES
        * match ctx.dependency_count {
            d if d > 5 => 15.0,
            d if d > 2 => 8.0,
            _ => 0.0,
        };
    score += WEIGHT_COVERAGE
        * match ctx.test_coverage_percentage {
            c if c < 50.0 => 15.0,
            c if c < 80.0 => 8.0,
            _ => 0.0,
        };
    score += WEIGHT_COMPLEXITY
        * match ctx.cyclomatic_complexity {
            c if c > 10 => 10.0,
            c if c > 5 => 5.0,
            _ => 0.0,
        };
    score += WEIGHT_RECENT_CHANGE
        * match ctx.last_modified_days_ago {
            d if d < 7 => 10.0,
            d if d < 30 => 5.0,
            _ => 0.0,
        };
    score += WEIGHT_SCOPE
        * match ctx.file_count {
            f if f > 10 => 15.0,
            f if f > 5 => 8.0,
            _ => 0.0,
        };
    score.min(MAX_RISK_SCORE)
}

pub fn confidence(ctx: &DuplicationContext) -> Confidence {
    let coverage = ctx.test_coverage_percentage;
    if ctx.similarity_score >= 0.95 {
        if coverage >= 80.0 {
            Confidence::VeryHigh
        } else if coverage >= 50.0 {
            Confidence::High
        } else {
            Confidence::Medium
        }
    } else if ctx.similarity_score >= 0.85 {
        if coverage >= 80.0 {
            Confidence::High
        } else {
            Confidence::Medium
        }
    } else {
        Confidence::Low
    }
}

/// Suggested refactoring shape for the duplicated symbols.
pub fn fix_approach(ctx: &DuplicationContext) -> &'static str {
    if ctx.symbol_types.contains(&SymbolKind::Function) {
        if ctx.file_count == 2 {
            "extract_to_shared_utility"
        } else {
            "create_common_module"
        }
    } else if ctx.symbol_types.contains(&SymbolKind::Method) {
        if ctx.cross_module_impact {
            "create_shared_mixin"
        } else {
            "extract_to_base_class"
        }
    } else if ctx.symbol_types.contains(&SymbolKind::Variable) {
        "extract_to_constants"
    } else {
        "refactor_to_shared_component"
    }
}

pub fn concerns(ctx: &DuplicationContext, score: f64) -> Vec<String> {
    let checks = [
        (ctx.is_public_api, "Breaking API changes possible"),
        (ctx.cross_module_impact, "Architectural boundaries may be violated"),
        (ctx.dependency_count > 5, "Ripple effects across multiple components"),
        (ctx.test_coverage_percentage < 50.0, "Insufficient test safety net"),
        (ctx.cyclomatic_complexity > 10, "Complex logic requires careful extraction"),
        (
            ctx.last_modified_days_ago < 7,
            "Recently modified code - may conflict with ongoing work",
        ),
        (score > HIGH_RISK_SCORE, "High overall risk - consider phased approach"),
    ];
    checks
        .iter()
        .filter(|(hit, _)| *hit)
        .map(|(_, text)| text.to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// DecisionMatrix
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct DecisionMatrix {
    config: DecisionConfig,
}

impl DecisionMatrix {
    pub fn new(config: DecisionConfig) -> Self {
        Self { config }
    }

    /// Why a context is not worth acting on, if it isn't.
    pub fn skip_reason(&self, ctx: &DuplicationContext) -> Option<&'static str> {
        if ctx.total_line_count < 5 {
            return Some("duplicate is shorter than 5 lines");
        }
        if ctx.similarity_score < 0.80 && ctx.total_line_count < 20 {
            return Some("low similarity on a small block");
        }
        let only_variables =
            !ctx.symbol_types.is_empty() && ctx.symbol_types.iter().all(|k| *k == SymbolKind::Variable);
        if only_variables && ctx.total_line_count < 10 {
            return Some("only short variable declarations");
        }
        if ctx.test_only {
            return Some("duplication confined to test or fixture code");
        }
        None
    }

    pub fn is_actionable(&self, ctx: &DuplicationContext) -> bool {
        self.skip_reason(ctx).is_none()
    }

    pub fn complexity_risk(&self, ctx: &DuplicationContext) -> RiskLevel {
        if ctx.cyclomatic_complexity >= self.config.human_review_min_complexity
            || ctx.total_line_count >= self.config.human_review_min_lines
        {
            return RiskLevel::High;
        }
        let structural = ctx.symbol_types.iter().any(SymbolKind::is_structural);
        if ctx.cyclomatic_complexity <= self.config.auto_fix_max_complexity
            && ctx.total_line_count <= self.config.auto_fix_max_lines
            && ctx.dependency_count <= LOW_RISK_MAX_DEPENDENCIES
            && !structural
        {
            RiskLevel::Low
        } else {
            RiskLevel::Moderate
        }
    }

    pub fn blast_radius(&self, ctx: &DuplicationContext) -> RiskLevel {
        if !ctx.cross_module_impact {
            RiskLevel::Low
        } else if ctx.is_public_api
            || ctx.test_coverage_percentage < self.config.low_coverage_percentage
        {
            RiskLevel::High
        } else {
            RiskLevel::Moderate
        }
    }

    /// Decide what to do with one duplication. Malformed contexts are
    /// rejected with [`crate::errors::DuploError::DecisionInput`].
    pub fn evaluate(&self, ctx: &DuplicationContext) -> DuploResult<Decision> {
        ctx.validate()?;

        let complexity_risk = self.complexity_risk(ctx);
        let blast_radius = self.blast_radius(ctx);
        let score = risk_score(ctx);
        let confidence = confidence(ctx);

        let action = if ctx.similarity_score >= self.config.auto_fix_similarity
            && complexity_risk == RiskLevel::Low
            && blast_radius == RiskLevel::Low
        {
            ActionType::AutomaticFix
        } else if blast_radius == RiskLevel::High && complexity_risk == RiskLevel::High {
            ActionType::HumanReview
        } else {
            ActionType::ExpertReview
        };

        let rationale = match action {
            ActionType::AutomaticFix => auto_fix_rationale(ctx, score, confidence),
            ActionType::HumanReview => human_review_rationale(ctx, score, confidence),
            ActionType::ExpertReview => {
                expert_review_rationale(ctx, score, confidence, complexity_risk, blast_radius)
            }
        };

        Ok(Decision {
            action,
            rationale,
            complexity_risk,
            blast_radius,
            risk_score: score,
            confidence,
            approach: fix_approach(ctx).to_string(),
            concerns: concerns(ctx, score),
        })
    }
}

fn confidence_label(confidence: Confidence) -> &'static str {
    match confidence {
        Confidence::Low => "low",
        Confidence::Medium => "medium",
        Confidence::High => "high",
        Confidence::VeryHigh => "very_high",
    }
}

fn auto_fix_rationale(ctx: &DuplicationContext, score: f64, confidence: Confidence) -> String {
    let mut parts = vec![format!(
        "Automatic fix approved: risk_score={:.1}, confidence={}.",
        score,
        confidence_label(confidence)
    )];
    if ctx.similarity_score >= 0.95 {
        parts.push("Near-identical code duplication detected.".to_string());
    }
    if ctx.test_coverage_percentage >= 80.0 {
        parts.push(format!(
            "Strong test coverage ({:.0}%) provides safety net.",
            ctx.test_coverage_percentage
        ));
    }
    parts.push("Changes isolated to single module.".to_string());
    if ctx.dependency_count <= 2 {
        parts.push("Minimal dependency impact.".to_string());
    }
    parts.join(" ")
}

fn human_review_rationale(ctx: &DuplicationContext, score: f64, confidence: Confidence) -> String {
    let mut parts = vec![format!(
        "Human review required: risk_score={:.1}, confidence={}.",
        score,
        confidence_label(confidence)
    )];
    if ctx.is_public_api {
        parts.push("PUBLIC API CHANGE - requires careful consideration.".to_string());
    }
    parts.push("Cross-module refactoring impacts system architecture.".to_string());
    if ctx.dependency_count > 5 {
        parts.push(format!(
            "High dependency count ({}) requires impact analysis.",
            ctx.dependency_count
        ));
    }
    if ctx.test_coverage_percentage < 50.0 {
        parts.push(format!(
            "Low test coverage ({:.0}%) increases risk.",
            ctx.test_coverage_percentage
        ));
    }
    if ctx.cyclomatic_complexity > 10 {
        parts.push(format!(
            "High complexity (CC={}) suggests careful refactoring needed.",
            ctx.cyclomatic_complexity
        ));
    }
    if ctx.file_count > 5 {
        parts.push(format!(
            "Large scope ({} files) requires coordinated changes.",
            ctx.file_count
        ));
    }
    parts.join(" ")
}

fn expert_review_rationale(
    ctx: &DuplicationContext,
    score: f64,
    confidence: Confidence,
    complexity_risk: RiskLevel,
    blast_radius: RiskLevel,
) -> String {
    format!(
        "Expert review recommended: risk_score={:.1}, confidence={}. \
         Similarity {:.0}% with {:?} complexity risk and {:?} blast radius \
         is not safe to apply unattended.",
        score,
        confidence_label(confidence),
        ctx.similarity_score * 100.0,
        complexity_risk,
        blast_radius
    )
}
