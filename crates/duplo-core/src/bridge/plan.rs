//! Markdown handed to the refactor agent and the issue tracker.

use std::fmt::Write as _;

use crate::models::{Decision, DuplicationContext, Finding};

/// Cap on symbol pairs listed in a plan or issue body.
const MAX_LISTED_PAIRS: usize = 10;

fn file_list(finding: &Finding) -> String {
    let [a, b] = finding.files();
    let files: Vec<&str> = if a == b { vec![a] } else { vec![a, b] };
    if files.iter().all(|f| f.is_empty()) {
        return "- Files will be identified during analysis\n".to_string();
    }
    files.iter().map(|f| format!("- {}\n", f)).collect()
}

fn symbol_pairs(finding: &Finding) -> String {
    let mut out = String::new();
    for m in finding.duplicate_symbols.iter().take(MAX_LISTED_PAIRS) {
        let _ = writeln!(
            out,
            "- `{}` ({}:{}) ↔ `{}` ({}:{}), similarity {:.0}%",
            m.original.name,
            m.original.file,
            m.original.line,
            m.duplicate.name,
            m.duplicate.file,
            m.duplicate.line,
            m.similarity * 100.0
        );
    }
    let hidden = finding.duplicate_symbols.len().saturating_sub(MAX_LISTED_PAIRS);
    if hidden > 0 {
        let _ = writeln!(out, "- ... and {} more", hidden);
    }
    out
}

fn priority(ctx: &DuplicationContext) -> &'static str {
    if ctx.similarity_score > 0.8 {
        "High"
    } else {
        "Medium"
    }
}

/// Phased implementation plan for an automatic fix.
pub fn implementation_plan(finding: &Finding, ctx: &DuplicationContext, decision: &Decision) -> String {
    let mut plan = String::new();
    let _ = write!(
        plan,
        "# Code Duplication Refactoring Plan\n\n\
         ## Overview\n\
         **Finding**: {title}\n\
         **Finding ID**: {id}\n\
         **Similarity Score**: {similarity:.0}%\n\
         **Files Affected**: {files}\n\
         **Duplicated Symbols**: {count}\n\
         **Priority**: {priority}\n\
         **Suggested Approach**: {approach}\n\n\
         {rationale}\n\n\
         ### Duplicated Symbols\n{pairs}\n",
        title = finding.title,
        id = finding.finding_id,
        similarity = ctx.similarity_score * 100.0,
        files = ctx.file_count,
        count = finding.duplicate_count,
        priority = priority(ctx),
        approach = decision.approach,
        rationale = decision.rationale,
        pairs = symbol_pairs(finding),
    );
    plan.push_str(
        "## Implementation Tasks\n\n\
         ### Phase 1: Analysis\n\
         - [ ] Locate every instance of the duplicated code\n\
         - [ ] Review callers and dependencies of each instance\n\
         - [ ] Confirm the refactoring approach\n\n\
         ### Phase 2: Refactoring\n\
         - [ ] Create the shared implementation\n\
         - [ ] Point every affected file at the shared implementation\n\
         - [ ] Keep parameters and return values consistent\n\n\
         ### Phase 3: Validation\n\
         - [ ] Run the existing test suite\n\
         - [ ] Add tests for the shared implementation where missing\n\
         - [ ] Verify behaviour is unchanged\n\n",
    );
    let _ = write!(plan, "## Files to Review\n{}\n", file_list(finding));
    plan.push_str(
        "## Acceptance Criteria\n\
         - [ ] Duplicated code consolidated into one implementation\n\
         - [ ] No functional change to existing behaviour\n\
         - [ ] All tests passing\n\
         - [ ] Quality gates satisfied\n\n\
         ## Quality Gates\n\
         - All existing tests must pass\n\
         - No lint errors\n\
         - Coverage maintained or improved\n",
    );
    plan
}

pub fn issue_title(finding: &Finding) -> String {
    let title = if finding.title.is_empty() {
        "Duplicate Code Detected"
    } else {
        finding.title.as_str()
    };
    format!("Code Duplication Review: {}", title)
}

/// Body for a human-review issue, listing why the change was escalated.
pub fn issue_body(finding: &Finding, ctx: &DuplicationContext, decision: &Decision) -> String {
    let mut body = String::new();
    let _ = write!(
        body,
        "## Code Duplication Detected\n\n\
         **Similarity Score**: {similarity:.0}%\n\
         **Severity**: {severity}\n\
         **Files Affected**: {files}\n\
         **Risk Score**: {risk:.0}/100\n\n\
         ### Evidence\n{pairs}\n\
         ### Files Involved\n{file_list}\n\
         ### Why Manual Review\n{rationale}\n\n",
        similarity = ctx.similarity_score * 100.0,
        severity = finding.severity.to_uppercase(),
        files = ctx.file_count,
        risk = decision.risk_score,
        pairs = symbol_pairs(finding),
        file_list = file_list(finding),
        rationale = decision.rationale,
    );
    if !decision.concerns.is_empty() {
        body.push_str("### Concerns\n");
        for concern in &decision.concerns {
            let _ = writeln!(body, "- {}", concern);
        }
        body.push('\n');
    }
    body.push_str(
        "### Next Steps\n\
         1. Review the duplicated code\n\
         2. Decide whether consolidation is appropriate\n\
         3. If consolidating, write an implementation plan\n\
         4. Test thoroughly given the risk factors above\n",
    );
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionMatrix;
    use crate::models::{MatchedSymbol, SimilarityTier, SymbolKind, SymbolMatch};
    use serde_json::Map;

    fn make_side(name: &str, file: &str, line: i64) -> MatchedSymbol {
        MatchedSymbol {
            name: name.to_string(),
            file: file.to_string(),
            kind: SymbolKind::Function,
            line,
            line_count: 12,
            complexity: 2,
            origin_signature: format!("{}::{}::function", file, line),
        }
    }

    fn make_finding(pairs: usize) -> Finding {
        let duplicate_symbols = (0..pairs)
            .map(|i| SymbolMatch {
                original: make_side(&format!("load_{}", i), "src/a.py", 10 + i as i64),
                duplicate: make_side(&format!("fetch_{}", i), "src/b.py", 20 + i as i64),
                similarity: 0.95,
                tier: Some(SimilarityTier::High),
            })
            .collect();
        Finding {
            finding_id: "aggregated_001".to_string(),
            title: "Multiple duplicates between src/a.py and src/b.py".to_string(),
            severity: "high".to_string(),
            file_pair: ("src/a.py".to_string(), "src/b.py".to_string()),
            duplicate_symbols,
            duplicate_count: pairs,
            average_similarity: 0.95,
            evidence: Map::new(),
        }
    }

    fn make_context() -> DuplicationContext {
        DuplicationContext {
            similarity_score: 0.95,
            total_line_count: 30,
            test_coverage_percentage: 85.0,
            cyclomatic_complexity: 3,
            ..DuplicationContext::default()
        }
    }

    #[test]
    fn test_plan_has_every_section() {
        let ctx = make_context();
        let decision = DecisionMatrix::default().evaluate(&ctx).unwrap();
        let plan = implementation_plan(&make_finding(2), &ctx, &decision);
        for section in [
            "## Overview",
            "### Phase 1: Analysis",
            "### Phase 2: Refactoring",
            "### Phase 3: Validation",
            "## Files to Review",
            "## Acceptance Criteria",
            "## Quality Gates",
        ] {
            assert!(plan.contains(section), "missing {section}");
        }
        assert!(plan.contains("**Similarity Score**: 95%"));
        assert!(plan.contains("- src/a.py\n- src/b.py\n"));
        assert!(plan.contains("`load_0` (src/a.py:10) ↔ `fetch_0` (src/b.py:20)"));
    }

    #[test]
    fn test_symbol_list_is_capped() {
        let listed = symbol_pairs(&make_finding(13));
        assert_eq!(listed.lines().count(), MAX_LISTED_PAIRS + 1);
        assert!(listed.ends_with("- ... and 3 more\n"));
    }

    #[test]
    fn test_issue_carries_concerns() {
        let ctx = DuplicationContext {
            similarity_score: 0.8,
            file_count: 3,
            total_line_count: 150,
            cross_module_impact: true,
            test_coverage_percentage: 45.0,
            cyclomatic_complexity: 12,
            dependency_count: 8,
            is_public_api: true,
            ..DuplicationContext::default()
        };
        let decision = DecisionMatrix::default().evaluate(&ctx).unwrap();
        let body = issue_body(&make_finding(1), &ctx, &decision);
        assert!(body.contains("**Severity**: HIGH"));
        assert!(body.contains("### Concerns\n- "));
        assert_eq!(
            issue_title(&make_finding(1)),
            "Code Duplication Review: Multiple duplicates between src/a.py and src/b.py"
        );
    }
}
