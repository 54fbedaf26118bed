//! End-to-end driver: scan, decide, actuate, route, summarize.
//!
//! Each finding walks `New -> ContextBuilt -> Decided -> {ActuatingFix |
//! FilingIssue | BatchingForExpert} -> {Success | Error}`. Failures are
//! captured per finding; only an unusable project root, an extraction that
//! produced nothing, or (in strict mode) a misconfigured actuator end a run.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::bridge::actuator::{
    ExpertInvoker, GhIssueTracker, GitVersionControl, IssueTracker, ProcessExpertInvoker,
    ProcessRefactorActuator, RefactorActuator, VersionControl,
};
use crate::bridge::context::{build_context, FileSystemMetrics, MetricsProvider};
use crate::bridge::plan::{implementation_plan, issue_body, issue_title};
use crate::bridge::report::{save_report, BridgeSummary, FindingOutcome, OutcomeStatus};
use crate::config::DuploConfig;
use crate::decision::DecisionMatrix;
use crate::errors::{ActuatorError, DuploError, DuploResult, FailureStage};
use crate::finder::DuplicateFinder;
use crate::memory::MemoryManager;
use crate::models::{ActionType, Finding};
use crate::router::{ExpertRouter, RoutingResult};
use crate::store::symbol_store::SymbolStore;

/// Working directory under the project root for the store and reports.
pub const REGISTRY_DIR: &str = ".ci-registry";
pub const SYMBOL_DB_FILE: &str = "symbols.db";

// ---------------------------------------------------------------------------
// Finding state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindingState {
    New,
    ContextBuilt,
    Decided,
    ActuatingFix,
    FilingIssue,
    BatchingForExpert,
    Skipped,
    Success,
    Error,
}

impl FindingState {
    pub fn can_advance_to(self, next: FindingState) -> bool {
        use FindingState::*;
        matches!(
            (self, next),
            (New, ContextBuilt)
                | (ContextBuilt, Decided)
                | (ContextBuilt | Decided, Skipped)
                | (Decided, ActuatingFix | FilingIssue | BatchingForExpert)
                | (ActuatingFix | FilingIssue | BatchingForExpert, Success)
                | (New | ContextBuilt | Decided | ActuatingFix | FilingIssue | BatchingForExpert, Error)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, FindingState::Skipped | FindingState::Success | FindingState::Error)
    }
}

impl fmt::Display for FindingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FindingState::New => "new",
            FindingState::ContextBuilt => "context_built",
            FindingState::Decided => "decided",
            FindingState::ActuatingFix => "actuating_fix",
            FindingState::FilingIssue => "filing_issue",
            FindingState::BatchingForExpert => "batching_for_expert",
            FindingState::Skipped => "skipped",
            FindingState::Success => "success",
            FindingState::Error => "error",
        };
        f.write_str(label)
    }
}

struct Progress<'a> {
    finding_id: &'a str,
    state: FindingState,
}

impl<'a> Progress<'a> {
    fn new(finding_id: &'a str) -> Self {
        Self {
            finding_id,
            state: FindingState::New,
        }
    }

    fn advance(&mut self, next: FindingState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!(finding_id = self.finding_id, from = %self.state, to = %next, "finding state");
        self.state = next;
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// The external capabilities a bridge drives.
#[derive(Clone)]
pub struct Actuators {
    pub refactor: Arc<dyn RefactorActuator>,
    pub issues: Arc<dyn IssueTracker>,
    pub vcs: Arc<dyn VersionControl>,
    pub experts: Arc<dyn ExpertInvoker>,
}

impl Actuators {
    /// Process-backed actuators (`claude`, `gh`, `git`).
    pub fn from_config(config: &DuploConfig) -> Self {
        Self {
            refactor: Arc::new(ProcessRefactorActuator::from_config(&config.bridge)),
            issues: Arc::new(GhIssueTracker::from_config(&config.bridge)),
            vcs: Arc::new(GitVersionControl::from_config(&config.bridge)),
            experts: Arc::new(ProcessExpertInvoker::from_config(&config.bridge)),
        }
    }
}

/// A finding as it enters the pipeline; raw input may already be unusable.
enum Intake {
    Ready(Finding),
    Rejected { finding_id: String, error: String },
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

pub struct OrchestrationBridge {
    root: PathBuf,
    config: Arc<DuploConfig>,
    finder: DuplicateFinder,
    matrix: DecisionMatrix,
    router: ExpertRouter,
    memory: MemoryManager,
    metrics: Box<dyn MetricsProvider>,
    actuators: Actuators,
}

impl OrchestrationBridge {
    /// Bridge over `root` with process-backed actuators and a SQLite symbol
    /// store under `.ci-registry/`. Starts memory sampling.
    pub fn new(root: impl Into<PathBuf>, config: DuploConfig) -> DuploResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(DuploError::InvalidRoot(root.display().to_string()));
        }
        config.validate()?;
        let config = Arc::new(config);

        let mut finder = DuplicateFinder::new(Arc::clone(&config));
        let db_path = root.join(REGISTRY_DIR).join(SYMBOL_DB_FILE);
        match SymbolStore::open(&db_path) {
            Ok(store) => finder = finder.with_store(store),
            Err(e) => warn!(db = %db_path.display(), error = %e, "symbol store unavailable"),
        }

        let memory = MemoryManager::new(config.memory.clone());
        if let Err(e) = memory.start_monitoring() {
            warn!(error = %e, "memory monitoring could not start");
        }

        Ok(Self {
            matrix: DecisionMatrix::new(config.decision.clone()),
            router: ExpertRouter::new(),
            metrics: Box::new(FileSystemMetrics),
            actuators: Actuators::from_config(&config),
            root,
            config,
            finder,
            memory,
        })
    }

    /// Load `duplo.toml` (plus environment overrides) from `root`.
    pub fn from_project(root: impl Into<PathBuf>) -> DuploResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(DuploError::InvalidRoot(root.display().to_string()));
        }
        let config = DuploConfig::load(&root)?;
        Self::new(root, config)
    }

    pub fn with_actuators(mut self, actuators: Actuators) -> Self {
        self.actuators = actuators;
        self
    }

    pub fn with_metrics(mut self, metrics: Box<dyn MetricsProvider>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_memory_manager(mut self, memory: MemoryManager) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_finder(mut self, finder: DuplicateFinder) -> Self {
        self.finder = finder;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    /// Scan the project (or only `changed_files` against it) and act on
    /// every finding.
    pub fn process(&self, changed_files: Option<&[String]>) -> DuploResult<BridgeSummary> {
        let started = Instant::now();
        let findings = {
            let _op = self.memory.monitor_operation("duplicate analysis");
            match changed_files {
                Some(files) => self.finder.analyze_changed_files(&self.root, files)?,
                None => self.finder.analyze_project(&self.root)?,
            }
        };
        info!(findings = findings.len(), "processing findings");
        let intake = findings.into_iter().map(Intake::Ready).collect();
        self.finish(intake, started)
    }

    /// Resolve changed files for `range` from version control, then
    /// [`process`](Self::process) them. An unreadable range falls back to a
    /// full scan unless strict.
    pub fn process_revision_range(&self, range: &str) -> DuploResult<BridgeSummary> {
        match self.actuators.vcs.changed_files(&self.root, range) {
            Ok(files) => {
                info!(range, changed = files.len(), "changed files from version control");
                self.process(Some(&files))
            }
            Err(e) => {
                self.check_strict(&e)?;
                warn!(range, error = %e, "cannot read changed files; scanning whole project");
                self.process(None)
            }
        }
    }

    /// Act on findings produced elsewhere. Items that do not decode become
    /// `error` outcomes.
    pub fn process_raw_findings(&self, values: &[Value]) -> DuploResult<BridgeSummary> {
        let started = Instant::now();
        let intake = values
            .iter()
            .map(|value| match Finding::from_value(value) {
                Ok(finding) => Intake::Ready(finding),
                Err(e) => Intake::Rejected {
                    finding_id: value
                        .get("finding_id")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                    error: e.to_string(),
                },
            })
            .collect();
        self.finish(intake, started)
    }

    fn finish(&self, intake: Vec<Intake>, started: Instant) -> DuploResult<BridgeSummary> {
        let results = self.run(intake)?;
        let summary = BridgeSummary::from_outcomes(results, started.elapsed().as_millis() as u64);
        info!(
            processed = summary.findings_processed,
            automatic_fixes = summary.summary.automatic_fixes,
            github_issues = summary.summary.github_issues,
            expert_reviews = summary.summary.expert_reviews,
            skipped = summary.summary.skipped,
            errors = summary.summary.errors,
            "bridge run complete"
        );
        if self.config.bridge.save_reports {
            let dir = self.root.join(&self.config.bridge.report_dir);
            if let Err(e) = save_report(&dir, &summary) {
                warn!(error = %e, "could not save analysis report");
            }
        }
        Ok(summary)
    }

    fn check_strict(&self, error: &ActuatorError) -> DuploResult<()> {
        if self.config.bridge.strict && error.is_environmental() {
            return Err(DuploError::Actuator(error.clone()));
        }
        Ok(())
    }

    /// Walk every finding in memory-sized batches, then route the ones the
    /// matrix sent to experts, one package per language.
    fn run(&self, intake: Vec<Intake>) -> DuploResult<Vec<FindingOutcome>> {
        let total = intake.len();
        let mut outcomes: Vec<Option<FindingOutcome>> = vec![None; total];
        let mut expert_queue: Vec<(usize, Finding)> = Vec::new();
        let mut items = intake.into_iter().enumerate().peekable();

        let mut batch_no = 0usize;
        while items.peek().is_some() {
            let batch_size = self
                .memory
                .calculate_optimal_batch_size(self.config.memory.default_batch_size)
                .max(1);
            batch_no += 1;
            debug!(batch = batch_no, batch_size, "starting batch");
            for (index, item) in items.by_ref().take(batch_size) {
                match item {
                    Intake::Rejected { finding_id, error } => {
                        warn!(finding_id = %finding_id, error = %error, "malformed finding");
                        outcomes[index] = Some(FindingOutcome::error(finding_id, FailureStage::Context, error));
                    }
                    Intake::Ready(finding) => match self.handle(&finding)? {
                        Some(outcome) => outcomes[index] = Some(outcome),
                        None => expert_queue.push((index, finding)),
                    },
                }
            }
        }

        self.route_experts(expert_queue, &mut outcomes)?;

        Ok(outcomes
            .into_iter()
            .map(|o| {
                o.unwrap_or_else(|| {
                    FindingOutcome::error("unknown", FailureStage::Routing, "finding was not routed")
                })
            })
            .collect())
    }

    /// Drive one finding. `Ok(None)` means it is waiting for expert batching.
    fn handle(&self, finding: &Finding) -> DuploResult<Option<FindingOutcome>> {
        let id = finding.finding_id.as_str();
        let mut progress = Progress::new(id);

        let ctx = match build_context(finding, &self.root, self.metrics.as_ref()) {
            Ok(ctx) => ctx,
            Err(e) => {
                progress.advance(FindingState::Error);
                return Ok(Some(FindingOutcome::error(id, FailureStage::Context, e)));
            }
        };
        progress.advance(FindingState::ContextBuilt);

        if let Some(reason) = self.matrix.skip_reason(&ctx) {
            progress.advance(FindingState::Skipped);
            return Ok(Some(FindingOutcome::Skipped {
                finding_id: id.to_string(),
                reason: reason.to_string(),
            }));
        }

        let decision = match self.matrix.evaluate(&ctx) {
            Ok(decision) => decision,
            Err(e) => {
                progress.advance(FindingState::Error);
                return Ok(Some(FindingOutcome::error(id, FailureStage::Decision, e)));
            }
        };
        progress.advance(FindingState::Decided);
        info!(
            finding_id = id,
            action = %decision.action,
            risk_score = decision.risk_score,
            "decision made"
        );

        let outcome = match decision.action {
            ActionType::AutomaticFix if !self.config.bridge.auto_fix_enabled => {
                progress.advance(FindingState::Skipped);
                FindingOutcome::Skipped {
                    finding_id: id.to_string(),
                    reason: "automatic fixes disabled".to_string(),
                }
            }
            ActionType::AutomaticFix => {
                progress.advance(FindingState::ActuatingFix);
                let plan = implementation_plan(finding, &ctx, &decision);
                match self.actuators.refactor.apply_plan(&self.root, &plan) {
                    Ok(out) => {
                        progress.advance(FindingState::Success);
                        FindingOutcome::AutomaticFix {
                            finding_id: id.to_string(),
                            status: OutcomeStatus::from_success(out.success),
                            output: out.output,
                        }
                    }
                    Err(e) => {
                        self.check_strict(&e)?;
                        progress.advance(FindingState::Error);
                        FindingOutcome::error(id, FailureStage::Actuation, e)
                    }
                }
            }
            ActionType::HumanReview if !self.config.bridge.create_issues_enabled => {
                progress.advance(FindingState::Skipped);
                FindingOutcome::Skipped {
                    finding_id: id.to_string(),
                    reason: "issue creation disabled".to_string(),
                }
            }
            ActionType::HumanReview => {
                progress.advance(FindingState::FilingIssue);
                let title = issue_title(finding);
                let body = issue_body(finding, &ctx, &decision);
                match self.actuators.issues.file_issue(&self.root, &title, &body) {
                    Ok(issue_ref) => {
                        progress.advance(FindingState::Success);
                        FindingOutcome::HumanReview {
                            finding_id: id.to_string(),
                            status: OutcomeStatus::Success,
                            issue_ref: Some(issue_ref),
                        }
                    }
                    Err(e) => {
                        self.check_strict(&e)?;
                        progress.advance(FindingState::Error);
                        FindingOutcome::error(id, FailureStage::Actuation, e)
                    }
                }
            }
            ActionType::ExpertReview => {
                progress.advance(FindingState::BatchingForExpert);
                return Ok(None);
            }
        };
        Ok(Some(outcome))
    }

    fn route_experts(
        &self,
        queue: Vec<(usize, Finding)>,
        outcomes: &mut [Option<FindingOutcome>],
    ) -> DuploResult<()> {
        if queue.is_empty() {
            return Ok(());
        }
        let mut slots: HashMap<String, VecDeque<usize>> = HashMap::new();
        for (index, finding) in &queue {
            slots
                .entry(finding.finding_id.clone())
                .or_default()
                .push_back(*index);
        }
        let findings: Vec<Finding> = queue.into_iter().map(|(_, f)| f).collect();

        for routed in self.router.route(&findings) {
            let ids = routed.finding_ids();
            match &routed {
                RoutingResult::Ready(package) => {
                    let (status, output) = if self.config.bridge.invoke_experts {
                        match self.actuators.experts.invoke(&self.root, package) {
                            Ok(out) => (OutcomeStatus::from_success(out.success), Some(out.output)),
                            Err(e) => {
                                self.check_strict(&e)?;
                                warn!(language = %package.language, error = %e, "expert invocation failed");
                                let message = e.to_string();
                                assign(outcomes, &mut slots, ids, |id| {
                                    FindingOutcome::error(id, FailureStage::Actuation, &message)
                                });
                                continue;
                            }
                        }
                    } else {
                        (OutcomeStatus::ReadyForExpertReview, None)
                    };
                    info!(
                        language = %package.language,
                        expert = %package.recommended_expert,
                        findings = package.finding_ids.len(),
                        package = %package.package_ref,
                        "expert package ready"
                    );
                    assign(outcomes, &mut slots, ids, |id| FindingOutcome::ExpertReview {
                        finding_id: id.to_string(),
                        status,
                        language: package.language.clone(),
                        agent: package.recommended_expert.clone(),
                        package_ref: package.package_ref.clone(),
                        output: output.clone(),
                    });
                }
                RoutingResult::Failed(failure) => {
                    warn!(language = %failure.language, error = %failure.error, "expert routing failed");
                    assign(outcomes, &mut slots, ids, |id| {
                        FindingOutcome::error(id, FailureStage::Routing, &failure.error)
                    });
                }
            }
        }
        Ok(())
    }
}

/// Fill the outcome slot of each routed finding id, oldest first.
fn assign(
    outcomes: &mut [Option<FindingOutcome>],
    slots: &mut HashMap<String, VecDeque<usize>>,
    ids: &[String],
    make: impl Fn(&str) -> FindingOutcome,
) {
    for id in ids {
        if let Some(index) = slots.get_mut(id).and_then(VecDeque::pop_front) {
            outcomes[index] = Some(make(id.as_str()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::actuator::ActuatorOutput;
    use crate::memory::{MemoryProbe, MemorySample};
    use crate::router::ExpertPackage;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::fs;

    const NORMALIZE: &str = "def normalize_record(record):\n    cleaned = {}\n    for key, value in record.items():\n        if value is None:\n            continue\n        cleaned[key.strip().lower()] = value\n    return cleaned\n";

    #[derive(Default)]
    struct Recorder {
        plans: Mutex<Vec<String>>,
        issues: Mutex<Vec<String>>,
        experts: Mutex<Vec<String>>,
    }

    struct FakeRefactor(Arc<Recorder>, Option<ActuatorError>);
    struct FakeIssues(Arc<Recorder>);
    struct FakeVcs(Vec<String>);
    struct FakeExperts(Arc<Recorder>);

    impl RefactorActuator for FakeRefactor {
        fn apply_plan(&self, _root: &Path, plan: &str) -> Result<ActuatorOutput, ActuatorError> {
            if let Some(e) = &self.1 {
                return Err(e.clone());
            }
            self.0.plans.lock().push(plan.to_string());
            Ok(ActuatorOutput {
                success: true,
                output: "refactored".to_string(),
            })
        }
    }

    impl IssueTracker for FakeIssues {
        fn file_issue(&self, _root: &Path, title: &str, _body: &str) -> Result<String, ActuatorError> {
            let mut issues = self.0.issues.lock();
            issues.push(title.to_string());
            Ok(format!("https://example.test/issues/{}", issues.len()))
        }
    }

    impl VersionControl for FakeVcs {
        fn changed_files(&self, _root: &Path, _range: &str) -> Result<Vec<String>, ActuatorError> {
            Ok(self.0.clone())
        }
    }

    impl ExpertInvoker for FakeExperts {
        fn invoke(&self, _root: &Path, package: &ExpertPackage) -> Result<ActuatorOutput, ActuatorError> {
            self.0.experts.lock().push(package.recommended_expert.clone());
            Ok(ActuatorOutput {
                success: true,
                output: "reviewed".to_string(),
            })
        }
    }

    fn make_actuators(recorder: &Arc<Recorder>, refactor_error: Option<ActuatorError>) -> Actuators {
        Actuators {
            refactor: Arc::new(FakeRefactor(recorder.clone(), refactor_error)),
            issues: Arc::new(FakeIssues(recorder.clone())),
            vcs: Arc::new(FakeVcs(vec!["pkg/b.py".to_string()])),
            experts: Arc::new(FakeExperts(recorder.clone())),
        }
    }

    fn make_project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg/a.py"), NORMALIZE).unwrap();
        fs::write(dir.path().join("pkg/b.py"), NORMALIZE).unwrap();
        dir
    }

    fn make_bridge(root: &Path, config: DuploConfig, recorder: &Arc<Recorder>) -> OrchestrationBridge {
        OrchestrationBridge::new(root, config)
            .unwrap()
            .with_actuators(make_actuators(recorder, None))
    }

    fn make_side(name: &str, file: &str, line_count: i64, complexity: u32) -> Value {
        json!({
            "name": name, "file": file, "kind": "function", "line": 1,
            "line_count": line_count, "complexity": complexity
        })
    }

    fn make_raw(id: &str, a: &str, b: &str, lines: i64, complexity: u32) -> Value {
        json!({
            "finding_id": id,
            "file_pair": [a, b],
            "duplicate_symbols": [{
                "original": make_side("load_settings", a, lines / 2, complexity),
                "duplicate": make_side("load_settings", b, lines - lines / 2, complexity),
                "similarity": 0.95
            }],
            "duplicate_count": 1,
            "average_similarity": 0.95
        })
    }

    #[test]
    fn test_state_machine_transitions() {
        use FindingState::*;
        assert!(New.can_advance_to(ContextBuilt));
        assert!(Decided.can_advance_to(BatchingForExpert));
        assert!(FilingIssue.can_advance_to(Success));
        assert!(!New.can_advance_to(Decided));
        assert!(!Success.can_advance_to(Error));
        assert!(!ActuatingFix.can_advance_to(Skipped));
        assert!(Skipped.is_terminal() && Error.is_terminal());
    }

    #[test]
    fn test_missing_root_raises() {
        let err = OrchestrationBridge::new("/definitely/not/here", DuploConfig::default()).err();
        assert!(matches!(err, Some(DuploError::InvalidRoot(_))));
    }

    #[test]
    fn test_project_with_no_symbols_raises_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "nothing to see").unwrap();
        let recorder = Arc::new(Recorder::default());
        let bridge = make_bridge(dir.path(), DuploConfig::default(), &recorder);
        assert!(matches!(bridge.process(None), Err(DuploError::SymbolExtraction(_))));
    }

    #[test]
    fn test_identical_local_duplicate_is_fixed_automatically() {
        let dir = make_project();
        let recorder = Arc::new(Recorder::default());
        let bridge = make_bridge(dir.path(), DuploConfig::default(), &recorder);

        let summary = bridge.process(None).unwrap();
        assert_eq!(summary.status, "success");
        assert_eq!(summary.findings_processed, 1);
        assert_eq!(summary.summary.automatic_fixes, 1);
        assert_eq!(summary.successes, 1);
        let plans = recorder.plans.lock();
        assert_eq!(plans.len(), 1);
        assert!(plans[0].contains("## Files to Review\n- pkg/a.py\n- pkg/b.py\n"));

        let latest = dir.path().join(".ci-registry/reports/latest-analysis.json");
        assert!(latest.exists());
        assert!(dir.path().join(".ci-registry/symbols.db").exists());
    }

    #[test]
    fn test_revision_range_scopes_to_changed_files() {
        let dir = make_project();
        let recorder = Arc::new(Recorder::default());
        let bridge = make_bridge(dir.path(), DuploConfig::default(), &recorder);
        let summary = bridge.process_revision_range("HEAD~1..HEAD").unwrap();
        assert_eq!(summary.summary.automatic_fixes, 1);

        let summary = bridge.process(Some(&["pkg/unrelated.py".to_string()][..])).unwrap();
        assert_eq!(summary.findings_processed, 0);
    }

    #[test]
    fn test_disabled_auto_fix_is_skipped() {
        let dir = make_project();
        let mut config = DuploConfig::default();
        config.bridge.auto_fix_enabled = false;
        config.bridge.save_reports = false;
        let recorder = Arc::new(Recorder::default());
        let bridge = make_bridge(dir.path(), config, &recorder);
        let summary = bridge.process(None).unwrap();
        assert_eq!(summary.summary.skipped, 1);
        assert!(recorder.plans.lock().is_empty());
        assert!(!dir.path().join(".ci-registry/reports").exists());
    }

    #[test]
    fn test_actuator_timeout_is_recorded_unless_strict() {
        let dir = make_project();
        let timeout = ActuatorError::Timeout {
            tool: "claude".to_string(),
            after_secs: 300,
        };
        let recorder = Arc::new(Recorder::default());

        let bridge = OrchestrationBridge::new(dir.path(), DuploConfig::default())
            .unwrap()
            .with_actuators(make_actuators(&recorder, Some(timeout.clone())));
        let summary = bridge.process(None).unwrap();
        assert_eq!(summary.status, "success");
        assert_eq!(summary.summary.errors, 1);
        assert!(matches!(
            &summary.results[0],
            FindingOutcome::Error { stage: FailureStage::Actuation, .. }
        ));

        let mut strict = DuploConfig::default();
        strict.bridge.strict = true;
        let bridge = OrchestrationBridge::new(dir.path(), strict)
            .unwrap()
            .with_actuators(make_actuators(&recorder, Some(timeout)));
        assert!(matches!(bridge.process(None), Err(DuploError::Actuator(_))));
    }

    #[test]
    fn test_raw_findings_take_every_path() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let mut config = DuploConfig::default();
        config.bridge.save_reports = false;
        let bridge = make_bridge(dir.path(), config, &recorder);

        let values = vec![
            json!({"finding_id": "broken", "title": "no fields"}),
            make_raw("human", "api/users.py", "billing/users.py", 150, 12),
            make_raw("expert_py", "api/a.py", "core/b.py", 30, 3),
            make_raw("expert_ts", "web/a.ts", "app/b.ts", 30, 3),
            make_raw("tiny", "pkg/x.py", "pkg/y.py", 2, 1),
            json!(42),
        ];
        let summary = bridge.process_raw_findings(&values).unwrap();

        assert_eq!(summary.status, "success");
        assert_eq!(summary.findings_processed, 6);
        assert_eq!(summary.summary.errors, 2);
        assert_eq!(summary.summary.github_issues, 1);
        assert_eq!(summary.summary.expert_reviews, 2);
        assert_eq!(summary.summary.skipped, 1);
        assert_eq!(
            summary.agents_used,
            vec!["python-expert".to_string(), "typescript-expert".to_string()]
        );
        assert_eq!(summary.results[0].finding_id(), "broken");
        assert_eq!(summary.results[5].finding_id(), "unknown");
        assert_eq!(recorder.issues.lock().len(), 1);
        assert!(recorder.experts.lock().is_empty());

        match &summary.results[2] {
            FindingOutcome::ExpertReview { status, language, .. } => {
                assert_eq!(*status, OutcomeStatus::ReadyForExpertReview);
                assert_eq!(language, "python");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_experts_are_invoked_once_per_language() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let mut config = DuploConfig::default();
        config.bridge.invoke_experts = true;
        config.bridge.save_reports = false;
        let bridge = make_bridge(dir.path(), config, &recorder);

        let values = vec![
            make_raw("p1", "api/a.py", "core/b.py", 30, 3),
            make_raw("p2", "api/c.py", "core/d.py", 30, 3),
            make_raw("t1", "web/a.ts", "app/b.ts", 30, 3),
        ];
        let summary = bridge.process_raw_findings(&values).unwrap();
        assert_eq!(summary.summary.expert_reviews, 3);
        assert_eq!(summary.successes, 3);
        let mut invoked = recorder.experts.lock().clone();
        invoked.sort();
        assert_eq!(invoked, vec!["python-expert".to_string(), "typescript-expert".to_string()]);
    }

    struct CriticalProbe;

    impl MemoryProbe for CriticalProbe {
        fn sample(&self) -> MemorySample {
            MemorySample {
                process_rss_mb: 990.0,
                system_total_mb: 1000.0,
                system_available_mb: 10.0,
            }
        }
    }

    #[test]
    fn test_critical_memory_shrinks_batches_but_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let mut config = DuploConfig::default();
        config.bridge.save_reports = false;
        let memory = MemoryManager::with_probe(config.memory.clone(), Arc::new(CriticalProbe));
        assert_eq!(memory.calculate_optimal_batch_size(20), config.memory.min_batch_size);
        let bridge = make_bridge(dir.path(), config, &recorder).with_memory_manager(memory);

        let values: Vec<Value> = (0..12)
            .map(|i| make_raw(&format!("h{i}"), "api/users.py", "billing/users.py", 150, 12))
            .collect();
        let summary = bridge.process_raw_findings(&values).unwrap();
        assert_eq!(summary.findings_processed, 12);
        assert_eq!(summary.summary.github_issues, 12);
    }
}
