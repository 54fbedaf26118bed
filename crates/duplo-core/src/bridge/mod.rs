//! Orchestration bridge: drives a scan end to end and talks to the outside
//! world (refactor agent, issue tracker, version control, expert hand-off).

pub mod actuator;
pub mod context;
pub mod orchestrator;
pub mod plan;
pub mod report;

pub use orchestrator::{Actuators, FindingState, OrchestrationBridge};
pub use report::{ActionCounts, BridgeSummary, FindingOutcome, OutcomeStatus};
