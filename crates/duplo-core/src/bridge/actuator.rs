//! External actuators driven by the bridge.
//!
//! Each capability is a trait so orchestration can be exercised without
//! spawning anything. The process-backed implementations share one runner
//! that bounds the child with a timeout and kills it on overrun.

use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::errors::ActuatorError;
use crate::router::ExpertPackage;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Result of handing work to an actuator that ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorOutput {
    pub success: bool,
    pub output: String,
}

pub trait RefactorActuator: Send + Sync {
    fn apply_plan(&self, root: &Path, plan_text: &str) -> Result<ActuatorOutput, ActuatorError>;
}

pub trait IssueTracker: Send + Sync {
    /// File an issue and return its reference (usually a URL).
    fn file_issue(&self, root: &Path, title: &str, body: &str) -> Result<String, ActuatorError>;
}

pub trait VersionControl: Send + Sync {
    fn changed_files(&self, root: &Path, range: &str) -> Result<Vec<String>, ActuatorError>;
}

pub trait ExpertInvoker: Send + Sync {
    fn invoke(&self, root: &Path, package: &ExpertPackage) -> Result<ActuatorOutput, ActuatorError>;
}

// ---------------------------------------------------------------------------
// Process runner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut r) = reader {
            let _ = r.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Run `command` in `cwd`, killing it once `timeout` elapses.
///
/// A missing executable maps to `Unavailable`, an overrun to `Timeout`.
/// A non-zero exit is not an error here; callers inspect `success`.
pub fn run_with_timeout(
    tool: &str,
    mut command: Command,
    cwd: &Path,
    timeout: Duration,
) -> Result<ProcessOutput, ActuatorError> {
    command
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| match e.kind() {
        ErrorKind::NotFound | ErrorKind::PermissionDenied => ActuatorError::Unavailable {
            tool: tool.to_string(),
            message: e.to_string(),
        },
        _ => ActuatorError::Failed {
            tool: tool.to_string(),
            message: e.to_string(),
        },
    })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let deadline = Instant::now() + timeout;

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                warn!(tool, after_secs = timeout.as_secs(), "actuator timed out; killed");
                return Err(ActuatorError::Timeout {
                    tool: tool.to_string(),
                    after_secs: timeout.as_secs(),
                });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                return Err(ActuatorError::Failed {
                    tool: tool.to_string(),
                    message: e.to_string(),
                });
            }
        }
    };

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();
    debug!(tool, code = ?status.code(), "actuator finished");
    Ok(ProcessOutput {
        exit_code: status.code(),
        success: status.success(),
        stdout,
        stderr,
    })
}

// ---------------------------------------------------------------------------
// Process-backed actuators
// ---------------------------------------------------------------------------

/// Hands an implementation plan to a code-modifying agent as
/// `<command> "<slash-command> <plan file>"`.
#[derive(Debug, Clone)]
pub struct ProcessRefactorActuator {
    pub command: String,
    pub slash_command: String,
    pub timeout: Duration,
}

impl ProcessRefactorActuator {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            command: config.refactor_command.clone(),
            slash_command: config.refactor_slash_command.clone(),
            timeout: Duration::from_secs(config.refactor_timeout_secs),
        }
    }

    fn plan_path() -> PathBuf {
        std::env::temp_dir().join(format!(
            "duplo_plan_{}_{}.md",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }
}

impl RefactorActuator for ProcessRefactorActuator {
    fn apply_plan(&self, root: &Path, plan_text: &str) -> Result<ActuatorOutput, ActuatorError> {
        let plan_path = Self::plan_path();
        std::fs::write(&plan_path, plan_text).map_err(|e| ActuatorError::Failed {
            tool: self.command.clone(),
            message: format!("cannot write plan file {}: {}", plan_path.display(), e),
        })?;

        let mut cmd = Command::new(&self.command);
        cmd.arg(format!("{} {}", self.slash_command, plan_path.display()));
        info!(command = %self.command, plan = %plan_path.display(), "running refactor agent");
        let result = run_with_timeout(&self.command, cmd, root, self.timeout);
        let _ = std::fs::remove_file(&plan_path);

        let out = result?;
        Ok(ActuatorOutput {
            success: out.success,
            output: if out.success { out.stdout } else { out.stderr },
        })
    }
}

/// Files issues through the GitHub CLI.
#[derive(Debug, Clone)]
pub struct GhIssueTracker {
    pub labels: Vec<String>,
    pub timeout: Duration,
}

impl GhIssueTracker {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            labels: config.issue_labels.clone(),
            timeout: Duration::from_secs(config.issue_timeout_secs),
        }
    }
}

impl IssueTracker for GhIssueTracker {
    fn file_issue(&self, root: &Path, title: &str, body: &str) -> Result<String, ActuatorError> {
        let mut cmd = Command::new("gh");
        cmd.args(["issue", "create", "--title", title, "--body", body]);
        if !self.labels.is_empty() {
            cmd.arg("--label").arg(self.labels.join(","));
        }
        let out = run_with_timeout("gh", cmd, root, self.timeout)?;
        if !out.success {
            return Err(ActuatorError::Failed {
                tool: "gh".to_string(),
                message: out.stderr.trim().to_string(),
            });
        }
        let issue_ref = out.stdout.trim().to_string();
        info!(issue = %issue_ref, "issue filed");
        Ok(issue_ref)
    }
}

#[derive(Debug, Clone)]
pub struct GitVersionControl {
    pub timeout: Duration,
}

impl GitVersionControl {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.vcs_timeout_secs),
        }
    }
}

impl VersionControl for GitVersionControl {
    fn changed_files(&self, root: &Path, range: &str) -> Result<Vec<String>, ActuatorError> {
        let mut cmd = Command::new("git");
        cmd.args(["diff", "--name-only", range]);
        let out = run_with_timeout("git", cmd, root, self.timeout)?;
        if !out.success {
            return Err(ActuatorError::Failed {
                tool: "git".to_string(),
                message: out.stderr.trim().to_string(),
            });
        }
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Asks the agent CLI to run the recommended expert over a review package.
#[derive(Debug, Clone)]
pub struct ProcessExpertInvoker {
    pub command: String,
    pub timeout: Duration,
}

impl ProcessExpertInvoker {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            command: config.refactor_command.clone(),
            timeout: Duration::from_secs(config.refactor_timeout_secs),
        }
    }
}

impl ExpertInvoker for ProcessExpertInvoker {
    fn invoke(&self, root: &Path, package: &ExpertPackage) -> Result<ActuatorOutput, ActuatorError> {
        let prompt = format!(
            "Use the {} agent for this review.\n\n{}\n\n{}",
            package.recommended_expert, package.task_description, package.instructions
        );
        let mut cmd = Command::new(&self.command);
        cmd.arg(prompt);
        let out = run_with_timeout(&self.command, cmd, root, self.timeout)?;
        Ok(ActuatorOutput {
            success: out.success,
            output: if out.success { out.stdout } else { out.stderr },
        })
    }
}
