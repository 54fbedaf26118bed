//! Pipeline configuration with layered resolution.
//!
//! Resolution order (highest priority first):
//! 1. Environment variables (`DUPLO_*`)
//! 2. Project config (`duplo.toml` in the project root)
//! 3. Compiled defaults
//!
//! The resolved [`DuploConfig`] is built once per run and shared by reference.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::models::TierThresholds;

pub const CONFIG_FILE_NAME: &str = "duplo.toml";

/// Parse a boolean switch the way every `DUPLO_*` flag is read: anything but
/// an explicit "off" spelling counts as enabled.
pub fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(val) => {
            let v = val.trim().to_lowercase();
            !matches!(v.as_str(), "0" | "false" | "no" | "off")
        }
        Err(_) => default,
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinderConfig {
    /// Minimum similarity for a neighbour to count as a duplicate.
    pub min_similarity: f64,
    pub tiers: TierThresholds,
    /// Neighbours requested from the similarity index per symbol.
    pub top_k: usize,
    /// Symbols whose bodies span fewer lines are not indexed.
    pub min_body_lines: i64,
    pub workers: usize,
    /// Bound on each resolution-service call.
    pub resolver_timeout_ms: u64,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.75,
            tiers: TierThresholds::default(),
            top_k: 10,
            min_body_lines: 3,
            workers: 4,
            resolver_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub auto_fix_similarity: f64,
    pub auto_fix_max_complexity: u32,
    pub auto_fix_max_lines: i64,
    pub human_review_min_complexity: u32,
    pub human_review_min_lines: i64,
    pub low_coverage_percentage: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            auto_fix_similarity: 0.9,
            auto_fix_max_complexity: 5,
            auto_fix_max_lines: 60,
            human_review_min_complexity: 10,
            human_review_min_lines: 100,
            low_coverage_percentage: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub warning_threshold: f64,
    pub throttle_threshold: f64,
    pub critical_threshold: f64,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    pub default_batch_size: usize,
    pub monitoring_interval_secs: f64,
    pub enable_auto_gc: bool,
    pub gc_threshold_mb: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            warning_threshold: 75.0,
            throttle_threshold: 85.0,
            critical_threshold: 95.0,
            min_batch_size: 5,
            max_batch_size: 100,
            default_batch_size: 20,
            monitoring_interval_secs: 5.0,
            enable_auto_gc: true,
            gc_threshold_mb: 200.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Abort on actuator timeouts or missing tools instead of recording them.
    pub strict: bool,
    pub auto_fix_enabled: bool,
    pub create_issues_enabled: bool,
    /// Hand expert packages to the expert invoker instead of only emitting them.
    pub invoke_experts: bool,
    pub refactor_timeout_secs: u64,
    pub issue_timeout_secs: u64,
    pub vcs_timeout_secs: u64,
    pub issue_labels: Vec<String>,
    pub refactor_command: String,
    pub refactor_slash_command: String,
    /// Relative to the project root.
    pub report_dir: String,
    pub save_reports: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            strict: false,
            auto_fix_enabled: true,
            create_issues_enabled: true,
            invoke_experts: false,
            refactor_timeout_secs: 300,
            issue_timeout_secs: 30,
            vcs_timeout_secs: 30,
            issue_labels: vec!["code-duplication".to_string(), "technical-debt".to_string()],
            refactor_command: "claude".to_string(),
            refactor_slash_command: "/todo-orchestrate".to_string(),
            report_dir: ".ci-registry/reports".to_string(),
            save_reports: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusionConfig {
    pub directories: Vec<String>,
    pub files: Vec<String>,
    pub exclude_sensitive: bool,
}

impl Default for ExclusionConfig {
    fn default() -> Self {
        Self {
            directories: ["node_modules", ".git", "__pycache__", "dist", "build", "target"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            files: ["*.min.js", "*.bundle.js", "*.map"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exclude_sensitive: true,
        }
    }
}

impl ExclusionConfig {
    /// Exclusions as ignore patterns (`dir/` marks directory-only rules).
    pub fn patterns(&self) -> Vec<String> {
        self.directories
            .iter()
            .map(|d| format!("{}/", d.trim_end_matches('/')))
            .chain(self.files.iter().cloned())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// DuploConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DuploConfig {
    pub finder: FinderConfig,
    pub decision: DecisionConfig,
    pub memory: MemoryConfig,
    pub bridge: BridgeConfig,
    pub exclusions: ExclusionConfig,
}

impl DuploConfig {
    /// Load `duplo.toml` from `root` (when present), apply environment
    /// overrides, then validate.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE_NAME);
        let mut config = if path.exists() {
            let content =
                std::fs::read_to_string(&path).map_err(|_| ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })?;
            toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (for testing).
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            path: "<string>".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("DUPLO_MIN_SIMILARITY") {
            if let Ok(v) = val.trim().parse::<f64>() {
                self.finder.min_similarity = v;
            }
        }
        if let Ok(val) = std::env::var("DUPLO_WORKERS") {
            if let Ok(v) = val.trim().parse::<usize>() {
                self.finder.workers = v.max(1);
            }
        }
        self.bridge.strict = env_flag("DUPLO_STRICT", self.bridge.strict);
        self.bridge.auto_fix_enabled = env_flag("DUPLO_AUTO_FIX", self.bridge.auto_fix_enabled);
        self.bridge.create_issues_enabled =
            env_flag("DUPLO_CREATE_ISSUES", self.bridge.create_issues_enabled);
        self.exclusions.exclude_sensitive =
            env_flag("DUPLO_EXCLUDE_SENSITIVE", self.exclusions.exclude_sensitive);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |field: &str, value: f64| -> Result<(), ConfigError> {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::ValidationFailed {
                    field: field.to_string(),
                    message: "must be between 0.0 and 1.0".to_string(),
                })
            }
        };
        unit("finder.min_similarity", self.finder.min_similarity)?;
        unit("finder.tiers.exact", self.finder.tiers.exact)?;
        unit("finder.tiers.high", self.finder.tiers.high)?;
        unit("finder.tiers.medium", self.finder.tiers.medium)?;
        unit("finder.tiers.low", self.finder.tiers.low)?;
        unit("decision.auto_fix_similarity", self.decision.auto_fix_similarity)?;

        let tiers = &self.finder.tiers;
        if !(tiers.low <= tiers.medium && tiers.medium <= tiers.high && tiers.high <= tiers.exact) {
            return Err(ConfigError::ValidationFailed {
                field: "finder.tiers".to_string(),
                message: "tiers must be ordered low <= medium <= high <= exact".to_string(),
            });
        }

        let mem = &self.memory;
        if !(mem.warning_threshold < mem.throttle_threshold
            && mem.throttle_threshold < mem.critical_threshold)
        {
            return Err(ConfigError::ValidationFailed {
                field: "memory".to_string(),
                message: "thresholds must satisfy warning < throttle < critical".to_string(),
            });
        }
        if mem.critical_threshold > 100.0 || mem.warning_threshold <= 0.0 {
            return Err(ConfigError::ValidationFailed {
                field: "memory".to_string(),
                message: "thresholds are percentages in (0, 100]".to_string(),
            });
        }
        if mem.min_batch_size == 0 || mem.min_batch_size > mem.max_batch_size {
            return Err(ConfigError::ValidationFailed {
                field: "memory.min_batch_size".to_string(),
                message: "must be at least 1 and not exceed max_batch_size".to_string(),
            });
        }
        if mem.monitoring_interval_secs <= 0.0 {
            return Err(ConfigError::ValidationFailed {
                field: "memory.monitoring_interval_secs".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if self.bridge.refactor_timeout_secs == 0
            || self.bridge.issue_timeout_secs == 0
            || self.bridge.vcs_timeout_secs == 0
        {
            return Err(ConfigError::ValidationFailed {
                field: "bridge".to_string(),
                message: "actuator timeouts must be greater than 0".to_string(),
            });
        }
        if self.finder.top_k == 0 {
            return Err(ConfigError::ValidationFailed {
                field: "finder.top_k".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DuploConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.memory.default_batch_size, 20);
        assert_eq!(config.bridge.issue_timeout_secs, 30);
        assert_eq!(config.finder.tiers.high, 0.8);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = DuploConfig::from_toml(
            r#"
[finder]
min_similarity = 0.9

[bridge]
strict = true
"#,
        )
        .unwrap();
        assert_eq!(config.finder.min_similarity, 0.9);
        assert_eq!(config.finder.top_k, 10);
        assert!(config.bridge.strict);
        assert_eq!(config.memory.critical_threshold, 95.0);
    }

    #[test]
    fn test_unordered_memory_thresholds_rejected() {
        let err = DuploConfig::from_toml(
            r#"
[memory]
warning_threshold = 90.0
throttle_threshold = 85.0
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationFailed { .. }));
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let err = DuploConfig::from_toml("[finder\nmin_similarity = ").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_load_reads_project_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[exclusions]\ndirectories = [\"vendor\"]\n",
        )
        .unwrap();
        let config = DuploConfig::load(dir.path()).unwrap();
        assert_eq!(config.exclusions.directories, vec!["vendor".to_string()]);
        assert_eq!(config.exclusions.patterns()[0], "vendor/");
    }
}
