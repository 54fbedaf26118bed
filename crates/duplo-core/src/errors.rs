//! Error types for the duplo core library.

use std::fmt;

/// Top-level error enum for the duplo core library.
#[derive(Debug, thiserror::Error)]
pub enum DuploError {
    /// The symbol pipeline produced nothing for the target.
    #[error("Symbol extraction error: {0}")]
    SymbolExtraction(String),

    #[error("Invalid project root: {0}")]
    InvalidRoot(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Decision input error: {0}")]
    DecisionInput(String),

    #[error("Actuator error: {0}")]
    Actuator(#[from] ActuatorError),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DuploError {
    /// Process exit code a command-line wrapper should use for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            DuploError::Config(_) => 8,
            DuploError::Actuator(_) => 2,
            _ => 1,
        }
    }
}

pub type DuploResult<T> = Result<T, DuploError>;

/// Failure talking to a symbol resolution service.
///
/// "No definition found" is not an error: resolvers return `Ok(None)` for
/// that. These variants cover the service itself misbehaving.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolutionError {
    #[error("resolution timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("resolution failed: {0}")]
    Failed(String),
}

/// Failure of an external actuator (refactor agent, issue tracker, VCS).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActuatorError {
    #[error("{tool} timed out after {after_secs}s")]
    Timeout { tool: String, after_secs: u64 },

    #[error("{tool} is unavailable: {message}")]
    Unavailable { tool: String, message: String },

    #[error("{tool} failed: {message}")]
    Failed { tool: String, message: String },
}

impl ActuatorError {
    /// Timeouts and missing tools point at environment misconfiguration,
    /// which strict mode refuses to paper over.
    pub fn is_environmental(&self) -> bool {
        matches!(
            self,
            ActuatorError::Timeout { .. } | ActuatorError::Unavailable { .. }
        )
    }

    pub fn tool(&self) -> &str {
        match self {
            ActuatorError::Timeout { tool, .. }
            | ActuatorError::Unavailable { tool, .. }
            | ActuatorError::Failed { tool, .. } => tool,
        }
    }
}

/// Configuration loading and validation failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    #[error("failed to parse {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("invalid value for {field}: {message}")]
    ValidationFailed { field: String, message: String },
}

/// Which stage of the bridge produced a per-finding error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Context,
    Decision,
    Actuation,
    Routing,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureStage::Context => "context",
            FailureStage::Decision => "decision",
            FailureStage::Actuation => "actuation",
            FailureStage::Routing => "routing",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_by_category() {
        let config = DuploError::Config(ConfigError::FileNotFound {
            path: "duplo.toml".to_string(),
        });
        assert_eq!(config.exit_code(), 8);

        let actuator = DuploError::Actuator(ActuatorError::Unavailable {
            tool: "gh".to_string(),
            message: "not installed".to_string(),
        });
        assert_eq!(actuator.exit_code(), 2);

        let extraction = DuploError::SymbolExtraction("no symbols".to_string());
        assert_eq!(extraction.exit_code(), 1);
    }

    #[test]
    fn test_actuator_error_is_environmental() {
        let timeout = ActuatorError::Timeout {
            tool: "claude".to_string(),
            after_secs: 300,
        };
        assert!(timeout.is_environmental());
        assert_eq!(timeout.tool(), "claude");

        let failed = ActuatorError::Failed {
            tool: "gh".to_string(),
            message: "HTTP 422".to_string(),
        };
        assert!(!failed.is_environmental());
    }

    #[test]
    fn test_error_messages() {
        let err = ResolutionError::Timeout { after_ms: 250 };
        assert_eq!(err.to_string(), "resolution timed out after 250ms");
        assert_eq!(FailureStage::Actuation.to_string(), "actuation");
    }
}
