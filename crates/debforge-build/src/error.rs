//! Error types for the build orchestration module

use std::path::PathBuf;

use debforge_core::ExitCode;
use debforge_graph::GraphError;
use thiserror::Error;

/// Build-specific error types
#[derive(Error, Debug)]
pub enum BuildError {
    /// Graph construction or planning failed
    #[error("Dependency graph error: {0}")]
    Graph(#[from] GraphError),

    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] debforge_core::Error),

    /// Requested run does not exist
    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// Resume requested but no previous run exists
    #[error("No previous run to resume in {}", dir.display())]
    NoRunToResume { dir: PathBuf },

    /// Stored run state could not be read
    #[error("Run state at {} is unreadable: {reason}", path.display())]
    StateCorrupt { path: PathBuf, reason: String },

    /// Invalid run options
    #[error("Invalid run options: {reason}")]
    InvalidOptions { reason: String },

    /// Repository index regeneration failed
    #[error("Repository index regeneration failed: {reason}")]
    IndexRegeneration { reason: String },

    /// Artifact collection failed
    #[error("Artifact collection failed: {reason}")]
    ArtifactCollection { reason: String },

    /// Maximum retry attempts exceeded
    #[error("Maximum retry attempts ({max_attempts}) exceeded for operation: {operation}")]
    MaxRetriesExceeded { operation: String, max_attempts: u32 },

    /// Shutdown in progress
    #[error("Shutdown in progress, operation aborted")]
    ShutdownInProgress,

    /// Transient error that may be retryable
    #[error("Transient error: {reason}")]
    Transient { reason: String },

    /// Permanent error that should not be retried
    #[error("Permanent error: {reason}")]
    Permanent { reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for build operations
pub type Result<T> = std::result::Result<T, BuildError>;

impl BuildError {
    /// Create an invalid options error
    pub fn invalid_options(reason: impl Into<String>) -> Self {
        Self::InvalidOptions { reason: reason.into() }
    }

    /// Create a max retries exceeded error
    pub fn max_retries_exceeded(operation: impl Into<String>, max_attempts: u32) -> Self {
        Self::MaxRetriesExceeded { operation: operation.into(), max_attempts }
    }

    /// Create a transient error
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient { reason: reason.into() }
    }

    /// Create a permanent error
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent { reason: reason.into() }
    }

    /// Whether the bookkeeping retry loop may try again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::IndexRegeneration { .. } | Self::Io(_))
    }

    /// Check if an error indicates shutdown
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::ShutdownInProgress)
    }

    /// Exit code reported when this error ends the process
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Graph(e) => e.exit_code(),
            Self::Core(e) => e.exit_code(),
            Self::RunNotFound { .. } | Self::NoRunToResume { .. } | Self::StateCorrupt { .. } => {
                ExitCode::ResumeError
            }
            Self::InvalidOptions { .. } => ExitCode::ConfigError,
            Self::ShutdownInProgress => ExitCode::PartialFailure,
            Self::IndexRegeneration { .. }
            | Self::ArtifactCollection { .. }
            | Self::MaxRetriesExceeded { .. }
            | Self::Transient { .. }
            | Self::Permanent { .. }
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Yaml(_) => ExitCode::BuildFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mapping() {
        let err = BuildError::RunNotFound { run_id: "r1".to_string() };
        assert_eq!(err.exit_code(), ExitCode::ResumeError);

        let err = BuildError::from(GraphError::Cycle { participants: Vec::new() });
        assert_eq!(err.exit_code(), ExitCode::CycleDetected);

        assert_eq!(BuildError::invalid_options("x").exit_code(), ExitCode::ConfigError);
    }

    #[test]
    fn test_retryable() {
        assert!(BuildError::transient("disk busy").is_retryable());
        assert!(!BuildError::permanent("no").is_retryable());
        assert!(!BuildError::ShutdownInProgress.is_retryable());
        assert!(BuildError::ShutdownInProgress.is_shutdown());
    }
}
