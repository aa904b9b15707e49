//! Error types for the concrete collaborators

use std::path::{Path, PathBuf};

use debforge_core::ExitCode;
use thiserror::Error;

/// Errors raised while loading or writing collaborator files
#[derive(Error, Debug)]
pub enum ToolsError {
    /// A YAML data file could not be parsed
    #[error("Invalid {kind} file {path:?}: {reason}")]
    InvalidFile { kind: &'static str, path: PathBuf, reason: String },

    /// A data file is missing
    #[error("{kind} file not found: {path:?}")]
    FileNotFound { kind: &'static str, path: PathBuf },

    /// An identifier in a data file was rejected
    #[error("Invalid entry in {path:?}: {source}")]
    InvalidEntry {
        path: PathBuf,
        #[source]
        source: debforge_core::Error,
    },

    /// `debian/control` has no usable build dependency fields
    #[error("Cannot read build dependencies from {path:?}: {reason}")]
    ControlFile { path: PathBuf, reason: String },

    /// Repository write failed
    #[error("Repository write failed: {reason}")]
    Repository { reason: String },

    /// File system error
    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for collaborator operations
pub type Result<T> = std::result::Result<T, ToolsError>;

impl ToolsError {
    /// Create an invalid file error
    pub fn invalid_file(kind: &'static str, path: &Path, reason: impl Into<String>) -> Self {
        Self::InvalidFile { kind, path: path.to_path_buf(), reason: reason.into() }
    }

    /// Create a missing file error
    pub fn file_not_found(kind: &'static str, path: &Path) -> Self {
        Self::FileNotFound { kind, path: path.to_path_buf() }
    }

    /// Create a control file error
    pub fn control_file(path: &Path, reason: impl Into<String>) -> Self {
        Self::ControlFile { path: path.to_path_buf(), reason: reason.into() }
    }

    /// Create a repository error
    pub fn repository(reason: impl Into<String>) -> Self {
        Self::Repository { reason: reason.into() }
    }

    /// Exit code reported when this error ends the process
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::InvalidFile { .. } | Self::FileNotFound { .. } | Self::InvalidEntry { .. } => {
                ExitCode::ConfigError
            }
            Self::ControlFile { .. } => ExitCode::DiscoveryFailed,
            Self::Repository { .. } | Self::Io(_) | Self::Yaml(_) => ExitCode::BuildFailed,
        }
    }
}

impl From<ToolsError> for debforge_core::Error {
    fn from(error: ToolsError) -> Self {
        match error.exit_code() {
            ExitCode::ConfigError => debforge_core::Error::config(error.to_string()),
            ExitCode::DiscoveryFailed => debforge_core::Error::discovery(error.to_string()),
            _ => debforge_core::Error::context("collaborator failure", error),
        }
    }
}
