//! Error types for the core library

use thiserror::Error;

use crate::exit_code::ExitCode;

/// Core error type for debforge operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Identifier is not a valid canonical package id
    #[error("Invalid package identifier {id:?}: {reason}")]
    InvalidPackageId { id: String, reason: String },

    /// Unknown build mode
    #[error("Invalid build mode: {value} (expected release, snapshot or milestone)")]
    InvalidMode { value: String },

    /// Target expression matched nothing
    #[error("No package matches {expression:?}")]
    UnresolvedTarget { expression: String },

    /// Package set or index could not be read
    #[error("Discovery failed: {message}")]
    DiscoveryFailed { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Required tools are not installed
    #[error("Required tools missing: {}", tools.join(", "))]
    ToolMissing { tools: Vec<String> },

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Result type alias for debforge operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Add context to an error
    pub fn context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WithContext { context: context.into(), source: Box::new(source) }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError { message: message.into() }
    }

    /// Create a discovery error
    pub fn discovery(message: impl Into<String>) -> Self {
        Self::DiscoveryFailed { message: message.into() }
    }

    /// Exit code reported when this error ends the process
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::InvalidPackageId { .. }
            | Self::UnresolvedTarget { .. }
            | Self::DiscoveryFailed { .. } => ExitCode::DiscoveryFailed,
            Self::InvalidMode { .. } | Self::ConfigError { .. } => ExitCode::ConfigError,
            Self::ToolMissing { .. } => ExitCode::ToolMissing,
            Self::Io(_) | Self::Serialization(_) | Self::WithContext { .. } => {
                ExitCode::ConfigError
            }
        }
    }
}
