//! Error types for graph construction

use debforge_core::{ExitCode, PackageId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A dependency that is neither buildable nor externally satisfied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingPackage {
    pub id: PackageId,
    /// Graph nodes that declared the dependency, in discovery order
    pub required_by: Vec<PackageId>,
    pub suggested_action: String,
}

impl MissingPackage {
    pub fn new(id: PackageId, required_by: Vec<PackageId>) -> Self {
        let suggested_action = if required_by.is_empty() {
            "check the requested name against the managed package set".to_string()
        } else {
            "add it to the managed package set or publish it to the repository".to_string()
        };
        Self { id, required_by, suggested_action }
    }
}

/// Graph construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Dependency cycle, participants in discovery order
    #[error("Dependency cycle detected: {}", join(participants, " -> "))]
    Cycle { participants: Vec<PackageId> },

    /// Dependencies with no build recipe and no index entry
    #[error("Missing packages: {}", missing.iter().map(|m| m.id.as_str()).collect::<Vec<_>>().join(", "))]
    MissingPackages { missing: Vec<MissingPackage> },

    /// Nodes left over by batch planning
    #[error("Graph inconsistency, nodes never scheduled: {}", join(remaining, ", "))]
    Inconsistent { remaining: Vec<PackageId> },

    /// An edge points at something that is neither a node nor satisfied
    #[error("Dangling dependency {dependency} of {package}")]
    DanglingEdge { package: PackageId, dependency: PackageId },

    /// Nothing was requested
    #[error("No packages requested")]
    EmptyRoots,
}

/// Result type alias for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

impl GraphError {
    /// Exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Cycle { .. } => ExitCode::CycleDetected,
            Self::MissingPackages { .. } => ExitCode::MissingPackages,
            Self::Inconsistent { .. } | Self::DanglingEdge { .. } => ExitCode::GraphError,
            Self::EmptyRoots => ExitCode::DiscoveryFailed,
        }
    }
}

fn join(ids: &[PackageId], sep: &str) -> String {
    ids.iter().map(PackageId::as_str).collect::<Vec<_>>().join(sep)
}
