//! Stable process exit codes
//!
//! The numeric values are part of the public contract: scripts and CI jobs
//! branch on them, so they never change between releases.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Exit code taxonomy shared by phases, graph building and runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitCode {
    Success,
    ConfigError,
    ToolMissing,
    FetchFailed,
    PatchFailed,
    MissingPackages,
    CycleDetected,
    BuildFailed,
    PolicyBlocked,
    RegistryError,
    RetiredProject,
    DiscoveryFailed,
    GraphError,
    /// Some packages of a multi-package run failed
    PartialFailure,
    ResumeError,
}

impl ExitCode {
    /// All codes in numeric order
    pub const ALL: [ExitCode; 15] = [
        ExitCode::Success,
        ExitCode::ConfigError,
        ExitCode::ToolMissing,
        ExitCode::FetchFailed,
        ExitCode::PatchFailed,
        ExitCode::MissingPackages,
        ExitCode::CycleDetected,
        ExitCode::BuildFailed,
        ExitCode::PolicyBlocked,
        ExitCode::RegistryError,
        ExitCode::RetiredProject,
        ExitCode::DiscoveryFailed,
        ExitCode::GraphError,
        ExitCode::PartialFailure,
        ExitCode::ResumeError,
    ];

    /// Numeric process exit code
    pub fn code(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::ConfigError => 1,
            ExitCode::ToolMissing => 2,
            ExitCode::FetchFailed => 3,
            ExitCode::PatchFailed => 4,
            ExitCode::MissingPackages => 5,
            ExitCode::CycleDetected => 6,
            ExitCode::BuildFailed => 7,
            ExitCode::PolicyBlocked => 8,
            ExitCode::RegistryError => 9,
            ExitCode::RetiredProject => 10,
            ExitCode::DiscoveryFailed => 11,
            ExitCode::GraphError => 12,
            ExitCode::PartialFailure => 13,
            ExitCode::ResumeError => 14,
        }
    }

    /// Look up a code by its numeric value
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Success
    }

    /// Stable kebab-case name
    pub fn name(self) -> &'static str {
        match self {
            ExitCode::Success => "success",
            ExitCode::ConfigError => "config-error",
            ExitCode::ToolMissing => "tool-missing",
            ExitCode::FetchFailed => "fetch-failed",
            ExitCode::PatchFailed => "patch-failed",
            ExitCode::MissingPackages => "missing-packages",
            ExitCode::CycleDetected => "cycle-detected",
            ExitCode::BuildFailed => "build-failed",
            ExitCode::PolicyBlocked => "policy-blocked",
            ExitCode::RegistryError => "registry-error",
            ExitCode::RetiredProject => "retired-project",
            ExitCode::DiscoveryFailed => "discovery-failed",
            ExitCode::GraphError => "graph-error",
            ExitCode::PartialFailure => "partial-failure",
            ExitCode::ResumeError => "resume-error",
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        // All values fit in a u8
        std::process::ExitCode::from(code.code() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        let codes: Vec<i32> = ExitCode::ALL.iter().map(|c| c.code()).collect();
        assert_eq!(codes, (0..15).collect::<Vec<_>>());
        assert_eq!(ExitCode::PartialFailure.code(), 13);
        assert_eq!(ExitCode::ResumeError.code(), 14);
    }

    #[test]
    fn test_from_code() {
        assert_eq!(ExitCode::from_code(6), Some(ExitCode::CycleDetected));
        assert_eq!(ExitCode::from_code(0), Some(ExitCode::Success));
        assert_eq!(ExitCode::from_code(99), None);
        assert_eq!(ExitCode::from_code(-1), None);
    }

    #[test]
    fn test_display_and_serde() {
        assert_eq!(ExitCode::BuildFailed.to_string(), "build-failed (7)");
        let json = serde_json::to_string(&ExitCode::MissingPackages).unwrap();
        assert_eq!(json, "\"missing-packages\"");
    }
}
