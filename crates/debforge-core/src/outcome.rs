//! Phase names, failure kinds and the terminal per-package outcome

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactRef;
use crate::exit_code::ExitCode;
use crate::package::{BuildMode, PackageId};

/// The fixed, ordered steps of a single-package build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    ResolveType,
    RetirementCheck,
    RegistryResolution,
    PolicyCheck,
    EnvironmentPreparation,
    Fetch,
    Prepare,
    ValidateDependencies,
    ImportAndPatch,
    Build,
    VerifyAndPublish,
    Provenance,
    Report,
}

impl Phase {
    /// Every phase in execution order
    pub const ALL: [Phase; 13] = [
        Phase::ResolveType,
        Phase::RetirementCheck,
        Phase::RegistryResolution,
        Phase::PolicyCheck,
        Phase::EnvironmentPreparation,
        Phase::Fetch,
        Phase::Prepare,
        Phase::ValidateDependencies,
        Phase::ImportAndPatch,
        Phase::Build,
        Phase::VerifyAndPublish,
        Phase::Provenance,
        Phase::Report,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Phase::ResolveType => "resolve-type",
            Phase::RetirementCheck => "retirement-check",
            Phase::RegistryResolution => "registry-resolution",
            Phase::PolicyCheck => "policy-check",
            Phase::EnvironmentPreparation => "environment-preparation",
            Phase::Fetch => "fetch",
            Phase::Prepare => "prepare",
            Phase::ValidateDependencies => "validate-dependencies",
            Phase::ImportAndPatch => "import-and-patch",
            Phase::Build => "build",
            Phase::VerifyAndPublish => "verify-and-publish",
            Phase::Provenance => "provenance",
            Phase::Report => "report",
        }
    }

    /// 1-based position in the pipeline
    pub fn ordinal(self) -> usize {
        Self::ALL.iter().position(|p| *p == self).map_or(0, |i| i + 1)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure category recorded for a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    FetchFailed,
    MissingDep,
    PatchFailed,
    BuildFailed,
    PublishFailed,
    Cycle,
    PolicyBlocked,
    Retired,
    Registry,
    ToolMissing,
    Environment,
    DependencyFailed,
    /// Stopped at a phase boundary by an external interrupt
    Interrupted,
    Unknown,
}

impl FailureKind {
    /// Default failure kind for an exit code
    pub fn from_exit_code(code: ExitCode) -> Self {
        match code {
            ExitCode::FetchFailed => FailureKind::FetchFailed,
            ExitCode::MissingPackages => FailureKind::MissingDep,
            ExitCode::PatchFailed => FailureKind::PatchFailed,
            ExitCode::BuildFailed => FailureKind::BuildFailed,
            ExitCode::CycleDetected => FailureKind::Cycle,
            ExitCode::PolicyBlocked => FailureKind::PolicyBlocked,
            ExitCode::RetiredProject => FailureKind::Retired,
            ExitCode::RegistryError => FailureKind::Registry,
            ExitCode::ToolMissing => FailureKind::ToolMissing,
            _ => FailureKind::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FailureKind::FetchFailed => "fetch_failed",
            FailureKind::MissingDep => "missing_dep",
            FailureKind::PatchFailed => "patch_failed",
            FailureKind::BuildFailed => "build_failed",
            FailureKind::PublishFailed => "publish_failed",
            FailureKind::Cycle => "cycle",
            FailureKind::PolicyBlocked => "policy_blocked",
            FailureKind::Retired => "retired",
            FailureKind::Registry => "registry",
            FailureKind::ToolMissing => "tool_missing",
            FailureKind::Environment => "environment",
            FailureKind::DependencyFailed => "dependency_failed",
            FailureKind::Interrupted => "interrupted",
            FailureKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Terminal record of one phase engine invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub package: PackageId,
    pub success: bool,
    pub exit_code: ExitCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    /// Phase that halted the pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<Phase>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<BuildMode>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BuildOutcome {
    /// Successful outcome with produced artifacts
    pub fn succeeded(package: PackageId, started_at: DateTime<Utc>) -> Self {
        Self {
            package,
            success: true,
            exit_code: ExitCode::Success,
            failure_kind: None,
            failed_phase: None,
            artifacts: Vec::new(),
            provenance: None,
            error: None,
            version: None,
            mode: None,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Failed outcome halted by `phase`
    pub fn failed(
        package: PackageId,
        phase: Phase,
        exit_code: ExitCode,
        kind: FailureKind,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            package,
            success: false,
            exit_code,
            failure_kind: Some(kind),
            failed_phase: Some(phase),
            artifacts: Vec::new(),
            provenance: None,
            error: Some(error.into()),
            version: None,
            mode: None,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Outcome for a package that was never started
    pub fn skipped(package: PackageId, exit_code: ExitCode, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            package,
            success: false,
            exit_code,
            failure_kind: Some(FailureKind::DependencyFailed),
            failed_phase: None,
            artifacts: Vec::new(),
            provenance: None,
            error: Some(reason.into()),
            version: None,
            mode: None,
            started_at: now,
            finished_at: now,
        }
    }

    /// Whether the pipeline stopped because of an interrupt
    pub fn is_interrupted(&self) -> bool {
        self.failure_kind == Some(FailureKind::Interrupted)
    }

    /// Wall-clock duration in seconds
    pub fn duration_secs(&self) -> f64 {
        let millis = (self.finished_at - self.started_at).num_milliseconds().max(0);
        millis as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order() {
        assert_eq!(Phase::ALL.len(), 13);
        assert_eq!(Phase::ResolveType.ordinal(), 1);
        assert_eq!(Phase::ValidateDependencies.ordinal(), 8);
        assert_eq!(Phase::Report.ordinal(), 13);
        assert!(Phase::Fetch < Phase::Prepare);
    }

    #[test]
    fn test_failure_kind_from_exit_code() {
        assert_eq!(FailureKind::from_exit_code(ExitCode::PatchFailed), FailureKind::PatchFailed);
        assert_eq!(FailureKind::from_exit_code(ExitCode::CycleDetected), FailureKind::Cycle);
        assert_eq!(FailureKind::from_exit_code(ExitCode::GraphError), FailureKind::Unknown);
    }

    #[test]
    fn test_failed_outcome() {
        let id = PackageId::new("glance").unwrap();
        let outcome = BuildOutcome::failed(
            id.clone(),
            Phase::Build,
            ExitCode::BuildFailed,
            FailureKind::BuildFailed,
            "dpkg-buildpackage exited with status 2",
            Utc::now(),
        );
        assert!(!outcome.success);
        assert_eq!(outcome.package, id);
        assert_eq!(outcome.failed_phase, Some(Phase::Build));
        assert!(outcome.duration_secs() >= 0.0);
    }
}
