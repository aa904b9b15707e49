//! Inputs and accumulated context of a single-package build
//!
//! [`BuildInputs`] is fixed before the first phase runs. Each phase returns
//! a [`PhaseResult`] with a typed payload, and the engine merges that payload
//! into the [`PhaseContext`] handed to the next phase. Nothing else is shared
//! between phases, and nothing at all between packages.

use std::collections::BTreeMap;
use std::path::PathBuf;

use debforge_config::{Config, IndexRefresh};
use debforge_core::{
    ArtifactRef, BuildMode, EnvironmentStatus, ExitCode, FailureKind, PackageId, Phase,
    StepOutput, UpstreamSource, Verdict,
};
use serde::{Deserialize, Serialize};

/// Version of the per-phase record layout
pub const RECORD_SCHEMA_VERSION: u32 = 1;

/// Options that shape one phase engine invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Mode used when neither the request nor the package set names one
    pub default_mode: BuildMode,
    pub include_retired: bool,
    /// Rebuild even when the index already has the package
    pub force: bool,
    pub binary: bool,
    pub auto_build: bool,
    pub max_auto_build_depth: usize,
    pub index_refresh: IndexRefresh,
    pub required_tools: Vec<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            default_mode: BuildMode::Release,
            include_retired: false,
            force: false,
            binary: true,
            auto_build: true,
            max_auto_build_depth: 10,
            index_refresh: IndexRefresh::PerPackage,
            required_tools: Vec::new(),
        }
    }
}

impl BuildOptions {
    /// Options from configuration with the given index refresh policy
    pub fn from_config(config: &Config, index_refresh: IndexRefresh) -> Self {
        Self {
            default_mode: config.default_mode,
            include_retired: config.build.include_retired,
            force: false,
            binary: config.build.binary,
            auto_build: config.build.auto_build,
            max_auto_build_depth: config.build.max_auto_build_depth,
            index_refresh,
            required_tools: config.build.required_tools.clone(),
        }
    }
}

/// Immutable input of one phase engine invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInputs {
    pub package: PackageId,
    /// Explicitly requested mode
    pub mode: Option<BuildMode>,
    pub series: String,
    pub run_id: String,
    pub run_dir: PathBuf,
    /// Dependencies the graph builder already arranged to be available
    pub assumed_deps: Vec<PackageId>,
    pub options: BuildOptions,
    /// Nesting depth of automatic dependency builds, 0 for requested packages
    pub depth: usize,
}

impl BuildInputs {
    pub fn new(
        package: PackageId,
        series: impl Into<String>,
        run_id: impl Into<String>,
        run_dir: impl Into<PathBuf>,
        options: BuildOptions,
    ) -> Self {
        Self {
            package,
            mode: None,
            series: series.into(),
            run_id: run_id.into(),
            run_dir: run_dir.into(),
            assumed_deps: Vec::new(),
            options,
            depth: 0,
        }
    }

    pub fn with_mode(mut self, mode: Option<BuildMode>) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_assumed_deps(mut self, deps: Vec<PackageId>) -> Self {
        self.assumed_deps = deps;
        self
    }

    /// Inputs for a nested build of a missing dependency
    ///
    /// Nested builds always regenerate the index so the parent can see them.
    pub fn for_dependency(&self, dependency: PackageId) -> Self {
        let mut options = self.options.clone();
        options.index_refresh = IndexRefresh::PerPackage;
        Self {
            package: dependency,
            mode: None,
            series: self.series.clone(),
            run_id: self.run_id.clone(),
            run_dir: self.run_dir.clone(),
            assumed_deps: Vec::new(),
            options,
            depth: self.depth + 1,
        }
    }

    /// Per-package working directory
    pub fn workdir(&self) -> PathBuf {
        self.run_dir.join("work").join(self.package.as_str())
    }

    /// Per-package log file
    pub fn log_path(&self) -> PathBuf {
        self.run_dir.join("logs").join(format!("{}.log", self.package))
    }

    /// Provenance record location
    pub fn provenance_path(&self) -> PathBuf {
        self.run_dir.join("provenance").join(format!("{}.yaml", self.package))
    }
}

/// Effective build mode and target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTarget {
    pub mode: BuildMode,
    pub series: String,
}

/// Outcome of an opaque packaging step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub exit_code: i32,
    pub message: String,
    pub data: BTreeMap<String, String>,
}

impl From<StepOutput> for StepRecord {
    fn from(output: StepOutput) -> Self {
        Self { exit_code: output.exit_code, message: output.message, data: output.data }
    }
}

/// Upstream artifact produced by the prepare step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareRecord {
    pub version: Option<String>,
    pub tarball: Option<PathBuf>,
    /// Signature verification result reported by the tool
    pub verification: Option<String>,
    pub step: StepRecord,
}

/// Result of comparing derived and assumed build dependencies
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRecord {
    pub derived: Vec<PackageId>,
    pub assumed: Vec<PackageId>,
    pub satisfied_by_index: Vec<PackageId>,
    /// Dependencies built by nested invocations
    pub auto_built: Vec<PackageId>,
}

/// Produced artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub tool_exit_code: i32,
    pub artifacts: Vec<ArtifactRef>,
}

/// Repository publication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRecord {
    pub published: Vec<PathBuf>,
    pub index_regenerated: bool,
}

/// Where provenance was written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub path: PathBuf,
}

/// Typed output of each phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum PhasePayload {
    None,
    Target(ResolvedTarget),
    Retirement { verdict: Verdict },
    Upstream(UpstreamSource),
    Policy { verdict: Verdict },
    Environment(EnvironmentStatus),
    Fetch(StepRecord),
    Prepare(PrepareRecord),
    Dependencies(DependencyRecord),
    Patch(StepRecord),
    Build(BuildRecord),
    Publish(PublishRecord),
    Provenance(ProvenanceRecord),
}

/// Outcome of one phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: Phase,
    pub success: bool,
    pub exit_code: ExitCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    pub message: String,
    pub payload: PhasePayload,
    pub schema_version: u32,
}

impl PhaseResult {
    pub fn ok(phase: Phase, payload: PhasePayload) -> Self {
        Self {
            phase,
            success: true,
            exit_code: ExitCode::Success,
            failure_kind: None,
            message: String::new(),
            payload,
            schema_version: RECORD_SCHEMA_VERSION,
        }
    }

    /// Failure whose kind follows from the exit code
    pub fn fail(phase: Phase, exit_code: ExitCode, message: impl Into<String>) -> Self {
        Self::fail_with(phase, exit_code, FailureKind::from_exit_code(exit_code), message)
    }

    pub fn fail_with(
        phase: Phase,
        exit_code: ExitCode,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            phase,
            success: false,
            exit_code,
            failure_kind: Some(kind),
            message: message.into(),
            payload: PhasePayload::None,
            schema_version: RECORD_SCHEMA_VERSION,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Outputs of every completed phase of one package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseContext {
    pub target: Option<ResolvedTarget>,
    pub retirement: Option<Verdict>,
    pub upstream: Option<UpstreamSource>,
    pub policy: Option<Verdict>,
    pub environment: Option<EnvironmentStatus>,
    pub fetch: Option<StepRecord>,
    pub prepare: Option<PrepareRecord>,
    pub dependencies: Option<DependencyRecord>,
    pub patch: Option<StepRecord>,
    pub build: Option<BuildRecord>,
    pub publish: Option<PublishRecord>,
    pub provenance: Option<ProvenanceRecord>,
    pub completed: Vec<Phase>,
}

impl PhaseContext {
    /// Merge a successful phase's payload forward
    pub fn merge(&mut self, result: PhaseResult) {
        match result.payload {
            PhasePayload::None => {}
            PhasePayload::Target(target) => self.target = Some(target),
            PhasePayload::Retirement { verdict } => self.retirement = Some(verdict),
            PhasePayload::Upstream(upstream) => self.upstream = Some(upstream),
            PhasePayload::Policy { verdict } => self.policy = Some(verdict),
            PhasePayload::Environment(status) => self.environment = Some(status),
            PhasePayload::Fetch(record) => self.fetch = Some(record),
            PhasePayload::Prepare(record) => self.prepare = Some(record),
            PhasePayload::Dependencies(record) => self.dependencies = Some(record),
            PhasePayload::Patch(record) => self.patch = Some(record),
            PhasePayload::Build(record) => self.build = Some(record),
            PhasePayload::Publish(record) => self.publish = Some(record),
            PhasePayload::Provenance(record) => self.provenance = Some(record),
        }
        self.completed.push(result.phase);
    }

    /// Effective mode, falling back to release before resolve-type ran
    pub fn mode(&self) -> BuildMode {
        self.target.as_ref().map(|t| t.mode).unwrap_or_default()
    }

    /// Structured step output accumulated so far, later steps winning
    pub fn step_data(&self) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();
        for record in [&self.fetch, &self.patch].into_iter().flatten() {
            data.extend(record.data.clone());
        }
        if let Some(prepare) = &self.prepare {
            data.extend(prepare.step.data.clone());
        }
        data
    }

    /// Upstream version determined by the prepare step
    pub fn version(&self) -> Option<&str> {
        self.prepare.as_ref().and_then(|p| p.version.as_deref())
    }
}
