//! Traits for the external collaborators the build core depends on
//!
//! The graph builder and the phase engine only talk to the outside world
//! through these seams. Concrete subprocess and file-backed implementations
//! live in `debforge-tools`; tests substitute in-memory mocks.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::package::{BuildMode, PackageId, Verdict};

/// A package already available from an index or repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailablePackage {
    pub id: PackageId,
    pub version: String,
}

/// Externally-satisfied lookup
pub trait PackageIndex: Send + Sync {
    /// Is `id` already available, and at what version
    fn lookup(&self, id: &PackageId) -> Option<AvailablePackage>;

    /// Reload after the repository index was regenerated
    fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

/// Source of declared build dependencies for the managed package set
pub trait DependencySource: Send + Sync {
    /// Declared build dependencies, or `None` when `id` is not buildable here
    fn declared_build_deps(&self, id: &PackageId) -> Option<Vec<PackageId>>;

    /// Requested build mode for `id`, if the managed set pins one
    fn mode(&self, _id: &PackageId) -> Option<BuildMode> {
        None
    }
}

/// Turns user-supplied target expressions into canonical identifiers
pub trait TargetResolver: Send + Sync {
    fn resolve(&self, expression: &str) -> Result<Vec<PackageId>>;
}

/// Retirement and eligibility oracle
pub trait PolicyGate: Send + Sync {
    /// Whether the upstream project is retired
    fn retirement(&self, id: &PackageId) -> Verdict;

    /// Any remaining eligibility rule for building `id` in `mode`
    fn eligibility(&self, id: &PackageId, mode: BuildMode) -> Verdict;
}

/// Where the upstream source of a package comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamSource {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Explicit registry entry, as opposed to a default rule
    pub explicit: bool,
}

/// Upstream registry lookup
pub trait UpstreamRegistry: Send + Sync {
    fn resolve(&self, id: &PackageId) -> Option<UpstreamSource>;
}

/// State of the isolated build environment for a series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentStatus {
    pub series: String,
    /// Created on demand during this invocation
    pub created: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<PathBuf>,
}

/// Tool and environment readiness probe
#[async_trait]
pub trait BuildEnvironment: Send + Sync {
    /// Required tools that are not available
    async fn missing_tools(&self, required: &[String]) -> Vec<String>;

    /// Whether the environment for `series` is ready
    async fn is_ready(&self, series: &str) -> bool;

    /// Whether `create` is supported
    fn supports_create(&self) -> bool {
        false
    }

    /// Create the environment for `series` on demand
    async fn create(&self, series: &str) -> Result<EnvironmentStatus>;
}

/// Input handed to every packaging step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRequest {
    pub package: PackageId,
    pub mode: BuildMode,
    pub series: String,
    /// Per-package working directory inside the run directory
    pub workdir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Also produce binary packages
    pub binary: bool,
    /// Structured output merged from earlier steps
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// Result of one opaque packaging step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutput {
    pub success: bool,
    /// Raw exit status of the underlying tool
    pub exit_code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
}

impl StepOutput {
    pub fn ok() -> Self {
        Self { success: true, ..Default::default() }
    }

    pub fn failure(exit_code: i32, message: impl Into<String>) -> Self {
        Self { success: false, exit_code, message: message.into(), ..Default::default() }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifacts.push(path.into());
        self
    }
}

/// Fetch, prepare, import/patch and build steps
#[async_trait]
pub trait PackagingSteps: Send + Sync {
    /// Acquire the packaging source tree
    async fn fetch(&self, request: &StepRequest) -> StepOutput;

    /// Acquire or derive the upstream source artifact
    async fn prepare(&self, request: &StepRequest) -> StepOutput;

    /// Build dependencies declared by the prepared source tree
    async fn derive_build_deps(&self, request: &StepRequest) -> Result<Vec<PackageId>>;

    /// Import the upstream artifact and apply the patch queue
    async fn import_and_patch(&self, request: &StepRequest) -> StepOutput;

    /// Produce source and optionally binary packages
    async fn build(&self, request: &StepRequest) -> StepOutput;
}

/// Shared package repository
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Copy artifacts into the repository
    async fn publish(&self, package: &PackageId, artifacts: &[PathBuf]) -> StepOutput;

    /// Rewrite the repository index
    async fn regenerate_index(&self) -> StepOutput;
}
