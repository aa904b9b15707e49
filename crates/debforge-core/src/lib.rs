//! Core types and traits for debforge
//!
//! This crate provides the data structures, exit-code taxonomy, error types
//! and collaborator traits shared by the graph builder, the phase engine and
//! the schedulers.

pub mod artifact;
pub mod collaborators;
pub mod error;
pub mod exit_code;
pub mod outcome;
pub mod package;

pub use artifact::{ArtifactKind, ArtifactRef};
pub use collaborators::{
    AvailablePackage, BuildEnvironment, DependencySource, EnvironmentStatus, PackageIndex,
    PackagingSteps, PolicyGate, Publisher, StepOutput, StepRequest, TargetResolver,
    UpstreamRegistry, UpstreamSource,
};
pub use error::{Error, Result};
pub use exit_code::ExitCode;
pub use outcome::{BuildOutcome, FailureKind, Phase};
pub use package::{BuildMode, NodeStatus, PackageId, PackageNode, Verdict};
