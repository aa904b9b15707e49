//! Dependency graph construction for debforge
//!
//! Expands requested roots into the transitive build-dependency closure,
//! detects cycles and missing packages before any build time is spent, and
//! partitions the result into topological batches for the schedulers.

pub mod builder;
pub mod error;
pub mod graph;

pub use builder::GraphBuilder;
pub use error::{GraphError, MissingPackage, Result};
pub use graph::{Batch, DependencyGraph, ExcludedNode, ExclusionKind};
