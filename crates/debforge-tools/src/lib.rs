//! Concrete collaborators for debforge
//!
//! Subprocess-backed packaging steps, a host build environment, and
//! file-backed implementations of the package index, repository, managed
//! package set, policy gate and upstream registry.

pub mod command;
pub mod control;
pub mod environment;
pub mod error;
pub mod index;
pub mod managed;
pub mod policy;
pub mod registry;
pub mod repository;

pub use command::{CommandSteps, COMMAND_NOT_FOUND};
pub use environment::HostEnvironment;
pub use error::{Result, ToolsError};
pub use index::{FileIndex, IndexFile};
pub use managed::{ManagedSet, PackageEntry};
pub use policy::YamlPolicy;
pub use registry::YamlRegistry;
pub use repository::LocalRepository;
