//! Package identifiers, build modes and graph node state

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Canonical package identifier, unique within a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageId(String);

impl PackageId {
    /// Create an identifier, rejecting empty names and embedded whitespace
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidPackageId { id, reason: "empty identifier".to_string() });
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(Error::InvalidPackageId {
                id,
                reason: "identifier contains whitespace".to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PackageId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for PackageId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<PackageId> for String {
    fn from(id: PackageId) -> Self {
        id.0
    }
}

impl Borrow<str> for PackageId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for PackageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Requested build mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    /// Build the latest upstream release
    #[default]
    Release,
    /// Build a snapshot of the upstream development branch
    Snapshot,
    /// Build an upstream milestone or release candidate
    Milestone,
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildMode::Release => "release",
            BuildMode::Snapshot => "snapshot",
            BuildMode::Milestone => "milestone",
        };
        f.write_str(s)
    }
}

impl FromStr for BuildMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "release" => Ok(Self::Release),
            "snapshot" => Ok(Self::Snapshot),
            "milestone" => Ok(Self::Milestone),
            _ => Err(Error::InvalidMode { value: s.to_string() }),
        }
    }
}

/// Lifecycle status of a node in a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeStatus {
    #[default]
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    /// Excluded by retirement or policy, directly or through a dependency
    SkippedBlocked,
    /// A dependency failed or was skipped in this run
    SkippedDependencyFailed,
}

impl NodeStatus {
    /// Whether no further transition is expected in this run
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Succeeded
                | NodeStatus::Failed
                | NodeStatus::SkippedBlocked
                | NodeStatus::SkippedDependencyFailed
        )
    }

    pub fn is_skipped(self) -> bool {
        matches!(self, NodeStatus::SkippedBlocked | NodeStatus::SkippedDependencyFailed)
    }

    pub fn is_success(self) -> bool {
        self == NodeStatus::Succeeded
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Ready => "ready",
            NodeStatus::Running => "running",
            NodeStatus::Succeeded => "succeeded",
            NodeStatus::Failed => "failed",
            NodeStatus::SkippedBlocked => "skipped-blocked",
            NodeStatus::SkippedDependencyFailed => "skipped-dependency-failed",
        };
        f.write_str(s)
    }
}

/// Allow/block answer from the retirement and policy oracle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    #[default]
    Allow,
    Block { reason: String },
}

impl Verdict {
    pub fn block(reason: impl Into<String>) -> Self {
        Self::Block { reason: reason.into() }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Verdict::Block { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Allow => None,
            Verdict::Block { reason } => Some(reason),
        }
    }
}

/// A package discovered by the graph builder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageNode {
    /// Canonical identifier
    pub id: PackageId,
    /// Requested build mode
    pub mode: BuildMode,
    /// Build dependencies as declared by the managed set
    pub build_deps: Vec<PackageId>,
    /// Retirement verdict
    #[serde(default)]
    pub retirement: Verdict,
    /// Eligibility policy verdict
    #[serde(default)]
    pub policy: Verdict,
    /// Current status
    #[serde(default)]
    pub status: NodeStatus,
    /// Why the node is in its current status, when not self-evident
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PackageNode {
    pub fn new(id: PackageId, mode: BuildMode, build_deps: Vec<PackageId>) -> Self {
        Self {
            id,
            mode,
            build_deps,
            retirement: Verdict::Allow,
            policy: Verdict::Allow,
            status: NodeStatus::Pending,
            reason: None,
        }
    }

    /// Whether retirement or policy excludes this node
    pub fn is_excluded(&self) -> bool {
        self.retirement.is_blocked() || self.policy.is_blocked()
    }
}
