//! Retirement and build-mode policy from YAML
//!
//! ```yaml
//! retired:
//!   murano: "Retired upstream in 2024.1"
//! snapshot_deny:
//!   - nova
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use debforge_core::{BuildMode, PackageId, PolicyGate, Verdict};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ToolsError};

/// [`PolicyGate`] backed by a retirement file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct YamlPolicy {
    /// Retired projects and the reason shown to the user
    #[serde(default)]
    pub retired: BTreeMap<PackageId, String>,
    /// Packages that must not be built from snapshots
    #[serde(default)]
    pub snapshot_deny: BTreeSet<PackageId>,
}

impl YamlPolicy {
    /// A policy that allows everything
    pub fn permissive() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ToolsError::file_not_found("retirement", path));
        }
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| ToolsError::invalid_file("retirement", path, e.to_string()))
    }

    /// Load `path` when configured, otherwise allow everything
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::permissive()), Self::load)
    }
}

impl PolicyGate for YamlPolicy {
    fn retirement(&self, id: &PackageId) -> Verdict {
        match self.retired.get(id) {
            Some(reason) if reason.trim().is_empty() => Verdict::block("project is retired"),
            Some(reason) => Verdict::block(reason.clone()),
            None => Verdict::Allow,
        }
    }

    fn eligibility(&self, id: &PackageId, mode: BuildMode) -> Verdict {
        if mode == BuildMode::Snapshot && self.snapshot_deny.contains(id) {
            Verdict::block(format!("snapshot builds of {id} are not allowed"))
        } else {
            Verdict::Allow
        }
    }
}
