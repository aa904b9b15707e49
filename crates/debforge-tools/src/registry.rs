//! Upstream registry from YAML
//!
//! ```yaml
//! default_url: https://opendev.org/openstack/{package}
//! default_branch: master
//! projects:
//!   python3-oslo.config:
//!     url: https://opendev.org/openstack/oslo.config
//!     branch: stable/2024.2
//! unregistered: [local-only]
//! ```
//!
//! Explicit project entries win. Without one the default URL template is
//! used; with neither, the package has no upstream.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use debforge_core::{PackageId, UpstreamRegistry, UpstreamSource};
use serde::{Deserialize, Serialize};

use crate::command::DEFAULT_BRANCH;
use crate::error::{Result, ToolsError};

/// Default upstream URL template
pub const DEFAULT_URL_TEMPLATE: &str = "https://opendev.org/openstack/{package}";

/// An explicit registry entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// [`UpstreamRegistry`] with explicit entries and a default rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YamlRegistry {
    #[serde(default)]
    pub default_url: Option<String>,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default)]
    pub projects: BTreeMap<PackageId, ProjectEntry>,
    /// Packages with no upstream, even by default
    #[serde(default)]
    pub unregistered: BTreeSet<PackageId>,
}

impl Default for YamlRegistry {
    fn default() -> Self {
        Self {
            default_url: Some(DEFAULT_URL_TEMPLATE.to_string()),
            default_branch: default_branch(),
            projects: BTreeMap::new(),
            unregistered: BTreeSet::new(),
        }
    }
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

impl YamlRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ToolsError::file_not_found("registry", path));
        }
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| ToolsError::invalid_file("registry", path, e.to_string()))
    }

    /// Load `path` when configured, otherwise use the default rule
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }
}

impl UpstreamRegistry for YamlRegistry {
    fn resolve(&self, id: &PackageId) -> Option<UpstreamSource> {
        if let Some(entry) = self.projects.get(id) {
            return Some(UpstreamSource {
                url: entry.url.clone(),
                branch: Some(entry.branch.clone().unwrap_or_else(|| self.default_branch.clone())),
                explicit: true,
            });
        }
        if self.unregistered.contains(id) {
            return None;
        }
        let template = self.default_url.as_ref()?;
        Some(UpstreamSource {
            url: template.replace("{package}", id.as_str()),
            branch: Some(self.default_branch.clone()),
            explicit: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> PackageId {
        PackageId::new(name).unwrap()
    }

    const REGISTRY: &str = r#"
default_url: https://opendev.org/openstack/{package}
projects:
  python3-oslo.config:
    url: https://opendev.org/openstack/oslo.config
    branch: stable/2024.2
  glance:
    url: https://github.com/openstack/glance
unregistered: [local-only]
"#;

    #[test]
    fn test_explicit_entry() {
        let registry: YamlRegistry = serde_yaml::from_str(REGISTRY).unwrap();
        let source = registry.resolve(&id("python3-oslo.config")).unwrap();
        assert_eq!(source.url, "https://opendev.org/openstack/oslo.config");
        assert_eq!(source.branch.as_deref(), Some("stable/2024.2"));
        assert!(source.explicit);

        let glance = registry.resolve(&id("glance")).unwrap();
        assert_eq!(glance.branch.as_deref(), Some("master"));
    }

    #[test]
    fn test_default_rule() {
        let registry: YamlRegistry = serde_yaml::from_str(REGISTRY).unwrap();
        let source = registry.resolve(&id("nova")).unwrap();
        assert_eq!(source.url, "https://opendev.org/openstack/nova");
        assert!(!source.explicit);
        assert!(registry.resolve(&id("local-only")).is_none());
    }

    #[test]
    fn test_no_default_rule() {
        let registry: YamlRegistry = serde_yaml::from_str("projects: {}\n").unwrap();
        assert!(registry.resolve(&id("nova")).is_none());
        assert!(YamlRegistry::default().resolve(&id("nova")).is_some());
    }
}
