//! The managed package set
//!
//! ```yaml
//! packages:
//!   nova:
//!     build_deps: [python3-oslo.config, python3-oslo.log]
//!     mode: release
//!   python3-oslo.log: {}
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use debforge_core::{BuildMode, DependencySource, PackageId, TargetResolver};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ToolsError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PackageSetFile {
    #[serde(default)]
    packages: BTreeMap<String, PackageEntry>,
}

/// One managed package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEntry {
    #[serde(default)]
    pub build_deps: Vec<PackageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<BuildMode>,
}

/// [`DependencySource`] and [`TargetResolver`] over the packages file
#[derive(Debug, Clone, Default)]
pub struct ManagedSet {
    packages: BTreeMap<PackageId, PackageEntry>,
}

impl ManagedSet {
    /// Load the package set from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ToolsError::file_not_found("packages", path));
        }
        let content = std::fs::read_to_string(path)?;
        let set = Self::from_yaml(&content)
            .map_err(|e| ToolsError::invalid_file("packages", path, e.to_string()))?;
        debug!("Loaded {} managed packages from {}", set.len(), path.display());
        Ok(set)
    }

    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        let file: PackageSetFile = serde_yaml::from_str(content)?;
        let mut packages = BTreeMap::new();
        for (name, entry) in file.packages {
            let id = PackageId::new(name).map_err(<serde_yaml::Error as serde::de::Error>::custom)?;
            packages.insert(id, entry);
        }
        Ok(Self { packages })
    }

    pub fn insert(&mut self, id: PackageId, entry: PackageEntry) {
        self.packages.insert(id, entry);
    }

    pub fn contains(&self, id: &PackageId) -> bool {
        self.packages.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &PackageId> {
        self.packages.keys()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Resolve several expressions, keeping the first occurrence of each id
    pub fn resolve_all<S: AsRef<str>>(&self, expressions: &[S]) -> debforge_core::Result<Vec<PackageId>> {
        let mut resolved: Vec<PackageId> = Vec::new();
        for expression in expressions {
            for id in self.resolve(expression.as_ref())? {
                if !resolved.contains(&id) {
                    resolved.push(id);
                }
            }
        }
        Ok(resolved)
    }
}

impl DependencySource for ManagedSet {
    fn declared_build_deps(&self, id: &PackageId) -> Option<Vec<PackageId>> {
        self.packages.get(id).map(|entry| entry.build_deps.clone())
    }

    fn mode(&self, id: &PackageId) -> Option<BuildMode> {
        self.packages.get(id).and_then(|entry| entry.mode)
    }
}

impl TargetResolver for ManagedSet {
    /// Accepts an exact identifier, `all`, or a `prefix*` glob
    fn resolve(&self, expression: &str) -> debforge_core::Result<Vec<PackageId>> {
        let expression = expression.trim();
        let matched: Vec<PackageId> = if expression == "all" {
            self.packages.keys().cloned().collect()
        } else if let Some(prefix) = expression.strip_suffix('*') {
            self.packages.keys().filter(|id| id.as_str().starts_with(prefix)).cloned().collect()
        } else {
            let id = PackageId::new(expression)?;
            if self.contains(&id) {
                vec![id]
            } else {
                Vec::new()
            }
        };

        if matched.is_empty() {
            return Err(debforge_core::Error::UnresolvedTarget { expression: expression.to_string() });
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const PACKAGES: &str = r#"
packages:
  nova:
    build_deps: [python3-oslo.config, python3-oslo.log]
    mode: snapshot
  python3-oslo.config: {}
  python3-oslo.log:
    build_deps: [python3-oslo.config]
"#;

    fn id(name: &str) -> PackageId {
        PackageId::new(name).unwrap()
    }

    #[test]
    fn test_declared_deps_and_mode() {
        let set = ManagedSet::from_yaml(PACKAGES).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(
            set.declared_build_deps(&id("nova")),
            Some(vec![id("python3-oslo.config"), id("python3-oslo.log")])
        );
        assert_eq!(set.declared_build_deps(&id("python3-oslo.config")), Some(Vec::new()));
        assert_eq!(set.declared_build_deps(&id("glance")), None);
        assert_eq!(set.mode(&id("nova")), Some(BuildMode::Snapshot));
        assert_eq!(set.mode(&id("python3-oslo.log")), None);
    }

    #[test]
    fn test_resolve_expressions() {
        let set = ManagedSet::from_yaml(PACKAGES).unwrap();
        assert_eq!(set.resolve("nova").unwrap(), vec![id("nova")]);
        assert_eq!(set.resolve("all").unwrap().len(), 3);
        assert_eq!(
            set.resolve("python3-oslo*").unwrap(),
            vec![id("python3-oslo.config"), id("python3-oslo.log")]
        );
        assert!(matches!(
            set.resolve("glance"),
            Err(debforge_core::Error::UnresolvedTarget { .. })
        ));
        assert!(set.resolve("keystone*").is_err());
    }

    #[test]
    fn test_resolve_all_deduplicates() {
        let set = ManagedSet::from_yaml(PACKAGES).unwrap();
        let resolved = set.resolve_all(&["python3-oslo.log", "python3-oslo*", "nova"]).unwrap();
        assert_eq!(
            resolved,
            vec![id("python3-oslo.log"), id("python3-oslo.config"), id("nova")]
        );
    }

    #[test]
    fn test_invalid_identifier_is_a_yaml_error() {
        let err = ManagedSet::from_yaml("packages:\n  \"nova compute\": {}\n").unwrap_err();
        assert!(err.to_string().contains("whitespace"));
    }

    #[test]
    fn test_load_errors() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("packages.yaml");
        assert!(matches!(ManagedSet::load(&missing), Err(ToolsError::FileNotFound { .. })));

        std::fs::write(&missing, "packages:\n  \"bad id\": {}\n").unwrap();
        assert!(matches!(ManagedSet::load(&missing), Err(ToolsError::InvalidFile { .. })));
    }
}
