//! Package index stored as `<repository>/index.yaml`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use debforge_core::{AvailablePackage, PackageId, PackageIndex};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, ToolsError};

/// File name of the index inside the repository root
pub const INDEX_FILE: &str = "index.yaml";

/// On-disk index: package name to version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFile {
    #[serde(default)]
    pub packages: BTreeMap<String, String>,
}

impl IndexFile {
    /// Load an index, treating a missing file as empty
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_yaml::from_str(&content)
                .map_err(|e| ToolsError::invalid_file("index", path, e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the index file atomically
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        let tmp = path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// [`PackageIndex`] over the local repository index file
#[derive(Debug)]
pub struct FileIndex {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileIndex {
    /// Open the index of the repository at `root`
    pub fn open(root: &Path) -> Result<Self> {
        let path = root.join(INDEX_FILE);
        let file = IndexFile::load(&path)?;
        debug!("Loaded {} index entries from {}", file.packages.len(), path.display());
        Ok(Self { path, entries: RwLock::new(file.packages) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PackageIndex for FileIndex {
    fn lookup(&self, id: &PackageId) -> Option<AvailablePackage> {
        let entries = match self.entries.read() {
            Ok(entries) => entries,
            Err(poisoned) => {
                warn!("Index lock poisoned, reading last known entries");
                poisoned.into_inner()
            }
        };
        entries
            .get(id.as_str())
            .map(|version| AvailablePackage { id: id.clone(), version: version.clone() })
    }

    fn refresh(&self) -> debforge_core::Result<()> {
        let file = IndexFile::load(&self.path)?;
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        *entries = file.packages;
        debug!("Refreshed index: {} entries", entries.len());
        Ok(())
    }
}
