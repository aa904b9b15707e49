//! Local package repository
//!
//! Published artifacts are copied to `<root>/pool/<package>/`, replacing
//! whatever an earlier publish left there. Regenerating the index lays the
//! pool contents over the existing entries: packages that were already
//! available from outside the pool keep their entries, and regenerating
//! twice gives the same file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use debforge_core::{ArtifactKind, PackageId, Publisher, StepOutput};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, ToolsError};
use crate::index::{IndexFile, INDEX_FILE};

/// [`Publisher`] writing into a directory-backed repository
#[derive(Debug, Clone)]
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pool_dir(&self) -> PathBuf {
        self.root.join("pool")
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// Copy `artifacts` into the pool directory of `package`
    pub async fn store(&self, package: &PackageId, artifacts: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let dest_dir = self.pool_dir().join(package.as_str());
        if tokio::fs::metadata(&dest_dir).await.is_ok() {
            tokio::fs::remove_dir_all(&dest_dir).await?;
        }
        tokio::fs::create_dir_all(&dest_dir).await?;

        let mut stored = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let file_name = artifact.file_name().ok_or_else(|| {
                ToolsError::repository(format!("Invalid artifact path: {}", artifact.display()))
            })?;
            let dest = dest_dir.join(file_name);
            tokio::fs::copy(artifact, &dest).await.map_err(|e| {
                ToolsError::repository(format!("cannot copy {}: {e}", artifact.display()))
            })?;
            debug!("Copied {} to pool", file_name.to_string_lossy());
            stored.push(dest);
        }
        Ok(stored)
    }

    /// Merge the pool contents into the index
    pub async fn rebuild_index(&self) -> Result<IndexFile> {
        let pool = self.pool_dir();
        let mut index = IndexFile::load(&self.index_path())?;
        if pool.is_dir() {
            index.packages.extend(scan_pool(&pool));
        }
        tokio::fs::create_dir_all(&self.root).await?;
        index.save(&self.index_path()).await?;
        info!("Repository index rewritten with {} entries", index.packages.len());
        Ok(index)
    }
}

/// Package versions found in the pool
///
/// Binary packages are indexed by their own names, sources by their
/// `.dsc`, and every pool directory by its package name.
fn scan_pool(pool: &Path) -> BTreeMap<String, String> {
    let mut packages = BTreeMap::new();
    let mut directories: BTreeMap<String, String> = BTreeMap::new();

    let mut files: Vec<PathBuf> = WalkDir::new(pool)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    files.sort();

    for path in files {
        let Some((name, version)) = name_and_version(&path) else {
            continue;
        };
        let directory = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned());
        if let Some(directory) = directory {
            let is_source = ArtifactKind::from_path(&path) == ArtifactKind::Dsc;
            if is_source || !directories.contains_key(&directory) {
                directories.insert(directory, version.clone());
            }
        }
        packages.insert(name, version);
    }

    for (directory, version) in directories {
        packages.entry(directory).or_insert(version);
    }
    packages
}

/// Package name and version from a Debian file name
fn name_and_version(path: &Path) -> Option<(String, String)> {
    let kind = ArtifactKind::from_path(path);
    if !kind.is_binary() && kind != ArtifactKind::Dsc {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let mut parts = stem.split('_');
    let name = parts.next()?;
    let version = parts.next()?;
    Some((name.to_string(), version.to_string()))
}

#[async_trait]
impl Publisher for LocalRepository {
    async fn publish(&self, package: &PackageId, artifacts: &[PathBuf]) -> StepOutput {
        match self.store(package, artifacts).await {
            Ok(stored) => {
                info!("Published {} files for {}", stored.len(), package);
                StepOutput::ok().with_data("published", stored.len().to_string())
            }
            Err(e) => {
                warn!("Publishing {} failed: {}", package, e);
                StepOutput::failure(1, e.to_string())
            }
        }
    }

    async fn regenerate_index(&self) -> StepOutput {
        match self.rebuild_index().await {
            Ok(index) => StepOutput::ok().with_data("entries", index.packages.len().to_string()),
            Err(e) => StepOutput::failure(1, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn write(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, name).unwrap();
        path
    }

    #[tokio::test]
    async fn test_publish_and_regenerate() {
        let build = TempDir::new().unwrap();
        let repo_dir = TempDir::new().unwrap();
        let repo = LocalRepository::new(repo_dir.path());
        let nova = PackageId::new("nova").unwrap();

        let artifacts = vec![
            write(build.path(), "nova_29.0.0-0ubuntu1.dsc"),
            write(build.path(), "python3-nova_29.0.0-0ubuntu1_all.deb"),
            write(build.path(), "nova-common_29.0.0-0ubuntu1_all.deb"),
        ];
        let output = repo.publish(&nova, &artifacts).await;
        assert!(output.success, "{}", output.message);
        assert!(repo.pool_dir().join("nova/python3-nova_29.0.0-0ubuntu1_all.deb").exists());

        let output = repo.regenerate_index().await;
        assert!(output.success);
        let index = IndexFile::load(&repo.index_path()).unwrap();
        assert_eq!(index.packages["nova"], "29.0.0-0ubuntu1");
        assert_eq!(index.packages["python3-nova"], "29.0.0-0ubuntu1");
        assert_eq!(index.packages["nova-common"], "29.0.0-0ubuntu1");

        let first = std::fs::read(repo.index_path()).unwrap();
        repo.regenerate_index().await;
        assert_eq!(std::fs::read(repo.index_path()).unwrap(), first);
    }

    #[tokio::test]
    async fn test_regenerate_keeps_externally_available_entries() {
        let build = TempDir::new().unwrap();
        let repo_dir = TempDir::new().unwrap();
        let repo = LocalRepository::new(repo_dir.path());
        std::fs::write(
            repo.index_path(),
            "packages:\n  python3-oslo.config: 1:9.4.0-0ubuntu1\n  nova: 28.0.0-1\n",
        )
        .unwrap();

        let nova = PackageId::new("nova").unwrap();
        repo.publish(&nova, &[write(build.path(), "nova_29.0.0-1_all.deb")]).await;
        let output = repo.regenerate_index().await;
        assert!(output.success, "{}", output.message);

        let index = IndexFile::load(&repo.index_path()).unwrap();
        assert_eq!(index.packages["python3-oslo.config"], "1:9.4.0-0ubuntu1");
        assert_eq!(index.packages["nova"], "29.0.0-1");
    }

    #[tokio::test]
    async fn test_republish_replaces_old_files() {
        let build = TempDir::new().unwrap();
        let repo_dir = TempDir::new().unwrap();
        let repo = LocalRepository::new(repo_dir.path());
        let id = PackageId::new("python-oslo.log").unwrap();

        let old = write(build.path(), "python3-oslo.log_5.0.0-1_all.deb");
        repo.publish(&id, &[old]).await;
        let new = write(build.path(), "python3-oslo.log_5.1.0-1_all.deb");
        repo.publish(&id, &[new]).await;

        let index = repo.rebuild_index().await.unwrap();
        assert_eq!(index.packages["python3-oslo.log"], "5.1.0-1");
        assert_eq!(index.packages["python-oslo.log"], "5.1.0-1");
    }

    #[tokio::test]
    async fn test_publish_missing_artifact_fails() {
        let repo_dir = TempDir::new().unwrap();
        let repo = LocalRepository::new(repo_dir.path());
        let id = PackageId::new("nova").unwrap();

        let output = repo.publish(&id, &[PathBuf::from("/nonexistent/nova_1_all.deb")]).await;
        assert!(!output.success);
        assert!(output.message.contains("cannot copy"));
    }

    #[test]
    fn test_name_and_version() {
        assert_eq!(
            name_and_version(Path::new("python3-nova_29.0.0-1_all.deb")),
            Some(("python3-nova".to_string(), "29.0.0-1".to_string()))
        );
        assert_eq!(
            name_and_version(Path::new("nova_2:29.0.0-1.dsc")),
            Some(("nova".to_string(), "2:29.0.0-1".to_string()))
        );
        assert_eq!(name_and_version(Path::new("nova_29.0.0.orig.tar.gz")), None);
    }
}
