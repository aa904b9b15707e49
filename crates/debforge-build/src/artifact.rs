//! Build artifact collection

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use debforge_core::{ArtifactKind, ArtifactRef};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{BuildError, Result};

/// Compute the hex SHA-256 digest of a file
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Finds and describes produced artifacts in a package work directory
pub struct ArtifactCollector {
    /// Directory scanned for artifacts
    root: PathBuf,
}

impl ArtifactCollector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Scan the work directory for package files
    ///
    /// Upstream tarballs and unrecognised files are not artifacts of the
    /// build step. The result is sorted by path.
    pub fn collect(&self) -> Result<Vec<ArtifactRef>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut artifacts = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = entry.map_err(|e| BuildError::ArtifactCollection {
                reason: format!("Failed to walk {}: {e}", self.root.display()),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let kind = ArtifactKind::from_path(entry.path());
            if matches!(kind, ArtifactKind::Other | ArtifactKind::Tarball) {
                continue;
            }
            artifacts.push(Self::describe(entry.path())?);
        }

        artifacts.sort_by(|a, b| a.path.cmp(&b.path));
        info!("Collected {} artifacts from {}", artifacts.len(), self.root.display());
        Ok(artifacts)
    }

    /// Describe one file with size and checksum
    pub fn describe(path: &Path) -> Result<ArtifactRef> {
        let metadata = fs::metadata(path).map_err(|e| BuildError::ArtifactCollection {
            reason: format!("Artifact {} is not readable: {e}", path.display()),
        })?;
        let mut artifact = ArtifactRef::new(path);
        artifact.size = metadata.len();
        artifact.sha256 = Some(sha256_file(path)?);
        debug!("Artifact {} ({:?}, {} bytes)", path.display(), artifact.kind, artifact.size);
        Ok(artifact)
    }

    /// Describe a list of reported paths, failing on the first missing one
    pub fn describe_all(paths: &[PathBuf]) -> Result<Vec<ArtifactRef>> {
        paths.iter().map(|p| Self::describe(p)).collect()
    }
}
