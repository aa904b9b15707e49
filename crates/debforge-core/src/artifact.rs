//! References to produced build artifacts

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Artifact file type, derived from the file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Deb,
    Udeb,
    Ddeb,
    Dsc,
    Changes,
    Buildinfo,
    Tarball,
    Other,
}

impl ArtifactKind {
    /// Classify a file by its name
    pub fn from_path(path: &Path) -> Self {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name.ends_with(".deb") {
            if name.contains("-dbgsym_") {
                ArtifactKind::Ddeb
            } else {
                ArtifactKind::Deb
            }
        } else if name.ends_with(".udeb") {
            ArtifactKind::Udeb
        } else if name.ends_with(".ddeb") {
            ArtifactKind::Ddeb
        } else if name.ends_with(".dsc") {
            ArtifactKind::Dsc
        } else if name.ends_with(".changes") {
            ArtifactKind::Changes
        } else if name.ends_with(".buildinfo") {
            ArtifactKind::Buildinfo
        } else if name.contains(".orig.tar.")
            || name.contains(".debian.tar.")
            || name.ends_with(".tar.gz")
            || name.ends_with(".tar.xz")
        {
            ArtifactKind::Tarball
        } else {
            ArtifactKind::Other
        }
    }

    /// Binary packages installable from the repository
    pub fn is_binary(self) -> bool {
        matches!(self, ArtifactKind::Deb | ArtifactKind::Udeb | ArtifactKind::Ddeb)
    }
}

/// A produced artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl ArtifactRef {
    /// Reference a file without reading it
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let kind = ArtifactKind::from_path(&path);
        Self { path, kind, size: 0, sha256: None }
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name()?.to_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_kind_classification() {
        assert_eq!(ArtifactKind::from_path(Path::new("nova_27.0-1_all.deb")), ArtifactKind::Deb);
        assert_eq!(
            ArtifactKind::from_path(Path::new("nova-dbgsym_27.0-1_amd64.deb")),
            ArtifactKind::Ddeb
        );
        assert_eq!(ArtifactKind::from_path(Path::new("nova_27.0-1.dsc")), ArtifactKind::Dsc);
        assert_eq!(
            ArtifactKind::from_path(Path::new("nova_27.0.orig.tar.gz")),
            ArtifactKind::Tarball
        );
        assert_eq!(
            ArtifactKind::from_path(Path::new("nova_27.0-1_source.changes")),
            ArtifactKind::Changes
        );
        assert_eq!(ArtifactKind::from_path(Path::new("build.log")), ArtifactKind::Other);
        assert!(ArtifactKind::Udeb.is_binary());
        assert!(!ArtifactKind::Dsc.is_binary());
    }
}
