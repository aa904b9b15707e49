//! Build provenance records
//!
//! One YAML document per built package, written after publication. The
//! document is informational: failing to write it never fails the build.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use debforge_core::{ArtifactRef, BuildMode, PackageId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::artifact::sha256_file;
use crate::context::{BuildInputs, PhaseContext};
use crate::error::Result;

/// Where the upstream source came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamProvenance {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// `registry_explicit` or `registry_defaults`
    pub resolution_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

/// The upstream tarball that was imported
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TarballProvenance {
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Build tool results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStepProvenance {
    pub exit_code: i32,
    pub artifacts: Vec<ArtifactRef>,
}

/// Full provenance document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub package: PackageId,
    pub run_id: String,
    pub mode: BuildMode,
    pub series: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamProvenance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tarball: Option<TarballProvenance>,
    /// Signature verification result reported by the prepare step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<String>,
    pub build: BuildStepProvenance,
    /// Dependencies built automatically during this build
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auto_built: Vec<PackageId>,
    pub recorded_at: DateTime<Utc>,
}

impl Provenance {
    /// Assemble provenance from the accumulated phase context
    pub fn from_context(inputs: &BuildInputs, context: &PhaseContext) -> Self {
        let data = context.step_data();
        let upstream = context.upstream.as_ref().map(|source| UpstreamProvenance {
            url: source.url.clone(),
            branch: source.branch.clone(),
            resolution_source: if source.explicit {
                "registry_explicit".to_string()
            } else {
                "registry_defaults".to_string()
            },
            revision: data.get("revision").cloned(),
        });

        let tarball = context.prepare.as_ref().and_then(|p| p.tarball.as_ref()).map(|path| {
            TarballProvenance { path: path.clone(), sha256: checksum_if_present(path) }
        });

        Self {
            package: inputs.package.clone(),
            run_id: inputs.run_id.clone(),
            mode: context.mode(),
            series: inputs.series.clone(),
            version: context.version().map(str::to_string),
            upstream,
            tarball,
            verification: context.prepare.as_ref().and_then(|p| p.verification.clone()),
            build: context
                .build
                .as_ref()
                .map(|b| BuildStepProvenance {
                    exit_code: b.tool_exit_code,
                    artifacts: b.artifacts.clone(),
                })
                .unwrap_or_default(),
            auto_built: context
                .dependencies
                .as_ref()
                .map(|d| d.auto_built.clone())
                .unwrap_or_default(),
            recorded_at: Utc::now(),
        }
    }

    /// Write the document as YAML, creating parent directories
    pub async fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_yaml::to_string(self)?).await?;
        debug!("Wrote provenance for {} to {}", self.package, path.display());
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

fn checksum_if_present(path: &Path) -> Option<String> {
    path.exists().then(|| sha256_file(path).ok()).flatten()
}

#[cfg(test)]
mod tests {
    use debforge_core::{Phase, UpstreamSource};

    use std::fs;

    use super::*;
    use crate::context::{
        BuildOptions, PhasePayload, PhaseResult, PrepareRecord, ResolvedTarget, StepRecord,
    };

    #[tokio::test]
    async fn test_provenance_from_context() {
        let dir = tempfile::tempdir().unwrap();
        let tarball = dir.path().join("nova_29.0.0.orig.tar.gz");
        fs::write(&tarball, b"upstream").unwrap();

        let inputs = BuildInputs::new(
            PackageId::new("nova").unwrap(),
            "noble",
            "r1",
            dir.path(),
            BuildOptions::default(),
        );
        let mut context = PhaseContext::default();
        context.merge(PhaseResult::ok(
            Phase::ResolveType,
            PhasePayload::Target(ResolvedTarget {
                mode: BuildMode::Release,
                series: "noble".to_string(),
            }),
        ));
        context.merge(PhaseResult::ok(
            Phase::RegistryResolution,
            PhasePayload::Upstream(UpstreamSource {
                url: "https://opendev.org/openstack/nova".to_string(),
                branch: None,
                explicit: false,
            }),
        ));
        context.merge(PhaseResult::ok(
            Phase::Prepare,
            PhasePayload::Prepare(PrepareRecord {
                version: Some("29.0.0".to_string()),
                tarball: Some(tarball.clone()),
                verification: Some("verified".to_string()),
                step: StepRecord { exit_code: 0, message: String::new(), data: Default::default() },
            }),
        ));

        let provenance = Provenance::from_context(&inputs, &context);
        assert_eq!(provenance.version.as_deref(), Some("29.0.0"));
        assert_eq!(provenance.upstream.as_ref().unwrap().resolution_source, "registry_defaults");
        assert_eq!(provenance.tarball.as_ref().unwrap().sha256.as_ref().unwrap().len(), 64);

        let path = inputs.provenance_path();
        provenance.write(&path).await.unwrap();
        let loaded = Provenance::load(&path).await.unwrap();
        assert_eq!(loaded.package, provenance.package);
        assert_eq!(loaded.verification.as_deref(), Some("verified"));
    }
}
