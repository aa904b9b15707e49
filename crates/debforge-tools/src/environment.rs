//! Build environment on the host
//!
//! Tools are looked up on `PATH`. Each series gets a directory under the
//! environment root; a `ready` marker inside it means the environment was
//! set up and can be used.

use std::env;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use debforge_core::{BuildEnvironment, EnvironmentStatus};
use tracing::{debug, info};

const READY_MARKER: &str = "ready";

/// [`BuildEnvironment`] for builds that run directly on the host
#[derive(Debug, Clone)]
pub struct HostEnvironment {
    root: PathBuf,
    search_path: Option<std::ffi::OsString>,
}

impl HostEnvironment {
    /// Environments live in per-series directories under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), search_path: None }
    }

    /// Look tools up in `path` instead of the process `PATH`
    pub fn with_search_path(mut self, path: impl Into<std::ffi::OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    pub fn series_dir(&self, series: &str) -> PathBuf {
        self.root.join(series)
    }

    /// Resolve `tool` to an executable on the search path
    pub fn which(&self, tool: &str) -> Option<PathBuf> {
        if tool.contains('/') {
            let path = PathBuf::from(tool);
            return is_executable(&path).then_some(path);
        }
        let search = self.search_path.clone().or_else(|| env::var_os("PATH"))?;
        env::split_paths(&search).map(|dir| dir.join(tool)).find(|p| is_executable(p))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata().map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0).unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[async_trait]
impl BuildEnvironment for HostEnvironment {
    async fn missing_tools(&self, required: &[String]) -> Vec<String> {
        let missing: Vec<String> =
            required.iter().filter(|tool| self.which(tool).is_none()).cloned().collect();
        if !missing.is_empty() {
            debug!("Missing tools: {}", missing.join(", "));
        }
        missing
    }

    async fn is_ready(&self, series: &str) -> bool {
        tokio::fs::metadata(self.series_dir(series).join(READY_MARKER)).await.is_ok()
    }

    fn supports_create(&self) -> bool {
        true
    }

    async fn create(&self, series: &str) -> debforge_core::Result<EnvironmentStatus> {
        let dir = self.series_dir(series);
        info!("Creating build environment for {} at {}", series, dir.display());
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(READY_MARKER), format!("{series}\n")).await?;
        Ok(EnvironmentStatus { series: series.to_string(), created: true, location: Some(dir) })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[cfg(unix)]
    fn install_tool(dir: &Path, name: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_tools() {
        let bin = TempDir::new().unwrap();
        install_tool(bin.path(), "git");
        std::fs::write(bin.path().join("not-executable"), "").unwrap();

        let env = HostEnvironment::new("/tmp/unused").with_search_path(bin.path());
        let required = vec!["git".to_string(), "not-executable".to_string(), "sbuild".to_string()];

        assert_eq!(env.missing_tools(&required).await, vec!["not-executable", "sbuild"]);
        assert_eq!(env.which("git"), Some(bin.path().join("git")));
    }

    #[tokio::test]
    async fn test_create_marks_ready() {
        let dir = TempDir::new().unwrap();
        let env = HostEnvironment::new(dir.path().join("environments"));

        assert!(!env.is_ready("noble").await);
        assert!(env.supports_create());
        let status = env.create("noble").await.unwrap();

        assert!(status.created);
        assert_eq!(status.location, Some(dir.path().join("environments/noble")));
        assert!(env.is_ready("noble").await);
        assert!(!env.is_ready("jammy").await);
    }
}
