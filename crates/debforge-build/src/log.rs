//! Per-package build log

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::warn;

/// Append-only log file for one package
///
/// Write failures are reported through tracing and never fail the build.
#[derive(Debug, Clone)]
pub struct PackageLog {
    path: PathBuf,
}

impl PackageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line
    pub fn line(&self, message: impl AsRef<str>) {
        if let Err(e) = self.append(message.as_ref()) {
            warn!("Failed to write log {}: {}", self.path.display(), e);
        }
    }

    /// Append a block of tool output under a heading
    pub fn block(&self, heading: &str, content: &str) {
        if content.trim().is_empty() {
            return;
        }
        self.line(format!("--- {heading} ---"));
        for line in content.lines() {
            self.line(line);
        }
    }

    fn append(&self, message: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{} {}", Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = PackageLog::new(dir.path().join("logs/nova.log"));
        log.line("[fetch] ok");
        log.block("build output", "line one\nline two");
        log.block("empty", "  ");

        let content = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].ends_with("[fetch] ok"));
        assert!(lines[3].ends_with("line two"));
    }
}
