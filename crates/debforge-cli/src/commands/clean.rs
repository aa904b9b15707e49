//! Clean command implementation

use std::path::PathBuf;

use chrono::{Duration, Utc};
use color_eyre::eyre::{eyre, Context, Result};
use debforge_build::RunStateStore;
use debforge_core::ExitCode;
use tracing::{info, warn};

/// Remove stored runs
pub struct CleanCommand {
    config_path: PathBuf,
    all: bool,
    older_than: Option<u32>,
}

impl CleanCommand {
    pub fn new(config_path: PathBuf, all: bool, older_than: Option<u32>) -> Self {
        Self { config_path, all, older_than }
    }

    pub async fn execute(&self) -> Result<ExitCode> {
        if !self.all && self.older_than.is_none() {
            return Err(eyre!("Nothing to clean; pass --all or --older-than DAYS"));
        }
        let config = super::load_config(&self.config_path)?;
        let store = RunStateStore::new(config.runs_dir(), Default::default());

        let removed = remove_runs(&store, self.all, self.older_than).await?;
        println!("✓ Removed {removed} runs");
        Ok(ExitCode::Success)
    }
}

async fn remove_runs(store: &RunStateStore, all: bool, older_than: Option<u32>) -> Result<usize> {
    let cutoff = older_than.map(|days| Utc::now() - Duration::days(i64::from(days)));
    let mut removed = 0;
    for run_id in store.list()? {
        if !all {
            let Some(cutoff) = cutoff else { continue };
            match store.load(&run_id).await {
                Ok(state) if state.created_at < cutoff => {}
                Ok(_) => continue,
                Err(e) => {
                    warn!("Skipping {}: {}", run_id, e);
                    continue;
                }
            }
        }
        let dir = store.run_dir(&run_id);
        tokio::fs::remove_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to remove {}", dir.display()))?;
        info!("Removed run {}", run_id);
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use debforge_build::{RunOptions, RunPlan};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_older_than_keeps_recent_runs() {
        let temp_dir = TempDir::new().unwrap();
        let store = RunStateStore::new(temp_dir.path(), Default::default());
        let state = store
            .create(None, Vec::new(), RunOptions::default(), RunPlan::default())
            .await
            .unwrap();

        assert_eq!(remove_runs(&store, false, Some(1)).await.unwrap(), 0);
        assert!(store.run_dir(&state.run_id).exists());

        assert_eq!(remove_runs(&store, true, None).await.unwrap(), 1);
        assert!(!store.run_dir(&state.run_id).exists());
    }
}
