//! Init command implementation

use std::path::PathBuf;

use color_eyre::eyre::{eyre, Context, Result};
use debforge_config::Config;
use debforge_core::ExitCode;
use tracing::info;

const STARTER_PACKAGES: &str = "\
# Managed packages and their declared build dependencies
packages: {}
";

/// Write a starter configuration
pub struct InitCommand {
    output: PathBuf,
    force: bool,
    series: String,
}

impl InitCommand {
    pub fn new(output: PathBuf, force: bool, series: String) -> Self {
        Self { output, force, series }
    }

    pub async fn execute(&self) -> Result<ExitCode> {
        if self.output.exists() && !self.force {
            return Err(eyre!(
                "{} already exists; use --force to overwrite",
                self.output.display()
            ));
        }

        let config = Config { series: self.series.clone(), ..Config::default() };
        tokio::fs::write(&self.output, config.to_yaml()?)
            .await
            .with_context(|| format!("Failed to write {}", self.output.display()))?;
        println!("✓ Wrote {}", self.output.display());

        let base = self.output.parent().map(PathBuf::from).unwrap_or_default();
        let packages = base.join(&config.packages);
        if !packages.exists() {
            tokio::fs::write(&packages, STARTER_PACKAGES)
                .await
                .with_context(|| format!("Failed to write {}", packages.display()))?;
            println!("✓ Wrote {}", packages.display());
        } else {
            info!("Keeping existing {}", packages.display());
        }

        Ok(ExitCode::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_writes_loadable_config() {
        let temp_dir = TempDir::new().unwrap();
        let output = temp_dir.path().join("debforge.yaml");

        let code = InitCommand::new(output.clone(), false, "jammy".to_string())
            .execute()
            .await
            .unwrap();
        assert_eq!(code, ExitCode::Success);

        let config = Config::from_file(&output).unwrap();
        assert_eq!(config.series, "jammy");
        assert!(temp_dir.path().join("packages.yaml").exists());
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let output = temp_dir.path().join("debforge.yaml");
        std::fs::write(&output, "series: noble\n").unwrap();

        let result = InitCommand::new(output.clone(), false, "noble".to_string()).execute().await;
        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "series: noble\n");

        InitCommand::new(output.clone(), true, "noble".to_string()).execute().await.unwrap();
        assert!(Config::from_file(&output).is_ok());
    }
}
