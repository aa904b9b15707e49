//! Build command implementation

use std::path::PathBuf;
use std::str::FromStr;

use color_eyre::eyre::{eyre, Context, Result};
use debforge_build::{setup_signal_handlers, Orchestrator, ProgressUIFactory};
use debforge_core::{BuildMode, ExitCode, TargetResolver};
use tracing::info;

/// Build command implementation
pub struct BuildCommand {
    config_path: PathBuf,
    package: String,
    mode: Option<String>,
    force: bool,
    progress: bool,
}

impl BuildCommand {
    pub fn new(
        config_path: PathBuf,
        package: String,
        mode: Option<String>,
        force: bool,
        progress: bool,
    ) -> Self {
        Self { config_path, package, mode, force, progress }
    }

    pub async fn execute(&self) -> Result<ExitCode> {
        info!("Starting single-package build of {}", self.package);

        let config = super::load_config(&self.config_path)?;
        let mode = self.mode.as_deref().map(BuildMode::from_str).transpose()?;
        let (managed, collaborators) = super::collaborators(&config)?;

        let mut resolved = managed.resolve(&self.package)?;
        if resolved.len() != 1 {
            return Err(eyre!(
                "{} matches {} packages; `build` takes exactly one, use `run` for several",
                self.package,
                resolved.len()
            ));
        }
        let package = resolved.remove(0);

        let orchestrator = Orchestrator::new(config, collaborators)?
            .with_progress(ProgressUIFactory::create(self.progress));
        setup_signal_handlers(orchestrator.shutdown_manager()).await?;

        let build = orchestrator
            .build_package(package.clone(), mode, self.force)
            .await
            .with_context(|| format!("Failed to build {package}"))?;
        let outcome = &build.outcome;

        if outcome.success {
            println!("✓ Built {} {}", package, outcome.version.as_deref().unwrap_or_default());
            for artifact in &outcome.artifacts {
                println!("  {}", artifact.path.display());
            }
        } else {
            println!(
                "✗ {} failed in {}: {}",
                package,
                outcome.failed_phase.map(|p| p.to_string()).unwrap_or_default(),
                outcome.error.as_deref().unwrap_or_default()
            );
            println!("  Log: {}", build.run_dir.join("logs").join(format!("{package}.log")).display());
        }
        println!("Run {} ({})", build.run_id, outcome.exit_code);

        Ok(outcome.exit_code)
    }
}
