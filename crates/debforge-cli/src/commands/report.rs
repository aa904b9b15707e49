//! Report command implementation

use std::path::PathBuf;

use color_eyre::eyre::Result;
use debforge_build::Orchestrator;
use debforge_core::ExitCode;

use super::run::print_summary;

/// Re-render the report of a stored run
pub struct ReportCommand {
    config_path: PathBuf,
    run_id: Option<String>,
}

impl ReportCommand {
    pub fn new(config_path: PathBuf, run_id: Option<String>) -> Self {
        Self { config_path, run_id }
    }

    pub async fn execute(&self) -> Result<ExitCode> {
        let config = super::load_config(&self.config_path)?;
        let (_, collaborators) = super::collaborators(&config)?;
        let orchestrator = Orchestrator::new(config, collaborators)?;

        let report = orchestrator.report(self.run_id.as_deref()).await?;
        print_summary(&report);
        Ok(report.exit_code())
    }
}
