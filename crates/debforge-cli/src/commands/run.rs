//! Run command implementation

use std::path::PathBuf;

use color_eyre::eyre::{eyre, Result};
use debforge_build::{
    setup_signal_handlers, Orchestrator, ProgressUIFactory, ResumeMode, RunOptions, RunReport,
};
use debforge_core::ExitCode;
use tracing::info;

/// Run command implementation
pub struct RunCommand {
    pub config_path: PathBuf,
    pub targets: Vec<String>,
    pub parallel: Option<usize>,
    pub keep_going: bool,
    pub max_failures: Option<usize>,
    /// `Some(None)` resumes the most recent run
    pub resume: Option<Option<String>>,
    pub retry_failed: bool,
    pub include_retired: bool,
    pub force: bool,
    pub progress: bool,
}

impl RunCommand {
    pub async fn execute(&self) -> Result<ExitCode> {
        let mut config = super::load_config(&self.config_path)?;
        if self.include_retired {
            config.build.include_retired = true;
        }
        let (managed, collaborators) = super::collaborators(&config)?;
        if self.force {
            config.build.force_rebuild.extend(managed.ids().map(|id| id.to_string()));
        }

        let mut options = RunOptions::from(&config.run);
        if let Some(parallel) = self.parallel {
            options.concurrency = parallel;
        }
        if self.keep_going {
            options.keep_going = true;
        }
        if let Some(max_failures) = self.max_failures {
            options.max_failures = max_failures;
        }

        let orchestrator = Orchestrator::new(config, collaborators)?
            .with_progress(ProgressUIFactory::create(self.progress));
        setup_signal_handlers(orchestrator.shutdown_manager()).await?;

        let report = match &self.resume {
            Some(run_id) => {
                let mode =
                    if self.retry_failed { ResumeMode::RetryFailed } else { ResumeMode::SkipFailed };
                info!("Resuming {} ({:?})", run_id.as_deref().unwrap_or("latest run"), mode);
                orchestrator.resume(run_id.as_deref(), mode, self.parallel).await?
            }
            None => {
                if self.targets.is_empty() {
                    return Err(eyre!("No targets given; name packages, `all`, or use --resume"));
                }
                let roots = managed.resolve_all(self.targets.as_slice())?;
                info!("Running {} root packages", roots.len());
                orchestrator.run(roots, options, None).await?
            }
        };

        print_summary(&report);
        if let Some(interrupt) = orchestrator.shutdown_manager().interrupted_by() {
            println!(
                "Interrupted by {interrupt}; continue with `debforge run --resume {}`",
                report.document.run_id
            );
        }
        Ok(report.exit_code())
    }
}

pub(crate) fn print_summary(report: &RunReport) {
    let document = &report.document;
    let summary = &document.summary;
    println!("Run {}", document.run_id);
    if let Some(error) = &document.graph_error {
        println!("✗ {error}");
    }
    println!(
        "  {} succeeded, {} failed, {} skipped, {} blocked, {} not run (of {})",
        summary.succeeded,
        summary.failed,
        summary.skipped,
        summary.blocked,
        summary.pending,
        summary.total
    );
    for failure in &document.failures {
        println!("  ✗ {} ({}): {}", failure.package, failure.kind, failure.message);
    }
    println!("  Report: {}", report.markdown_path.display());
    println!("Exit: {}", summary.exit_code);
}
