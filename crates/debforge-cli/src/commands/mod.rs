//! CLI command implementations

use std::path::Path;
use std::sync::Arc;

use color_eyre::eyre::{Context, Report, Result};
use debforge_build::{BuildError, Collaborators};
use debforge_config::Config;
use debforge_core::ExitCode;
use debforge_graph::GraphError;
use debforge_tools::{
    CommandSteps, FileIndex, HostEnvironment, LocalRepository, ManagedSet, ToolsError, YamlPolicy,
    YamlRegistry,
};

pub mod build;
pub mod clean;
pub mod init;
pub mod plan;
pub mod report;
pub mod run;
pub mod validate;

pub use build::BuildCommand;
pub use clean::CleanCommand;
pub use init::InitCommand;
pub use plan::PlanCommand;
pub use report::ReportCommand;
pub use run::RunCommand;
pub use validate::ValidateCommand;

/// Directory under the workspace holding per-series build environments
const ENVIRONMENTS_DIR: &str = "environments";

pub(crate) fn load_config(path: &Path) -> Result<Config> {
    Config::from_file(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

/// The managed set and the collaborators wired from configuration
pub(crate) fn collaborators(config: &Config) -> Result<(Arc<ManagedSet>, Collaborators)> {
    let managed = Arc::new(ManagedSet::load(&config.packages)?);
    let collaborators = Collaborators {
        index: Arc::new(FileIndex::open(&config.repository)?),
        source: managed.clone(),
        gate: Arc::new(YamlPolicy::load_optional(config.retirement.as_deref())?),
        registry: Arc::new(YamlRegistry::load_optional(config.registry.as_deref())?),
        environment: Arc::new(HostEnvironment::new(config.workspace.join(ENVIRONMENTS_DIR))),
        steps: Arc::new(CommandSteps::new(config.tools.clone())),
        publisher: Arc::new(LocalRepository::new(&config.repository)),
    };
    Ok((managed, collaborators))
}

/// Exit code for an error that ended a command
pub fn exit_code_of(report: &Report) -> ExitCode {
    for cause in report.chain() {
        if let Some(e) = cause.downcast_ref::<BuildError>() {
            return e.exit_code();
        }
        if let Some(e) = cause.downcast_ref::<GraphError>() {
            return e.exit_code();
        }
        if let Some(e) = cause.downcast_ref::<ToolsError>() {
            return e.exit_code();
        }
        if let Some(e) = cause.downcast_ref::<debforge_core::Error>() {
            return e.exit_code();
        }
    }
    ExitCode::ConfigError
}

#[cfg(test)]
mod tests {
    use color_eyre::eyre::eyre;

    use super::*;

    #[test]
    fn test_exit_code_of() {
        let report = Report::new(BuildError::RunNotFound { run_id: "20261016-101500-000".to_string() });
        assert_eq!(exit_code_of(&report), ExitCode::ResumeError);

        let report = Report::new(debforge_core::Error::UnresolvedTarget {
            expression: "glance".to_string(),
        })
        .wrap_err("Failed to resolve targets");
        assert_eq!(exit_code_of(&report), ExitCode::DiscoveryFailed);

        assert_eq!(exit_code_of(&eyre!("anything else")), ExitCode::ConfigError);
    }
}
