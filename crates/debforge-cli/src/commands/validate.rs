//! Validate command implementation

use std::path::PathBuf;

use color_eyre::eyre::Result;
use debforge_core::{BuildEnvironment, ExitCode};
use debforge_tools::{HostEnvironment, ManagedSet, YamlPolicy, YamlRegistry};
use tracing::info;

/// Check configuration, data files, and host tools
pub struct ValidateCommand {
    config_path: PathBuf,
}

impl ValidateCommand {
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub async fn execute(&self) -> Result<ExitCode> {
        info!("Validating {}", self.config_path.display());
        let config = super::load_config(&self.config_path)?;
        println!("✓ Configuration: {}", self.config_path.display());

        let managed = ManagedSet::load(&config.packages)?;
        println!("✓ Packages: {} managed", managed.len());

        YamlPolicy::load_optional(config.retirement.as_deref())?;
        if let Some(path) = &config.retirement {
            println!("✓ Retirement policy: {}", path.display());
        }
        YamlRegistry::load_optional(config.registry.as_deref())?;
        if let Some(path) = &config.registry {
            println!("✓ Registry: {}", path.display());
        }

        let environment = HostEnvironment::new(config.workspace.join(super::ENVIRONMENTS_DIR));
        let missing = environment.missing_tools(&config.build.required_tools).await;
        if !missing.is_empty() {
            println!("✗ Missing tools: {}", missing.join(", "));
            return Ok(ExitCode::ToolMissing);
        }
        println!("✓ Tools: {} available", config.build.required_tools.len());

        Ok(ExitCode::Success)
    }
}
