//! Configuration management for debforge
//!
//! This crate handles YAML configuration parsing, validation,
//! and environment variable substitution.

use std::path::{Path, PathBuf};

use debforge_core::error::{Error, Result};
use debforge_core::BuildMode;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "debforge.yaml";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root for run directories, logs and per-package work trees
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Local package repository that artifacts are published into
    #[serde(default = "default_repository")]
    pub repository: PathBuf,

    /// Managed package set (identifier → build dependencies)
    pub packages: PathBuf,

    /// Optional upstream registry file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<PathBuf>,

    /// Optional retirement and policy file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retirement: Option<PathBuf>,

    /// Target distribution series
    #[serde(default = "default_series")]
    pub series: String,

    /// Build mode used when the package set does not pin one
    #[serde(default)]
    pub default_mode: BuildMode,

    /// Multi-package run settings
    #[serde(default)]
    pub run: RunConfig,

    /// Per-package build settings
    #[serde(default)]
    pub build: BuildConfig,

    /// When the repository index is regenerated
    #[serde(default)]
    pub index_refresh: IndexRefreshConfig,

    /// External tool command lines
    #[serde(default)]
    pub tools: ToolCommands,

    /// Retry settings for state writes and index regeneration
    #[serde(default)]
    pub retry: RetrySettings,
}

/// Multi-package run settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of concurrent workers; 1 selects the sequential executor
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Continue past package failures
    #[serde(default)]
    pub keep_going: bool,

    /// Stop after this many failures (0 = unlimited)
    #[serde(default)]
    pub max_failures: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { concurrency: default_concurrency(), keep_going: false, max_failures: 0 }
    }
}

/// Per-package build settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Build retired projects instead of blocking them
    #[serde(default)]
    pub include_retired: bool,

    /// Identifiers rebuilt even when the index already provides them
    #[serde(default)]
    pub force_rebuild: Vec<String>,

    /// Produce binary packages in addition to the source package
    #[serde(default = "default_true")]
    pub binary: bool,

    /// Build missing dependencies found during dependency validation
    #[serde(default = "default_true")]
    pub auto_build: bool,

    /// Maximum nesting of automatic dependency builds
    #[serde(default = "default_max_auto_build_depth")]
    pub max_auto_build_depth: usize,

    /// Tools that must be on PATH before a build starts
    #[serde(default = "default_required_tools")]
    pub required_tools: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            include_retired: false,
            force_rebuild: Vec::new(),
            binary: true,
            auto_build: true,
            max_auto_build_depth: default_max_auto_build_depth(),
            required_tools: default_required_tools(),
        }
    }
}

/// Repository index regeneration policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexRefresh {
    /// Regenerate right after each package is published
    PerPackage,
    /// Regenerate once after every batch completes
    PerBatch,
}

/// Index regeneration policy for single-package builds and multi-package runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRefreshConfig {
    #[serde(default = "default_single_refresh")]
    pub single: IndexRefresh,
    #[serde(default = "default_run_refresh")]
    pub run: IndexRefresh,
}

impl Default for IndexRefreshConfig {
    fn default() -> Self {
        Self { single: default_single_refresh(), run: default_run_refresh() }
    }
}

/// Command lines for the packaging steps
///
/// Every argument may use the placeholders `{package}`, `{series}`,
/// `{mode}`, `{workdir}`, `{upstream}`, `{branch}`, `{version}` and
/// `{build_flags}`. Commands run with the package work directory as cwd.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommands {
    #[serde(default = "default_fetch_command")]
    pub fetch: Vec<String>,
    #[serde(default = "default_prepare_command")]
    pub prepare: Vec<String>,
    /// Prints build dependencies; when unset `debian/control` is parsed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derive_deps: Option<Vec<String>>,
    #[serde(default = "default_import_patch_command")]
    pub import_patch: Vec<String>,
    #[serde(default = "default_build_command")]
    pub build: Vec<String>,
}

impl Default for ToolCommands {
    fn default() -> Self {
        Self {
            fetch: default_fetch_command(),
            prepare: default_prepare_command(),
            derive_deps: None,
            import_patch: default_import_patch_command(),
            build: default_build_command(),
        }
    }
}

/// Retry settings for transient I/O
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            repository: default_repository(),
            packages: PathBuf::from("packages.yaml"),
            registry: None,
            retirement: None,
            series: default_series(),
            default_mode: BuildMode::default(),
            run: RunConfig::default(),
            build: BuildConfig::default(),
            index_refresh: IndexRefreshConfig::default(),
            tools: ToolCommands::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::ConfigError {
            message: format!("Failed to read config file {path:?}: {e}"),
        })?;

        let mut config = Self::from_yaml(&content)?;

        // Relative paths are resolved against the config file location
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }

        config.validate()?;

        Ok(config)
    }

    /// Parse YAML and expand environment variables without validating
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(content)
            .map_err(|e| Error::ConfigError { message: format!("Failed to parse YAML: {e}") })?;

        config.expand_env_vars()?;

        Ok(config)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::ConfigError { message: format!("Failed to render YAML: {e}") })
    }

    /// Expand environment variables in paths
    fn expand_env_vars(&mut self) -> Result<()> {
        self.workspace = expand_path(&self.workspace)?;
        self.repository = expand_path(&self.repository)?;
        self.packages = expand_path(&self.packages)?;

        if let Some(registry) = self.registry.as_mut() {
            *registry = expand_path(registry)?;
        }
        if let Some(retirement) = self.retirement.as_mut() {
            *retirement = expand_path(retirement)?;
        }

        Ok(())
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() && !base.as_os_str().is_empty() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.workspace);
        resolve(&mut self.repository);
        resolve(&mut self.packages);
        if let Some(registry) = self.registry.as_mut() {
            resolve(registry);
        }
        if let Some(retirement) = self.retirement.as_mut() {
            resolve(retirement);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.packages.exists() {
            return Err(Error::ConfigError {
                message: format!("Package set file does not exist: {:?}", self.packages),
            });
        }

        for (name, path) in [("registry", &self.registry), ("retirement", &self.retirement)] {
            if let Some(path) = path {
                if !path.exists() {
                    return Err(Error::ConfigError {
                        message: format!("{name} file does not exist: {path:?}"),
                    });
                }
            }
        }

        if self.series.trim().is_empty() {
            return Err(Error::ConfigError { message: "series cannot be empty".to_string() });
        }

        if self.run.concurrency == 0 {
            return Err(Error::ConfigError {
                message: "run.concurrency must be at least 1".to_string(),
            });
        }

        if self.build.max_auto_build_depth == 0 {
            return Err(Error::ConfigError {
                message: "build.max_auto_build_depth must be at least 1".to_string(),
            });
        }

        for (name, command) in [
            ("fetch", &self.tools.fetch),
            ("prepare", &self.tools.prepare),
            ("import_patch", &self.tools.import_patch),
            ("build", &self.tools.build),
        ] {
            if command.is_empty() {
                return Err(Error::ConfigError {
                    message: format!("tools.{name} command cannot be empty"),
                });
            }
        }
        if matches!(&self.tools.derive_deps, Some(command) if command.is_empty()) {
            return Err(Error::ConfigError {
                message: "tools.derive_deps command cannot be empty".to_string(),
            });
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::ConfigError {
                message: "retry.max_attempts must be at least 1".to_string(),
            });
        }

        // Create workspace and repository if they don't exist
        for dir in [&self.workspace, &self.repository] {
            if !dir.exists() {
                debug!("Creating directory {}", dir.display());
                std::fs::create_dir_all(dir).map_err(|e| Error::ConfigError {
                    message: format!("Failed to create {}: {e}", dir.display()),
                })?;
            }
        }

        Ok(())
    }

    /// Directory holding one subdirectory per run
    pub fn runs_dir(&self) -> PathBuf {
        self.workspace.join("runs")
    }
}

/// Expand environment variables in a path
fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path.to_string_lossy();
    let env_var_re = Regex::new(r"\$\{([^}]+)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .map_err(|e| Error::config(format!("Invalid expansion pattern: {e}")))?;

    let mut result = path_str.to_string();
    for cap in env_var_re.captures_iter(&path_str) {
        let Some(var_name) = cap.get(1).or_else(|| cap.get(2)).map(|m| m.as_str()) else {
            continue;
        };
        let var_value = std::env::var(var_name).map_err(|_| Error::ConfigError {
            message: format!("Environment variable not found: {var_name}"),
        })?;

        result = result.replace(&cap[0], &var_value);
    }

    Ok(PathBuf::from(result))
}

fn default_workspace() -> PathBuf {
    PathBuf::from("./work")
}

fn default_repository() -> PathBuf {
    PathBuf::from("./repo")
}

fn default_series() -> String {
    "noble".to_string()
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

fn default_true() -> bool {
    true
}

fn default_max_auto_build_depth() -> usize {
    10
}

fn default_required_tools() -> Vec<String> {
    vec!["git".to_string(), "dpkg-buildpackage".to_string()]
}

fn default_single_refresh() -> IndexRefresh {
    IndexRefresh::PerPackage
}

fn default_run_refresh() -> IndexRefresh {
    IndexRefresh::PerBatch
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn default_fetch_command() -> Vec<String> {
    argv(&["git", "clone", "--branch", "{branch}", "{upstream}", "src"])
}

fn default_prepare_command() -> Vec<String> {
    argv(&["sh", "-c", "cd src && uscan --download-current-version --destdir .."])
}

fn default_import_patch_command() -> Vec<String> {
    argv(&["sh", "-c", "cd src && gbp import-orig --no-interactive ../*.orig.tar.* && gbp pq import"])
}

fn default_build_command() -> Vec<String> {
    argv(&["sh", "-c", "cd src && dpkg-buildpackage -us -uc {build_flags}"])
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}
