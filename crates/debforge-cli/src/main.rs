//! Main CLI entry point for debforge

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use debforge_core::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;

/// debforge - Build Debian source and binary packages across dependency graphs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Decrease logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    quiet: u8,

    /// Configuration file path (global option)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a single package, and any missing dependencies it needs
    Build {
        /// Package identifier
        package: String,

        /// Build mode (release, snapshot, milestone)
        #[arg(short, long, value_name = "MODE")]
        mode: Option<String>,

        /// Build even when the policy check blocks the package
        #[arg(short, long)]
        force: bool,

        /// Disable the progress display
        #[arg(long)]
        no_progress: bool,
    },

    /// Build a set of packages in dependency order
    Run {
        /// Package identifiers, `all`, or `prefix*` patterns
        targets: Vec<String>,

        /// Number of packages built concurrently
        #[arg(short = 'j', long, value_name = "N")]
        parallel: Option<usize>,

        /// Keep building independent packages after a failure
        #[arg(short, long)]
        keep_going: bool,

        /// Stop after this many failures (0 = no limit)
        #[arg(long, value_name = "K")]
        max_failures: Option<usize>,

        /// Continue a previous run (the most recent one without RUN_ID)
        #[arg(long, value_name = "RUN_ID", num_args = 0..=1)]
        resume: Option<Option<String>>,

        /// When resuming, build previously failed packages again
        #[arg(long, requires = "resume", conflicts_with = "skip_failed")]
        retry_failed: bool,

        /// When resuming, leave previously failed packages alone (default)
        #[arg(long, requires = "resume")]
        skip_failed: bool,

        /// Build retired projects too
        #[arg(long)]
        include_retired: bool,

        /// Rebuild managed dependencies even when the index provides them
        #[arg(short, long)]
        force: bool,

        /// Disable the progress display
        #[arg(long)]
        no_progress: bool,
    },

    /// Show the build plan without building
    Plan {
        /// Package identifiers, `all`, or `prefix*` patterns
        #[arg(required = true)]
        targets: Vec<String>,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,

        /// Include retired projects
        #[arg(long)]
        include_retired: bool,
    },

    /// Render the reports of a stored run again
    Report {
        /// Run identifier (the most recent run when omitted)
        run_id: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, value_name = "FILE", default_value = debforge_config::DEFAULT_CONFIG_FILE)]
        output: PathBuf,

        /// Force overwrite existing file
        #[arg(short, long)]
        force: bool,

        /// Target distribution series
        #[arg(long, value_name = "SERIES", default_value = "noble")]
        series: String,
    },

    /// Validate the configuration and probe required tools
    Validate,

    /// Remove stored runs
    Clean {
        /// Remove every stored run
        #[arg(long, conflicts_with = "older_than")]
        all: bool,

        /// Remove runs created more than DAYS days ago
        #[arg(long, value_name = "DAYS")]
        older_than: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install color-eyre for better error reports
    color_eyre::install()?;

    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet)?;

    let config_path =
        cli.config.unwrap_or_else(|| PathBuf::from(debforge_config::DEFAULT_CONFIG_FILE));
    let interactive = cli.quiet == 0;

    let result = match cli.command {
        Commands::Build { package, mode, force, no_progress } => {
            let command = commands::BuildCommand::new(
                config_path,
                package,
                mode,
                force,
                interactive && !no_progress,
            );
            command.execute().await
        }

        Commands::Run {
            targets,
            parallel,
            keep_going,
            max_failures,
            resume,
            retry_failed,
            skip_failed: _,
            include_retired,
            force,
            no_progress,
        } => {
            let command = commands::RunCommand {
                config_path,
                targets,
                parallel,
                keep_going,
                max_failures,
                resume,
                retry_failed,
                include_retired,
                force,
                progress: interactive && !no_progress,
            };
            command.execute().await
        }

        Commands::Plan { targets, json, include_retired } => {
            let command = commands::PlanCommand::new(config_path, targets, json, include_retired);
            command.execute().await
        }

        Commands::Report { run_id } => {
            let command = commands::ReportCommand::new(config_path, run_id);
            command.execute().await
        }

        Commands::Init { output, force, series } => {
            let command = commands::InitCommand::new(output, force, series);
            command.execute().await
        }

        Commands::Validate => {
            let command = commands::ValidateCommand::new(config_path);
            command.execute().await
        }

        Commands::Clean { all, older_than } => {
            let command = commands::CleanCommand::new(config_path, all, older_than);
            command.execute().await
        }
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("Command failed: {:#}", e);
            commands::exit_code_of(&e)
        }
    };
    if code != ExitCode::Success {
        std::process::exit(code.code());
    }

    Ok(())
}

fn setup_logging(verbose: u8, quiet: u8) -> Result<()> {
    let log_level = match (verbose, quiet) {
        (0, 0) => "info",
        (1, 0) => "debug",
        (2, 0) => "trace",
        (v, 0) if v > 2 => "trace",
        (0, 1) => "warn",
        (0, 2) => "error",
        (0, q) if q > 2 => "off",
        _ => "info", // If both are set, default to info
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
