//! Octospine command line entry point

use clap::{Parser, Subcommand, ValueEnum};
use octospine::config::FrameworkConfig;
use octospine::observability::init_default_logging;
use octospine::pipeline::FramePipeline;
use octospine::FrameworkError;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tracing::{error, info, warn};

/// Exit status used when a run is interrupted
const EXIT_INTERRUPTED: i32 = 130;

/// Frame orchestrator that walks scaffolds through a ten-stage pipeline
#[derive(Parser)]
#[command(name = "octospine")]
#[command(about = "Run scaffolds of external frames through a ten-stage pipeline")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a scaffold
    Run {
        /// Scaffold id
        #[arg(short, long)]
        scaffold: String,

        /// Input data as a JSON object
        #[arg(short, long, value_name = "JSON")]
        input: Option<String>,
    },
    /// List registered scaffolds or frames
    List {
        #[arg(value_enum)]
        what: ListTarget,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ListTarget {
    Scaffolds,
    Frames,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose > 0);

    let (config, path) = match load_configuration(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };
    info!(path = %path.display(), "Configuration loaded");

    let result = match cli.command {
        Commands::Run { scaffold, input } => {
            run_scaffold(&config, &scaffold, input.as_deref()).await
        }
        Commands::List { what } => list(&config, what),
        Commands::Config { show } => handle_config_command(&config, show),
    };

    match result {
        Ok(()) => {}
        Err(FrameworkError::Aborted { reason }) => {
            warn!("Run aborted: {}", reason);
            process::exit(EXIT_INTERRUPTED);
        }
        Err(e) => {
            error!("Command failed: {}", e);
            process::exit(1);
        }
    }
}

fn load_configuration(
    config_path: Option<&Path>,
) -> Result<(FrameworkConfig, PathBuf), FrameworkError> {
    match config_path {
        Some(path) => Ok((FrameworkConfig::load_from_file(path)?, path.to_path_buf())),
        None => Ok(FrameworkConfig::discover(&std::env::current_dir()?)?),
    }
}

fn parse_input(input: Option<&str>) -> Result<Value, FrameworkError> {
    match input {
        None => Ok(Value::Null),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| FrameworkError::invalid_input(format!("--input is not valid JSON: {e}"))),
    }
}

async fn run_scaffold(
    config: &FrameworkConfig,
    scaffold_id: &str,
    input: Option<&str>,
) -> Result<(), FrameworkError> {
    let input_data = parse_input(input)?;
    let mut pipeline = FramePipeline::from_config(config)?;

    let shutdown = async {
        if signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl-C, aborting run");
        } else {
            // Without a signal handler the run can only finish on its own
            std::future::pending::<()>().await;
        }
    };

    let outcome = pipeline
        .execute_scaffold_until(scaffold_id, input_data, shutdown)
        .await?;

    println!("{}", outcome.report_path.display());
    Ok(())
}

fn list(config: &FrameworkConfig, what: ListTarget) -> Result<(), FrameworkError> {
    let registry = octospine::frames::FrameRegistry::from_config(config)?;
    let listing = match what {
        ListTarget::Scaffolds => serde_json::to_string_pretty(&registry.list_scaffolds())?,
        ListTarget::Frames => serde_json::to_string_pretty(&registry.list_frames())?,
    };
    println!("{listing}");
    Ok(())
}

fn handle_config_command(config: &FrameworkConfig, show: bool) -> Result<(), FrameworkError> {
    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| FrameworkError::internal_error(format!("Cannot render config: {e}")))?;
        println!("{rendered}");
    }

    info!(
        frames = config.frames.len(),
        scaffolds = config.scaffolds.len(),
        "Configuration validation complete"
    );
    Ok(())
}
