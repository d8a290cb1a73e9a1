//! Binary entry point for algoledger.
//!
//! Records recommendation outcomes and prints reports from any configured
//! storage backend.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use algoledger::observability::{self, LoggingConfig};
use algoledger::{BackendSelector, BackendType, LedgerConfig, cli};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Algoledger - polyglot history of algorithm recommendations.
#[derive(Parser)]
#[command(name = "algoledger")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend override (inmemory, mongodb, postgres, redis, neo4j, cassandra).
    #[arg(short, long, global = true)]
    backend: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Record a selection and, if the prompt is new, a unique request.
    Record {
        /// Algorithm label.
        algorithm: String,

        /// Prompt text.
        prompt: String,
    },

    /// Show selection counts per algorithm.
    Usage,

    /// Show every selection grouped by algorithm.
    Details,

    /// List unique requests, newest first.
    Requests {
        /// Only requests of this algorithm type.
        #[arg(short = 't', long = "type")]
        algorithm_type: Option<String>,
    },

    /// Show unique-request counts per algorithm type.
    Types,
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env();
    if cli.verbose {
        logging = logging.with_filter("debug");
    }
    if let Err(e) = observability::init_logging(&logging) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(cli.config.as_deref(), cli.backend.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Resolves configuration: file (or default location), then env, then flag.
fn load_config(path: Option<&Path>, backend: Option<&str>) -> algoledger::Result<LedgerConfig> {
    let config = match path {
        Some(path) => LedgerConfig::load_from_file(path)?,
        None => LedgerConfig::load_default(),
    };
    let config = config.with_env_overrides()?;
    match backend {
        Some(name) => Ok(config.with_backend(BackendType::parse(name)?)),
        None => Ok(config),
    }
}

/// Runs the selected command and prints its JSON output.
async fn run_command(command: Commands, config: LedgerConfig) -> algoledger::Result<()> {
    let selector = BackendSelector::new(config);
    tracing::debug!(backend = %selector.backend(), "Selected backend");

    let mut stdout = std::io::stdout();
    match command {
        Commands::Record { algorithm, prompt } => {
            let output = cli::record(&selector, &algorithm, &prompt).await?;
            cli::write_json(&mut stdout, &output)
        },
        Commands::Usage => {
            let report = cli::usage(&selector).await?;
            cli::write_json(&mut stdout, &report)
        },
        Commands::Details => {
            let report = cli::details(&selector).await?;
            cli::write_json(&mut stdout, &report)
        },
        Commands::Requests { algorithm_type } => {
            let requests = cli::requests(&selector, algorithm_type.as_deref()).await?;
            cli::write_json(&mut stdout, &requests)
        },
        Commands::Types => {
            let counts = cli::types(&selector).await?;
            cli::write_json(&mut stdout, &counts)
        },
    }
}
