//! stashdb CLI
//!
//! Command-line interface for stashdb: save, query and delete documents
//! whose arrays live in the blob store.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use stashdb_core::{Config, Repository};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "stashdb")]
#[command(about = "stashdb - documents with large arrays offloaded to a blob store")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save a JSON document (`-` reads stdin)
    Put {
        /// Path to the document
        file: String,
        /// Merge by `item` as a record from this kind of file (.xml, .jpg, .tiff)
        #[arg(long)]
        source: Option<String>,
    },
    /// Query documents
    #[command(alias = "ls")]
    Get {
        /// Equality filter as a JSON object, e.g. '{"item": "A"}'
        #[arg(short, long)]
        filter: Option<String>,
        /// Comma-separated fields to return
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
        /// Replace blob handles with their arrays
        #[arg(long)]
        hydrate: bool,
    },
    /// Delete a document and its blobs
    #[command(alias = "rm")]
    Delete {
        /// Document ID
        id: String,
    },
    /// List distinct values of a field
    Distinct {
        /// Dotted field path
        field: String,
        /// Equality filter as a JSON object
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Show storage location and counts
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, collection, fs_name, log_file)
        key: String,
        /// Configuration value
        value: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands don't need the repository
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), cli.config.as_ref(), &output);
    }

    let config = Config::load_with_cli_override(cli.config.as_ref())
        .context("Failed to load configuration")?;
    init_logging(&config);

    let repo = Repository::open(&config).context("Failed to open repository")?;

    match cli.command {
        Commands::Put { file, source } => {
            commands::document::put(&repo, &file, source.as_deref(), &output)
        }
        Commands::Get {
            filter,
            fields,
            hydrate,
        } => commands::document::get(&repo, filter.as_deref(), &fields, hydrate, &output),
        Commands::Delete { id } => commands::document::delete(&repo, &id, &output),
        Commands::Distinct { field, filter } => {
            commands::document::distinct(&repo, &field, filter.as_deref(), &output)
        }
        Commands::Status => commands::status::show(&repo, &config, &output),
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(&key, &value, config_path, output)
        }
    }
}

/// Initialize logging
///
/// Level comes from STASHDB_LOG (default `warn`). Logs go to
/// `config.log_file` when set, stderr otherwise.
fn init_logging(config: &Config) {
    let log_level = std::env::var("STASHDB_LOG").unwrap_or_else(|_| "warn".to_string());
    let env_filter = EnvFilter::new(format!(
        "stashdb_core={},stashdb_cli={}",
        log_level, log_level
    ));

    let Some(log_path) = config.log_file.as_ref() else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
        return;
    };

    let log_file = match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
            return;
        }
    };

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(log_file))
        .try_init();

    info!("Logging to {:?}", log_path);
}
