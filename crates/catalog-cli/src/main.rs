//! Catalog CLI
//!
//! Command-line interface for the entity catalog

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Debug, Parser)]
#[command(name = "catalog")]
#[command(about = "Catalog - versioned entity ingestion", long_about = None)]
struct Cli {
    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check a mutation graph against the schema registry
    Validate(commands::validate::ValidateArgs),
    /// Validate, build and apply a mutation graph
    Submit(commands::submit::SubmitArgs),
    /// Show an entity and its versions
    History(commands::history::HistoryArgs),
    /// Show a change-set and its changes
    ChangeSet(commands::change_set::ChangeSetArgs),
}

fn main() {
    let cli = Cli::parse();

    let result = commands::load_config(cli.config.as_deref()).and_then(|config| {
        catalog_core::logging_facility::init(config.logging.profile);
        match cli.command {
            Commands::Validate(args) => commands::validate::execute(args, &config),
            Commands::Submit(args) => commands::submit::execute(args, &config),
            Commands::History(args) => commands::history::execute(args, &config),
            Commands::ChangeSet(args) => commands::change_set::execute(args, &config),
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
