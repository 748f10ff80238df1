//! Tally CLI - track ledgers from the terminal and sync them across devices

mod cli;
mod commands;
mod config_profiles;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::category::run_category;
use crate::commands::common::CliContext;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::conflicts::run_conflicts;
use crate::commands::entry::run_entry;
use crate::commands::ledger::run_ledger;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tally=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let profile = cli.profile.as_deref();

    match cli.command {
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref())?,
        Commands::Config { command } => run_config(command, profile, cli.db_path)?,
        Commands::Ledger { command } => {
            run_ledger(command, &CliContext::resolve(cli.db_path, profile)?).await?;
        }
        Commands::Category { command } => {
            run_category(command, &CliContext::resolve(cli.db_path, profile)?).await?;
        }
        Commands::Entry { command } => {
            run_entry(command, &CliContext::resolve(cli.db_path, profile)?).await?;
        }
        Commands::Sync { watch, json } => {
            run_sync(&CliContext::resolve(cli.db_path, profile)?, watch, json).await?;
        }
        Commands::Status { json } => {
            run_status(&CliContext::resolve(cli.db_path, profile)?, json).await?;
        }
        Commands::Conflicts { command } => {
            run_conflicts(command, &CliContext::resolve(cli.db_path, profile)?).await?;
        }
    }

    Ok(())
}
