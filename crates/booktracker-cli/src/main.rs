//! Booktracker CLI - keep a reading list locally and mirror it to Notion

mod auth;
mod cli;
mod commands;
mod config;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, SyncCommands};
use crate::commands::add::run_add;
use crate::commands::auth_cmd::run_auth;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::delete::run_delete;
use crate::commands::edit::run_edit;
use crate::commands::list::run_list;
use crate::commands::sync::{run_sync, run_sync_queue, run_sync_resolve, run_sync_status};
use crate::config::CliConfig;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("Error: {error}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "booktracker=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<i32, CliError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = CliConfig::load().map_err(CliError::Config)?;
    let db_path = config.resolve_db_path(cli.db_path.clone());

    match cli.command {
        Commands::Add { title, fields } => run_add(&title, fields, &db_path)?,
        Commands::List { status, all, json } => run_list(status, all, json, &db_path)?,
        Commands::Edit {
            id,
            title,
            fields,
            clear,
        } => run_edit(&id, title, fields, &clear, &db_path)?,
        Commands::Delete { id } => run_delete(&id, &db_path)?,
        Commands::Sync { command, run } => {
            let settings = config.effective_sync_settings();
            return match command {
                None => run_sync(run, &settings, &db_path).await,
                Some(SyncCommands::Status { json }) => {
                    run_sync_status(json, &settings, &db_path).await
                }
                Some(SyncCommands::Resolve { id, winner }) => {
                    run_sync_resolve(&id, winner, &settings, &db_path)
                        .await
                        .map(|()| 0)
                }
                Some(SyncCommands::Queue { json }) => run_sync_queue(json, &db_path).map(|()| 0),
            };
        }
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref())?,
        Commands::Config { command } => run_config(command, cli.db_path)?,
        Commands::Auth { command } => run_auth(command)?,
    }

    Ok(0)
}
