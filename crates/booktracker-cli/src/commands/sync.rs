use std::path::Path;

use booktracker_core::db::{PendingQueue, SqlitePendingQueue, SyncStateStore};
use booktracker_core::models::PendingChange;
use booktracker_core::sync::{
    AutoResolvePolicy, CancelFlag, SyncMode, SyncOrchestrator, SyncSummary, Winner,
};
use booktracker_core::{Library, SyncSettings};
use serde::Serialize;

use crate::cli::SyncRunArgs;
use crate::commands::common::{
    build_remote_client, format_last_run, format_queue_lines, format_summary_lines, open_database,
    queue_to_item, resolve_book, QueueItem,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    summary: &'a SyncSummary,
    last_run: Option<booktracker_core::db::LastRun>,
}

/// Policy for a run: no flag leaves conflicts alone, a bare flag uses the configured policy
pub fn auto_resolve_policy(
    flag: Option<Option<Winner>>,
    configured: AutoResolvePolicy,
) -> AutoResolvePolicy {
    match flag {
        None => AutoResolvePolicy::None,
        Some(None) => configured,
        Some(Some(Winner::Local)) => AutoResolvePolicy::Local,
        Some(Some(Winner::Remote)) => AutoResolvePolicy::Remote,
    }
}

pub async fn run_sync(
    args: SyncRunArgs,
    settings: &SyncSettings,
    db_path: &Path,
) -> Result<i32, CliError> {
    let client = build_remote_client(settings)?;
    let db = open_database(db_path)?;
    let policy = auto_resolve_policy(args.auto_resolve, settings.auto_resolve_policy);

    let cancel = CancelFlag::new();
    let watcher = spawn_interrupt_watcher(cancel.clone());
    let orchestrator = SyncOrchestrator::new(&db, &client)
        .with_options(settings.sync_options())
        .with_cancel_flag(cancel);
    let summary = orchestrator.run(args.mode, policy).await;
    watcher.abort();
    let summary = summary?;

    print_summary(&summary, args.json)?;
    Ok(summary.outcome().exit_code())
}

pub async fn run_sync_status(
    as_json: bool,
    settings: &SyncSettings,
    db_path: &Path,
) -> Result<i32, CliError> {
    let client = build_remote_client(settings)?;
    let db = open_database(db_path)?;

    let summary = SyncOrchestrator::new(&db, &client)
        .with_options(settings.sync_options())
        .run(SyncMode::StatusOnly, AutoResolvePolicy::None)
        .await?;
    let last_run = SyncStateStore::new(db.connection()).last_run()?;

    if as_json {
        let report = StatusReport {
            summary: &summary,
            last_run,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_summary_lines(&summary) {
            println!("{line}");
        }
        println!("{}", format_last_run(last_run.as_ref()));
    }
    Ok(summary.outcome().exit_code())
}

pub async fn run_sync_resolve(
    id: &str,
    winner: Winner,
    settings: &SyncSettings,
    db_path: &Path,
) -> Result<(), CliError> {
    let client = build_remote_client(settings)?;
    let db = open_database(db_path)?;
    let book = resolve_book(&Library::new(&db), id)?;

    let resolved = SyncOrchestrator::new(&db, &client)
        .with_options(settings.sync_options())
        .resolve(&book.id, winner)
        .await?;
    println!("Resolved {} with the {winner} copy", resolved.label());
    Ok(())
}

pub fn list_queue(db_path: &Path) -> Result<Vec<PendingChange>, CliError> {
    let db = open_database(db_path)?;
    let queue = SqlitePendingQueue::new(db.connection());
    let mut changes = Vec::new();
    for change in queue.list_pending() {
        changes.push(change?);
    }
    Ok(changes)
}

pub fn run_sync_queue(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let changes = list_queue(db_path)?;

    if as_json {
        let json_items = changes.iter().map(queue_to_item).collect::<Vec<QueueItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if changes.is_empty() {
        println!("No pending changes.");
        return Ok(());
    }

    for line in format_queue_lines(&changes) {
        println!("{line}");
    }
    Ok(())
}

fn print_summary(summary: &SyncSummary, as_json: bool) -> Result<(), CliError> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        for line in format_summary_lines(summary) {
            println!("{line}");
        }
    }
    Ok(())
}

/// First Ctrl-C asks the run to stop after the current record
fn spawn_interrupt_watcher(cancel: CancelFlag) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; stopping after the current record");
            cancel.cancel();
        }
    })
}
