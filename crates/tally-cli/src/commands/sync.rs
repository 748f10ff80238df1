use std::sync::Arc;

use tally_core::sync::{PassOutcome, SyncReport, SyncStatus};

use crate::commands::common::{format_conflict_lines, format_sync_timestamp, CliContext};
use crate::error::CliError;

pub async fn run_sync(context: &CliContext, watch: bool, as_json: bool) -> Result<(), CliError> {
    let (engine, _network) = context.engine()?;
    engine.refresh_status().await?;

    if watch {
        return run_watch(Arc::new(engine)).await;
    }

    let report = engine.sync_all().await;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_report_lines(&report) {
            println!("{line}");
        }
    }

    match report.outcome {
        PassOutcome::Completed if report.errors.is_empty() => Ok(()),
        PassOutcome::Completed => Err(CliError::SyncFailed(format!(
            "{} item(s) failed; they will be retried on the next sync",
            report.errors.len()
        ))),
        _ => Err(CliError::SyncFailed(
            report
                .errors
                .first()
                .map_or_else(|| "sync did not run".to_string(), ToString::to_string),
        )),
    }
}

async fn run_watch(engine: Arc<crate::commands::common::CliEngine>) -> Result<(), CliError> {
    let mut status = engine.watch_status();
    let scheduler = engine.spawn_scheduler();
    scheduler.request_sync();
    println!("Watching for changes. Press Ctrl-C to stop.");

    let mut last_line = String::new();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = format_status_line(&status.borrow_and_update());
                if line != last_line {
                    println!("{line}");
                    last_line = line;
                }
            }
        }
    }

    scheduler.shutdown().await;
    Ok(())
}

pub fn format_report_lines(report: &SyncReport) -> Vec<String> {
    let mut lines = Vec::new();
    match report.outcome {
        PassOutcome::Completed => lines.push(format!(
            "Sync completed: {} item(s) synced, {} conflict(s)",
            report.items_synced,
            report.conflicts.len()
        )),
        PassOutcome::Offline => lines.push("Sync skipped: offline".to_string()),
        PassOutcome::Aborted => lines.push("Sync aborted: remote unreachable".to_string()),
        PassOutcome::Coalesced => lines.push("Sync already in progress".to_string()),
    }
    if !report.conflicts.is_empty() {
        lines.push("Conflicts (resolve with `tally conflicts resolve <key> <local|remote|VALUE>`):".to_string());
        lines.extend(
            format_conflict_lines(&report.conflicts)
                .into_iter()
                .map(|line| format!("  {line}")),
        );
    }
    lines.extend(report.errors.iter().map(|error| format!("  error: {error}")));
    lines
}

pub fn format_status_line(status: &SyncStatus) -> String {
    let last = status
        .last_sync_time
        .map_or_else(|| "never".to_string(), format_sync_timestamp);
    let mut line = format!("[{}] last sync: {last}", status.indicator());
    if status.pending_conflicts > 0 {
        line.push_str(&format!(", {} conflict(s) pending", status.pending_conflicts));
    }
    if let Some(error) = &status.last_error {
        line.push_str(&format!(", last error: {error}"));
    }
    line
}
