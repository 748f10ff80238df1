use serde::Serialize;
use tally_core::models::{Category, Entry, Ledger};
use tally_core::store::LocalStore;
use tally_core::sync::{Record, StatusIndicator, Versioned};

use crate::commands::common::{format_sync_timestamp, is_synced, CliContext};
use crate::error::CliError;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct KindSummary {
    pub kind: String,
    pub live: usize,
    pub deleted: usize,
    /// Records edited locally since the last push
    pub unsynced: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub profile: String,
    pub replica_id: String,
    pub db_path: String,
    pub remote: Option<String>,
    pub indicator: StatusIndicator,
    pub last_sync_time: Option<String>,
    pub pending_conflicts: usize,
    pub records: Vec<KindSummary>,
}

pub async fn run_status(context: &CliContext, as_json: bool) -> Result<(), CliError> {
    let report = collect_status(context).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Profile:   {} ({})", report.profile, report.replica_id);
    println!("Database:  {}", report.db_path);
    println!(
        "Remote:    {}",
        report.remote.as_deref().unwrap_or("not configured")
    );
    println!("Status:    {}", report.indicator);
    println!(
        "Last sync: {}",
        report.last_sync_time.as_deref().unwrap_or("never")
    );
    println!("Conflicts: {}", report.pending_conflicts);
    for summary in &report.records {
        println!(
            "  {:<13} {} live, {} deleted, {} unsynced",
            summary.kind, summary.live, summary.deleted, summary.unsynced
        );
    }
    Ok(())
}

pub async fn collect_status(context: &CliContext) -> Result<StatusReport, CliError> {
    let store = context.open_store()?;
    let metadata = store.load_metadata().await?;

    let records = vec![
        summarize::<Ledger>(&store.load_all(None).await?),
        summarize::<Entry>(&store.load_all(None).await?),
        summarize::<Category>(&store.load_all(None).await?),
    ];

    // No pass runs here, so only the persisted state feeds the indicator.
    let indicator = if context.remote.is_none() {
        StatusIndicator::Offline
    } else if metadata.pending_conflicts.is_empty() {
        StatusIndicator::UpToDate
    } else {
        StatusIndicator::ConflictsPending
    };

    Ok(StatusReport {
        profile: context.profile_name.clone(),
        replica_id: context.replica.to_string(),
        db_path: context.db_path.display().to_string(),
        remote: context.remote.as_ref().map(|remote| remote.describe()),
        indicator,
        last_sync_time: metadata.last_sync_time.map(format_sync_timestamp),
        pending_conflicts: metadata.pending_conflicts.len(),
        records,
    })
}

fn summarize<T: Record>(records: &[Versioned<T>]) -> KindSummary {
    KindSummary {
        kind: T::KIND.to_string(),
        live: records.iter().filter(|record| !record.deleted).count(),
        deleted: records.iter().filter(|record| record.deleted).count(),
        unsynced: records.iter().filter(|record| !is_synced(record)).count(),
    }
}
