use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tally_core::config::{RemoteConfig, SyncSettings};
use tally_core::db::{Repository, SqliteStore};
use tally_core::models::{Category, Entry, Ledger};
use tally_core::store::ConfiguredRemote;
use tally_core::sync::{SyncConflict, SyncEngine, SystemClock, Versioned};
use tally_core::util::format_amount;
use tally_core::{RecordId, ReplicaId};
use tokio::sync::watch;

use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;

pub type CliEngine = SyncEngine<SqliteStore, ConfiguredRemote>;

/// Everything a command needs, resolved once from flags, env and profile.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub db_path: PathBuf,
    pub profile_name: String,
    pub replica: ReplicaId,
    pub remote: Option<RemoteConfig>,
    pub settings: SyncSettings,
}

impl CliContext {
    /// Resolve the context, assigning this device a replica ID on first use.
    pub fn resolve(cli_db_path: Option<PathBuf>, profile: Option<&str>) -> Result<Self, CliError> {
        let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
        let profile_name = config.resolve_profile_name(profile);
        let existing = config.profile(&profile_name).cloned().unwrap_or_default();

        let replica = if let Some(replica) = existing.replica_id() {
            replica
        } else {
            let replica = ReplicaId::generate();
            config.profile_mut_or_default(&profile_name).replica_id = Some(replica.to_string());
            let path = config.save().map_err(CliError::Config)?;
            tracing::info!("Assigned replica id {replica} to profile '{profile_name}' in {}", path.display());
            replica
        };

        existing.sync.validate().map_err(CliError::Config)?;
        Ok(Self {
            db_path: resolve_db_path(cli_db_path),
            profile_name,
            replica,
            remote: existing.remote_config().map_err(CliError::Config)?,
            settings: existing.sync,
        })
    }

    pub fn open_store(&self) -> Result<SqliteStore, CliError> {
        Ok(SqliteStore::open(&self.db_path)?)
    }

    pub fn repository(&self) -> Result<Repository<SqliteStore>, CliError> {
        Ok(Repository::new(
            self.open_store()?,
            self.replica.clone(),
            Arc::new(SystemClock),
        ))
    }

    /// Engine over the local database and the configured remote.
    ///
    /// The returned sender drives the engine's network signal.
    pub fn engine(&self) -> Result<(CliEngine, watch::Sender<bool>), CliError> {
        let remote_config = self.remote.as_ref().ok_or(CliError::SyncNotConfigured)?;
        let remote = ConfiguredRemote::open(remote_config, self.settings.remote_timeout())?;
        let (network, receiver) = watch::channel(true);
        let engine = SyncEngine::new(
            self.open_store()?,
            remote,
            Arc::new(SystemClock),
            receiver,
            self.settings,
            self.replica.clone(),
        );
        Ok((engine, network))
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("TALLY_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(env::temp_dir)
        .join("tally")
        .join("tally.db")
}

pub fn parse_date(value: &str) -> Result<DateTime<Utc>, CliError> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(value)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|_| CliError::InvalidValue(format!("'{value}' is not a YYYY-MM-DD or RFC 3339 date")))
}

pub fn parse_amount(value: &str) -> Result<i64, CliError> {
    tally_core::util::parse_amount(value).map_err(CliError::InvalidValue)
}

pub fn short_id(id: &RecordId) -> String {
    id.to_string().chars().take(13).collect()
}

pub fn format_relative_time(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = (now - timestamp).num_milliseconds().max(0);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn format_sync_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Whether the remote has already seen this exact version
pub fn is_synced<T>(record: &Versioned<T>) -> bool {
    record.last_synced_version == Some(record.version)
}

#[derive(Debug, Serialize)]
pub struct LedgerListItem {
    pub id: String,
    pub name: String,
    pub currency: String,
    pub description: Option<String>,
    pub archived: bool,
    pub deleted: bool,
    pub version: u64,
    pub synced: bool,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct CategoryListItem {
    pub id: String,
    pub name: String,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub deleted: bool,
    pub version: u64,
    pub synced: bool,
}

#[derive(Debug, Serialize)]
pub struct EntryListItem {
    pub id: String,
    pub ledger_id: String,
    pub amount: i64,
    pub amount_display: String,
    pub date: String,
    pub counterparty: String,
    pub category_id: Option<String>,
    pub payment_mode: String,
    pub remarks: Option<String>,
    pub tags: Vec<String>,
    pub version: u64,
    pub synced: bool,
}

#[derive(Debug, Serialize)]
pub struct ConflictItem {
    pub key: String,
    pub kind: String,
    pub id: String,
    pub field: String,
    pub local_value: String,
    pub remote_value: String,
    pub local_version: u64,
    pub remote_version: u64,
}

pub fn ledger_to_item(record: &Versioned<Ledger>) -> LedgerListItem {
    LedgerListItem {
        id: record.id.to_string(),
        name: record.data.name.clone(),
        currency: record.data.currency.clone(),
        description: record.data.description.clone(),
        archived: record.data.archived,
        deleted: record.deleted,
        version: record.version,
        synced: is_synced(record),
        updated_at: record.updated_at.to_rfc3339(),
    }
}

pub fn category_to_item(record: &Versioned<Category>) -> CategoryListItem {
    CategoryListItem {
        id: record.id.to_string(),
        name: record.data.name.clone(),
        color: record.data.color.clone(),
        icon: record.data.icon.clone(),
        deleted: record.deleted,
        version: record.version,
        synced: is_synced(record),
    }
}

pub fn entry_to_item(record: &Versioned<Entry>) -> EntryListItem {
    EntryListItem {
        id: record.id.to_string(),
        ledger_id: record.data.ledger_id.to_string(),
        amount: record.data.amount,
        amount_display: format_amount(record.data.amount),
        date: record.data.date.format("%Y-%m-%d").to_string(),
        counterparty: record.data.counterparty.clone(),
        category_id: record.data.category_id.map(|id| id.to_string()),
        payment_mode: record.data.payment_mode.to_string(),
        remarks: record.data.remarks.clone(),
        tags: record.data.tags.clone(),
        version: record.version,
        synced: is_synced(record),
    }
}

pub fn conflict_to_item(conflict: &SyncConflict) -> ConflictItem {
    ConflictItem {
        key: conflict.key(),
        kind: conflict.kind.to_string(),
        id: conflict.id.to_string(),
        field: conflict.field.clone(),
        local_value: conflict.local_value.to_string(),
        remote_value: conflict.remote_value.to_string(),
        local_version: conflict.local_version,
        remote_version: conflict.remote_version,
    }
}

pub fn format_ledger_lines(ledgers: &[Versioned<Ledger>]) -> Vec<String> {
    let now = Utc::now();
    ledgers
        .iter()
        .map(|record| {
            let mut flags = Vec::new();
            if record.data.archived {
                flags.push("archived");
            }
            if record.deleted {
                flags.push("deleted");
            }
            if !is_synced(record) {
                flags.push("unsynced");
            }
            format!(
                "{:<13}  {:<24}  {}  {:<10}  {}",
                short_id(&record.id),
                record.data.name,
                record.data.currency,
                format_relative_time(record.updated_at, now),
                flags.join(" ")
            )
            .trim_end()
            .to_string()
        })
        .collect()
}

pub fn format_category_lines(categories: &[Versioned<Category>]) -> Vec<String> {
    categories
        .iter()
        .map(|record| {
            let color = record.data.color.as_deref().unwrap_or("");
            let state = if record.deleted { "deleted" } else { "" };
            format!(
                "{:<13}  {:<24}  {color:<8}  {state}",
                short_id(&record.id),
                record.data.name
            )
            .trim_end()
            .to_string()
        })
        .collect()
}

pub fn format_entry_lines(entries: &[Versioned<Entry>]) -> Vec<String> {
    entries
        .iter()
        .map(|record| {
            let entry = &record.data;
            let tags = entry
                .tags
                .iter()
                .map(|tag| format!("#{tag}"))
                .collect::<Vec<_>>()
                .join(" ");
            format!(
                "{:<13}  {}  {:>12}  {:<24}  {:<13}  {tags}",
                short_id(&record.id),
                entry.date.format("%Y-%m-%d"),
                format_amount(entry.amount),
                entry.counterparty,
                entry.payment_mode
            )
            .trim_end()
            .to_string()
        })
        .collect()
}

pub fn format_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {}  local={} (v{})  remote={} (v{})",
                conflict.key(),
                conflict.kind,
                conflict.local_value,
                conflict.local_version,
                conflict.remote_value,
                conflict.remote_version
            )
        })
        .collect()
}
