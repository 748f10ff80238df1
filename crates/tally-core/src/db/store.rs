//! `SQLite`-backed record store

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)] // SQLite stores versions as i64

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use tokio::sync::Mutex;

use super::connection::Database;
use crate::error::Result;
use crate::models::{RecordId, ReplicaId};
use crate::store::{LocalStore, RemoteStore, StoreError, StoreResult, SyncMetadata};
use crate::sync::{Record, RecordKind, Versioned};

const RECORD_COLUMNS: &str = "id, version, last_synced_version, base_fields, deleted, deleted_at, \
                              last_modified_by, updated_at, data";

const LAST_SYNC_TIME_KEY: &str = "last_sync_time";
const PENDING_CONFLICTS_KEY: &str = "pending_conflicts";

/// Record store over a single `SQLite` file.
///
/// Serves as the device-local store and, behind the relay, as the shared
/// remote copy. Cloning shares the connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the store at `path`, running migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_database(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    pub fn from_database(database: Database) -> Self {
        Self {
            conn: Arc::new(Mutex::new(database.into_connection())),
        }
    }

    /// Every record of `kind` as stored, optionally scoped to one parent.
    pub async fn load_raw(
        &self,
        kind: RecordKind,
        parent: Option<&RecordId>,
    ) -> StoreResult<Vec<Versioned<Value>>> {
        let conn = self.conn.lock().await;
        let records = match parent {
            Some(parent) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RECORD_COLUMNS} FROM records WHERE kind = ?1 AND parent_id = ?2 ORDER BY id"
                ))?;
                let rows = stmt.query_map(params![kind.as_str(), parent.as_str()], read_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RECORD_COLUMNS} FROM records WHERE kind = ?1 ORDER BY id"
                ))?;
                let rows = stmt.query_map(params![kind.as_str()], read_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        records.into_iter().map(RawRow::into_record).collect()
    }

    /// One stored record, tombstones included.
    pub async fn get_raw(&self, kind: RecordKind, id: &RecordId) -> StoreResult<Option<Versioned<Value>>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE kind = ?1 AND id = ?2"),
                params![kind.as_str(), id.as_str()],
                read_row,
            )
            .optional()?;
        row.map(RawRow::into_record).transpose()
    }

    /// Insert or overwrite one record as given.
    pub async fn upsert_raw(
        &self,
        kind: RecordKind,
        parent: Option<&RecordId>,
        record: &Versioned<Value>,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        write_row(&conn, kind, parent, record)
    }

    async fn write_batch<T: Record>(&self, records: &[Versioned<T>]) -> StoreResult<()> {
        let raw = records
            .iter()
            .map(|record| Ok((record.parent_id(), record.to_raw()?)))
            .collect::<StoreResult<Vec<_>>>()?;

        let conn = self.conn.lock().await;
        let tx = conn.unchecked_transaction()?;
        for (parent, record) in &raw {
            write_row(&tx, T::KIND, parent.as_ref(), record)?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn get_meta(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.conn.lock().await;
        let value = conn
            .query_row(
                "SELECT value FROM sync_metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

struct RawRow {
    id: String,
    version: i64,
    last_synced_version: Option<i64>,
    base_fields: Option<String>,
    deleted: bool,
    deleted_at: Option<String>,
    last_modified_by: Option<String>,
    updated_at: String,
    data: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        version: row.get(1)?,
        last_synced_version: row.get(2)?,
        base_fields: row.get(3)?,
        deleted: row.get(4)?,
        deleted_at: row.get(5)?,
        last_modified_by: row.get(6)?,
        updated_at: row.get(7)?,
        data: row.get(8)?,
    })
}

impl RawRow {
    fn into_record(self) -> StoreResult<Versioned<Value>> {
        let id = self
            .id
            .parse::<RecordId>()
            .map_err(|e| StoreError::Backend(format!("invalid record id '{}': {e}", self.id)))?;
        Ok(Versioned {
            id,
            version: self.version as u64,
            last_synced_version: self.last_synced_version.map(|version| version as u64),
            base_fields: self
                .base_fields
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            deleted: self.deleted,
            deleted_at: self.deleted_at.as_deref().map(parse_timestamp).transpose()?,
            last_modified_by: self.last_modified_by.map(ReplicaId::new),
            updated_at: parse_timestamp(&self.updated_at)?,
            data: serde_json::from_str(&self.data)?,
        })
    }
}

fn write_row(
    conn: &Connection,
    kind: RecordKind,
    parent: Option<&RecordId>,
    record: &Versioned<Value>,
) -> StoreResult<()> {
    let base_fields = record
        .base_fields
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT INTO records (kind, id, parent_id, version, last_synced_version, base_fields,
                              deleted, deleted_at, last_modified_by, updated_at, data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(kind, id) DO UPDATE SET
            parent_id = excluded.parent_id,
            version = excluded.version,
            last_synced_version = excluded.last_synced_version,
            base_fields = excluded.base_fields,
            deleted = excluded.deleted,
            deleted_at = excluded.deleted_at,
            last_modified_by = excluded.last_modified_by,
            updated_at = excluded.updated_at,
            data = excluded.data",
        params![
            kind.as_str(),
            record.id.as_str(),
            parent.map(RecordId::as_str),
            record.version as i64,
            record.last_synced_version.map(|version| version as i64),
            base_fields,
            record.deleted,
            record.deleted_at.map(format_timestamp),
            record.last_modified_by.as_ref().map(ReplicaId::as_str),
            format_timestamp(record.updated_at),
            serde_json::to_string(&record.data)?,
        ],
    )?;
    Ok(())
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("invalid timestamp '{value}': {e}")))
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn load_all<T: Record>(&self, parent: Option<&RecordId>) -> StoreResult<Vec<Versioned<T>>> {
        self.load_raw(T::KIND, parent)
            .await?
            .into_iter()
            .map(|raw| Versioned::from_raw(raw).map_err(StoreError::from))
            .collect()
    }

    async fn save_all<T: Record>(&self, records: &[Versioned<T>]) -> StoreResult<()> {
        self.write_batch(records).await
    }

    async fn save<T: Record>(&self, record: &Versioned<T>) -> StoreResult<()> {
        self.write_batch(std::slice::from_ref(record)).await
    }

    async fn load_metadata(&self) -> StoreResult<SyncMetadata> {
        let last_sync_time = self
            .get_meta(LAST_SYNC_TIME_KEY)
            .await?
            .as_deref()
            .map(parse_timestamp)
            .transpose()?;
        let pending_conflicts = match self.get_meta(PENDING_CONFLICTS_KEY).await? {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };
        Ok(SyncMetadata {
            last_sync_time,
            pending_conflicts,
        })
    }

    async fn save_metadata(&self, metadata: &SyncMetadata) -> StoreResult<()> {
        let conflicts = serde_json::to_string(&metadata.pending_conflicts)?;
        let conn = self.conn.lock().await;
        let tx = conn.unchecked_transaction()?;
        match metadata.last_sync_time {
            Some(time) => {
                tx.execute(
                    "INSERT OR REPLACE INTO sync_metadata (key, value) VALUES (?1, ?2)",
                    params![LAST_SYNC_TIME_KEY, format_timestamp(time)],
                )?;
            }
            None => {
                tx.execute(
                    "DELETE FROM sync_metadata WHERE key = ?1",
                    params![LAST_SYNC_TIME_KEY],
                )?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO sync_metadata (key, value) VALUES (?1, ?2)",
            params![PENDING_CONFLICTS_KEY, conflicts],
        )?;
        tx.commit()?;
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for SqliteStore {
    async fn fetch_all<T: Record>(&self, parent: Option<&RecordId>) -> StoreResult<Vec<Versioned<T>>> {
        LocalStore::load_all(self, parent).await
    }

    async fn upsert<T: Record>(&self, record: &Versioned<T>) -> StoreResult<()> {
        self.write_batch(std::slice::from_ref(record)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Entry, Ledger};
    use crate::sync::{FieldValue, SyncConflict, DELETED_FIELD, DELETED_SENTINEL, EDITED_SENTINEL};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn replica() -> ReplicaId {
        ReplicaId::new("desk")
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn records_roundtrip_with_envelope() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut record = Versioned::new(Category::new("Food"), &replica(), at(9));
        record.update(&replica(), at(10), |category| {
            category.color = Some("#00ff00".to_string());
        });
        record.mark_pushed();

        store.save(&record).await.unwrap();
        let loaded: Vec<Versioned<Category>> = store.load_all(None).await.unwrap();
        assert_eq!(loaded, vec![record]);
    }

    #[tokio::test]
    async fn tombstones_are_returned() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut record = Versioned::new(Ledger::new("Trip", "EUR"), &replica(), at(9));
        record.tombstone(&replica(), at(11));
        store.save(&record).await.unwrap();

        let loaded: Vec<Versioned<Ledger>> = store.load_all(None).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].deleted);
        assert_eq!(loaded[0].deleted_at, Some(at(11)));
    }

    #[tokio::test]
    async fn transactions_are_scoped_by_ledger() {
        let store = SqliteStore::open_in_memory().unwrap();
        let home = RecordId::new();
        let trip = RecordId::new();
        let entries = vec![
            Versioned::new(Entry::new(home, -1200, "Grocer", at(8)), &replica(), at(8)),
            Versioned::new(Entry::new(trip, -5000, "Hotel", at(9)), &replica(), at(9)),
            Versioned::new(Entry::new(home, 250_000, "Employer", at(10)), &replica(), at(10)),
        ];
        store.save_all(&entries).await.unwrap();

        let scoped: Vec<Versioned<Entry>> = store.load_all(Some(&home)).await.unwrap();
        assert_eq!(scoped.len(), 2);
        assert!(scoped.iter().all(|record| record.data.ledger_id == home));

        let everything: Vec<Versioned<Entry>> = store.load_all(None).await.unwrap();
        assert_eq!(everything.len(), 3);
    }

    #[tokio::test]
    async fn save_overwrites_existing_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut record = Versioned::new(Category::new("Food"), &replica(), at(9));
        store.save(&record).await.unwrap();
        record.update(&replica(), at(10), |category| category.name = "Groceries".to_string());
        store.save(&record).await.unwrap();

        let loaded: Vec<Versioned<Category>> = store.load_all(None).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].version, 2);
        assert_eq!(loaded[0].data.name, "Groceries");
    }

    #[tokio::test]
    async fn metadata_roundtrips_and_defaults_to_empty() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.load_metadata().await.unwrap(), SyncMetadata::default());

        let conflict = SyncConflict {
            kind: RecordKind::Category,
            id: RecordId::new(),
            field: DELETED_FIELD.to_string(),
            local_value: FieldValue::Text(DELETED_SENTINEL.to_string()),
            remote_value: FieldValue::Text(EDITED_SENTINEL.to_string()),
            local_version: 3,
            remote_version: 4,
        };
        let metadata = SyncMetadata {
            last_sync_time: Some(at(12)),
            pending_conflicts: vec![conflict],
        };
        store.save_metadata(&metadata).await.unwrap();
        assert_eq!(store.load_metadata().await.unwrap(), metadata);
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("tally.db");
        let record = Versioned::new(Category::new("Rent"), &replica(), at(7));
        {
            let store = SqliteStore::open(&path).unwrap();
            store.save(&record).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let loaded: Vec<Versioned<Category>> = store.fetch_all(None).await.unwrap();
        assert_eq!(loaded, vec![record]);
    }

    #[tokio::test]
    async fn raw_access_matches_typed_access() {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = Versioned::new(Category::new("Fuel"), &replica(), at(6));
        store
            .upsert_raw(RecordKind::Category, None, &record.to_raw().unwrap())
            .await
            .unwrap();

        let typed: Vec<Versioned<Category>> = store.load_all(None).await.unwrap();
        assert_eq!(typed, vec![record.clone()]);
        let raw = store.get_raw(RecordKind::Category, &record.id).await.unwrap();
        assert_eq!(raw, Some(record.to_raw().unwrap()));
        assert!(store
            .get_raw(RecordKind::Ledger, &record.id)
            .await
            .unwrap()
            .is_none());
    }
}
