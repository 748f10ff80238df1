//! In-memory store usable as either side of a sync

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{CacheInvalidator, LocalStore, RemoteStore, StoreError, StoreResult, SyncMetadata};
use crate::models::RecordId;
use crate::sync::{Record, RecordKind, Versioned};

#[derive(Debug, Clone)]
struct StoredRecord {
    parent: Option<RecordId>,
    raw: Versioned<serde_json::Value>,
}

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<(RecordKind, RecordId), StoredRecord>,
    metadata: SyncMetadata,
    failing_writes: HashSet<RecordId>,
    failing_reads: HashSet<RecordKind>,
}

/// Records held in process memory.
///
/// Cloning shares the underlying data. The availability and failure switches
/// let tests simulate network loss and per-item failures.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    available: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            available: Arc::new(AtomicBool::new(true)),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate losing or regaining the connection.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make every write touching `id` fail until cleared.
    pub fn fail_writes_for(&self, id: RecordId) {
        self.lock().failing_writes.insert(id);
    }

    /// Make reads of `kind` fail until cleared.
    pub fn fail_reads_for(&self, kind: RecordKind) {
        self.lock().failing_reads.insert(kind);
    }

    pub fn clear_failures(&self) {
        let mut inner = self.lock();
        inner.failing_writes.clear();
        inner.failing_reads.clear();
    }

    /// Number of successful record writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Current copy of one record, if present.
    pub fn get<T: Record>(&self, id: &RecordId) -> StoreResult<Option<Versioned<T>>> {
        self.lock()
            .records
            .get(&(T::KIND, *id))
            .map(|stored| Versioned::from_raw(stored.raw.clone()))
            .transpose()
            .map_err(StoreError::from)
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        }
    }

    fn read<T: Record>(&self, parent: Option<&RecordId>) -> StoreResult<Vec<Versioned<T>>> {
        self.ensure_available()?;
        let inner = self.lock();
        if inner.failing_reads.contains(&T::KIND) {
            return Err(StoreError::Backend(format!("read of {} failed", T::KIND)));
        }
        inner
            .records
            .iter()
            .filter(|((kind, _), stored)| {
                *kind == T::KIND && parent.is_none_or(|parent| stored.parent.as_ref() == Some(parent))
            })
            .map(|(_, stored)| Versioned::from_raw(stored.raw.clone()).map_err(StoreError::from))
            .collect()
    }

    fn write<T: Record>(&self, records: &[Versioned<T>]) -> StoreResult<()> {
        self.ensure_available()?;
        let mut inner = self.lock();
        if let Some(record) = records
            .iter()
            .find(|record| inner.failing_writes.contains(&record.id))
        {
            return Err(StoreError::Backend(format!(
                "write of {} {} failed",
                T::KIND,
                record.id
            )));
        }
        for record in records {
            let stored = StoredRecord {
                parent: record.parent_id(),
                raw: record.to_raw()?,
            };
            inner.records.insert((T::KIND, record.id), stored);
        }
        self.writes.fetch_add(records.len(), Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn load_all<T: Record>(&self, parent: Option<&RecordId>) -> StoreResult<Vec<Versioned<T>>> {
        self.read(parent)
    }

    async fn save_all<T: Record>(&self, records: &[Versioned<T>]) -> StoreResult<()> {
        self.write(records)
    }

    async fn save<T: Record>(&self, record: &Versioned<T>) -> StoreResult<()> {
        self.write(std::slice::from_ref(record))
    }

    async fn load_metadata(&self) -> StoreResult<SyncMetadata> {
        self.ensure_available()?;
        Ok(self.lock().metadata.clone())
    }

    async fn save_metadata(&self, metadata: &SyncMetadata) -> StoreResult<()> {
        self.ensure_available()?;
        self.lock().metadata = metadata.clone();
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn fetch_all<T: Record>(&self, parent: Option<&RecordId>) -> StoreResult<Vec<Versioned<T>>> {
        self.read(parent)
    }

    async fn upsert<T: Record>(&self, record: &Versioned<T>) -> StoreResult<()> {
        self.write(std::slice::from_ref(record))
    }
}

/// Invalidator that remembers every pattern it was given
#[derive(Debug, Clone, Default)]
pub struct RecordingInvalidator {
    patterns: Arc<Mutex<Vec<String>>>,
}

impl RecordingInvalidator {
    pub fn patterns(&self) -> Vec<String> {
        self.patterns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CacheInvalidator for RecordingInvalidator {
    fn invalidate(&self, pattern: &str) {
        self.patterns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(pattern.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Entry, ReplicaId};
    use chrono::Utc;

    fn replica() -> ReplicaId {
        ReplicaId::new("memory-test")
    }

    #[tokio::test]
    async fn saves_and_loads_scoped_by_parent() {
        let store = MemoryStore::new();
        let ledger_a = RecordId::new();
        let ledger_b = RecordId::new();
        let first = Versioned::new(Entry::new(ledger_a, 100, "A", Utc::now()), &replica(), Utc::now());
        let second = Versioned::new(Entry::new(ledger_b, 200, "B", Utc::now()), &replica(), Utc::now());
        store.save_all(&[first.clone(), second.clone()]).await.unwrap();

        let scoped: Vec<Versioned<Entry>> = store.load_all(Some(&ledger_a)).await.unwrap();
        assert_eq!(scoped, vec![first]);

        let all: Vec<Versioned<Entry>> = store.load_all(None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = MemoryStore::new();
        store.set_available(false);
        let error = LocalStore::load_all::<Category>(&store, None).await.unwrap_err();
        assert!(error.is_unavailable());

        store.set_available(true);
        let loaded = RemoteStore::fetch_all::<Category>(&store, None).await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn failing_write_rejects_whole_batch() {
        let store = MemoryStore::new();
        let good = Versioned::new(Category::new("Food"), &replica(), Utc::now());
        let bad = Versioned::new(Category::new("Rent"), &replica(), Utc::now());
        store.fail_writes_for(bad.id);

        assert!(store.save_all(&[good.clone(), bad.clone()]).await.is_err());
        assert_eq!(store.get::<Category>(&good.id).unwrap(), None);

        store.save(&good).await.unwrap();
        assert!(RemoteStore::upsert(&store, &bad).await.is_err());
        assert_eq!(store.get::<Category>(&good.id).unwrap(), Some(good));
    }

    #[tokio::test]
    async fn metadata_roundtrips() {
        let store = MemoryStore::new();
        let metadata = SyncMetadata {
            last_sync_time: Some(Utc::now()),
            pending_conflicts: Vec::new(),
        };
        store.save_metadata(&metadata).await.unwrap();
        assert_eq!(store.load_metadata().await.unwrap(), metadata);
    }
}
