//! Local record editing on top of a [`LocalStore`]

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::{RecordId, ReplicaId};
use crate::store::LocalStore;
use crate::sync::{Clock, Record, Versioned};

/// Creates, edits and deletes records on this device.
///
/// Every mutation bumps the record version by exactly one and stamps this
/// replica as the author. Deletions leave tombstones so they reach other
/// replicas.
pub struct Repository<L> {
    store: L,
    replica: ReplicaId,
    clock: Arc<dyn Clock>,
}

impl<L: LocalStore> Repository<L> {
    pub fn new(store: L, replica: ReplicaId, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            replica,
            clock,
        }
    }

    pub const fn store(&self) -> &L {
        &self.store
    }

    /// Create a new record at version 1
    pub async fn create<T: Record>(&self, data: T) -> Result<Versioned<T>> {
        data.validate().map_err(Error::InvalidInput)?;
        let record = Versioned::new(data, &self.replica, self.clock.now());
        self.store.save(&record).await?;
        tracing::debug!(kind = %T::KIND, id = %record.id, "Created record");
        Ok(record)
    }

    /// Get a live record by ID
    pub async fn get<T: Record>(&self, id: &RecordId) -> Result<Option<Versioned<T>>> {
        Ok(self.find(id).await?.filter(|record| !record.deleted))
    }

    /// List records, most recently updated first
    pub async fn list<T: Record>(
        &self,
        parent: Option<&RecordId>,
        include_deleted: bool,
    ) -> Result<Vec<Versioned<T>>> {
        let mut records: Vec<Versioned<T>> = self
            .store
            .load_all(parent)
            .await?
            .into_iter()
            .filter(|record| include_deleted || !record.deleted)
            .collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    /// Resolve a full ID or a unique prefix of one
    pub async fn resolve_id<T: Record>(&self, id_or_prefix: &str) -> Result<RecordId> {
        let needle = id_or_prefix.trim().to_ascii_lowercase();
        if needle.is_empty() {
            return Err(Error::InvalidInput("ID cannot be empty".to_string()));
        }
        if let Ok(id) = needle.parse::<RecordId>() {
            return Ok(id);
        }

        let records: Vec<Versioned<T>> = self.store.load_all(None).await?;
        let mut matches = records
            .iter()
            .map(|record| record.id)
            .filter(|id| id.as_str().starts_with(&needle));
        match (matches.next(), matches.next()) {
            (Some(id), None) => Ok(id),
            (None, _) => Err(Error::NotFound(format!("{} {id_or_prefix}", T::KIND))),
            (Some(_), Some(_)) => Err(Error::InvalidInput(format!(
                "ID prefix '{id_or_prefix}' matches more than one of {}",
                T::KIND
            ))),
        }
    }

    /// Apply `edit` to a live record. An edit that changes nothing leaves
    /// the version untouched.
    pub async fn update<T: Record>(
        &self,
        id: &RecordId,
        edit: impl FnOnce(&mut T) + Send,
    ) -> Result<Versioned<T>> {
        let mut record = self.require_live::<T>(id).await?;
        let mut data = record.data.clone();
        edit(&mut data);
        data.validate().map_err(Error::InvalidInput)?;
        if data == record.data {
            return Ok(record);
        }

        record.update(&self.replica, self.clock.now(), |current| *current = data);
        self.store.save(&record).await?;
        tracing::debug!(kind = %T::KIND, id = %record.id, version = record.version, "Updated record");
        Ok(record)
    }

    /// Soft delete a record, leaving a tombstone
    pub async fn delete<T: Record>(&self, id: &RecordId) -> Result<Versioned<T>> {
        let mut record = self.require_live::<T>(id).await?;
        record.tombstone(&self.replica, self.clock.now());
        self.store.save(&record).await?;
        tracing::debug!(kind = %T::KIND, id = %record.id, "Deleted record");
        Ok(record)
    }

    /// Bring a tombstoned record back
    pub async fn restore<T: Record>(&self, id: &RecordId) -> Result<Versioned<T>> {
        let mut record = self
            .find::<T>(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{} {id}", T::KIND)))?;
        if record.restore(&self.replica, self.clock.now()) {
            self.store.save(&record).await?;
        }
        Ok(record)
    }

    async fn find<T: Record>(&self, id: &RecordId) -> Result<Option<Versioned<T>>> {
        let records: Vec<Versioned<T>> = self.store.load_all(None).await?;
        Ok(records.into_iter().find(|record| record.id == *id))
    }

    async fn require_live<T: Record>(&self, id: &RecordId) -> Result<Versioned<T>> {
        self.get::<T>(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{} {id}", T::KIND)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::models::{Category, Entry, Ledger};
    use crate::sync::FixedClock;
    use chrono::{Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn setup() -> (Repository<SqliteStore>, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        ));
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = Repository::new(store, ReplicaId::new("laptop"), clock.clone());
        (repo, clock)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (repo, _) = setup();
        let ledger = repo.create(Ledger::new("Household", "usd")).await.unwrap();

        let loaded = repo.get::<Ledger>(&ledger.id).await.unwrap().unwrap();
        assert_eq!(loaded, ledger);
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.data.currency, "USD");
        assert_eq!(loaded.last_modified_by, Some(ReplicaId::new("laptop")));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_payload() {
        let (repo, _) = setup();
        let result = repo.create(Ledger::new("  ", "USD")).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));

        let result = repo.create(Ledger::new("Trip", "euro")).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_update_bumps_version_once() {
        let (repo, clock) = setup();
        let category = repo.create(Category::new("Food")).await.unwrap();

        clock.advance(Duration::minutes(5));
        let updated = repo
            .update::<Category>(&category.id, |data| {
                data.name = "Groceries".to_string();
                data.color = Some("#00aa00".to_string());
            })
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.updated_at, clock.now());

        let unchanged = repo
            .update::<Category>(&category.id, |data| data.name = "Groceries".to_string())
            .await
            .unwrap();
        assert_eq!(unchanged.version, 2);
    }

    #[tokio::test]
    async fn test_delete_leaves_tombstone() {
        let (repo, _) = setup();
        let category = repo.create(Category::new("Old")).await.unwrap();

        let deleted = repo.delete::<Category>(&category.id).await.unwrap();
        assert!(deleted.deleted);
        assert_eq!(deleted.version, 2);

        assert!(repo.get::<Category>(&category.id).await.unwrap().is_none());
        assert!(repo.list::<Category>(None, false).await.unwrap().is_empty());
        assert_eq!(repo.list::<Category>(None, true).await.unwrap().len(), 1);

        let result = repo.delete::<Category>(&category.id).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_restore() {
        let (repo, _) = setup();
        let category = repo.create(Category::new("Travel")).await.unwrap();
        repo.delete::<Category>(&category.id).await.unwrap();

        let restored = repo.restore::<Category>(&category.id).await.unwrap();
        assert!(!restored.deleted);
        assert_eq!(restored.version, 3);
        assert!(repo.get::<Category>(&category.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_newest_first_and_scoped() {
        let (repo, clock) = setup();
        let home = repo.create(Ledger::new("Home", "USD")).await.unwrap();
        let trip = repo.create(Ledger::new("Trip", "EUR")).await.unwrap();
        let date = clock.now();

        let first = repo
            .create(Entry::new(home.id, -1500, "Bakery", date))
            .await
            .unwrap();
        clock.advance(Duration::minutes(1));
        let second = repo
            .create(Entry::new(home.id, -900, "Cafe", date))
            .await
            .unwrap();
        repo.create(Entry::new(trip.id, -20000, "Hotel", date))
            .await
            .unwrap();

        let entries = repo.list::<Entry>(Some(&home.id), false).await.unwrap();
        let ids: Vec<RecordId> = entries.iter().map(|record| record.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_resolve_id_by_prefix() {
        let (repo, _) = setup();
        let category = repo.create(Category::new("Fuel")).await.unwrap();
        let full = category.id.as_str();

        assert_eq!(repo.resolve_id::<Category>(&full).await.unwrap(), category.id);
        assert_eq!(
            repo.resolve_id::<Category>(&full[..full.len() - 4]).await.unwrap(),
            category.id
        );
        assert!(matches!(
            repo.resolve_id::<Category>("ffffffff-dead").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            repo.resolve_id::<Category>(" ").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_id_rejects_ambiguous_prefix() {
        let (repo, _) = setup();
        let first = repo.create(Category::new("A")).await.unwrap();
        let second = repo.create(Category::new("B")).await.unwrap();

        let first_id = first.id.as_str();
        let second_id = second.id.as_str();
        let shared = first_id
            .chars()
            .zip(second_id.chars())
            .take_while(|(a, b)| a == b)
            .count();
        assert!(shared > 0, "v7 ids share a timestamp prefix");

        let result = repo.resolve_id::<Category>(&first_id[..shared]).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
