//! Versioned record envelope shared by every synchronized entity.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::value::{FieldError, FieldValue};
use crate::models::{RecordId, ReplicaId};

/// The kinds of records that take part in sync.
///
/// The declaration order is also the pull order: transactions reference
/// ledgers and categories, so ledgers are reconciled first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    #[serde(rename = "ledgers")]
    Ledger,
    #[serde(rename = "transactions")]
    Transaction,
    #[serde(rename = "categories")]
    Category,
}

impl RecordKind {
    pub const ALL: [Self; 3] = [Self::Ledger, Self::Transaction, Self::Category];

    /// Wire and storage name of the kind
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ledger => "ledgers",
            Self::Transaction => "transactions",
            Self::Category => "categories",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ledgers" | "ledger" | "books" | "book" => Ok(Self::Ledger),
            "transactions" | "transaction" | "entries" | "entry" => Ok(Self::Transaction),
            "categories" | "category" => Ok(Self::Category),
            other => Err(format!("unknown record kind '{other}'")),
        }
    }
}

/// Domain payload of a synchronized record.
///
/// `FIELDS` is the fixed, ordered list of mergeable fields. It is the only
/// state the three-way merge may compare or copy; identity, versions and
/// timestamps are owned by the [`Versioned`] envelope.
pub trait Record:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: RecordKind;
    const FIELDS: &'static [&'static str];

    /// Read a mergeable field.
    fn field(&self, name: &str) -> Result<FieldValue, FieldError>;

    /// Overwrite a mergeable field.
    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), FieldError>;

    /// Owning record for scoped collections (transactions live under a ledger).
    fn parent_id(&self) -> Option<RecordId> {
        None
    }

    /// Reject payloads a user edit must never produce.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// A record plus the bookkeeping needed to merge it across replicas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Versioned<T> {
    /// Stable identity, never reused
    pub id: RecordId,
    /// Incremented by exactly one on every local mutation
    pub version: u64,
    /// Counterpart version seen at the last successful merge (merge base)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_version: Option<u64>,
    /// Mergeable field values of the counterpart at `last_synced_version`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_fields: Option<BTreeMap<String, FieldValue>>,
    /// Tombstone flag
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Replica that produced this version (audit only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by: Option<ReplicaId>,
    pub updated_at: DateTime<Utc>,
    pub data: T,
}

impl<T> Versioned<T> {
    /// Wrap a freshly created record at version 1.
    pub fn new(data: T, replica: &ReplicaId, now: DateTime<Utc>) -> Self {
        Self {
            id: RecordId::new(),
            version: 1,
            last_synced_version: None,
            base_fields: None,
            deleted: false,
            deleted_at: None,
            last_modified_by: Some(replica.clone()),
            updated_at: now,
            data,
        }
    }

    /// Merge base contributed by this copy (0 when never synced).
    pub fn base_version(&self) -> u64 {
        self.last_synced_version.unwrap_or(0)
    }

    /// Apply a local edit to the payload.
    pub fn update(&mut self, replica: &ReplicaId, now: DateTime<Utc>, edit: impl FnOnce(&mut T)) {
        edit(&mut self.data);
        self.touch(Some(replica), now);
    }

    /// Flag the record as deleted. Returns `false` if it already was.
    pub fn tombstone(&mut self, replica: &ReplicaId, now: DateTime<Utc>) -> bool {
        if self.deleted {
            return false;
        }
        self.deleted = true;
        self.deleted_at = Some(now);
        self.touch(Some(replica), now);
        true
    }

    /// Clear the tombstone. Returns `false` if the record was live.
    pub fn restore(&mut self, replica: &ReplicaId, now: DateTime<Utc>) -> bool {
        if !self.deleted {
            return false;
        }
        self.deleted = false;
        self.deleted_at = None;
        self.touch(Some(replica), now);
        true
    }

    /// Record a new local mutation.
    pub(crate) fn touch(&mut self, replica: Option<&ReplicaId>, now: DateTime<Utc>) {
        self.version += 1;
        if let Some(replica) = replica {
            self.last_modified_by = Some(replica.clone());
        }
        self.updated_at = now;
    }

    /// Convert the payload, keeping the envelope.
    pub fn try_map_data<U, E>(self, convert: impl FnOnce(T) -> Result<U, E>) -> Result<Versioned<U>, E> {
        Ok(Versioned {
            id: self.id,
            version: self.version,
            last_synced_version: self.last_synced_version,
            base_fields: self.base_fields,
            deleted: self.deleted,
            deleted_at: self.deleted_at,
            last_modified_by: self.last_modified_by,
            updated_at: self.updated_at,
            data: convert(self.data)?,
        })
    }
}

impl<T: Record> Versioned<T> {
    pub fn parent_id(&self) -> Option<RecordId> {
        self.data.parent_id()
    }

    /// Current values of every mergeable field.
    pub fn field_snapshot(&self) -> BTreeMap<String, FieldValue> {
        T::FIELDS
            .iter()
            .filter_map(|field| {
                self.data
                    .field(field)
                    .ok()
                    .map(|value| ((*field).to_string(), value))
            })
            .collect()
    }

    /// Record `counterpart` as the new merge base.
    pub fn mark_synced_with(&mut self, counterpart: &Self) {
        self.last_synced_version = Some(counterpart.version);
        self.base_fields = Some(counterpart.field_snapshot());
    }

    /// The counterpart now holds exactly this version.
    pub fn mark_pushed(&mut self) {
        self.last_synced_version = Some(self.version);
        self.base_fields = Some(self.field_snapshot());
    }

    /// Serialize the payload to JSON for schemaless stores.
    pub fn to_raw(&self) -> serde_json::Result<Versioned<serde_json::Value>> {
        let data = serde_json::to_value(&self.data)?;
        Ok(Versioned {
            id: self.id,
            version: self.version,
            last_synced_version: self.last_synced_version,
            base_fields: self.base_fields.clone(),
            deleted: self.deleted,
            deleted_at: self.deleted_at,
            last_modified_by: self.last_modified_by.clone(),
            updated_at: self.updated_at,
            data,
        })
    }

    pub fn from_raw(raw: Versioned<serde_json::Value>) -> serde_json::Result<Self> {
        raw.try_map_data(serde_json::from_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;

    fn replica() -> ReplicaId {
        ReplicaId::new("device-a")
    }

    #[test]
    fn new_records_start_at_version_one_unsynced() {
        let record = Versioned::new(Category::new("Food"), &replica(), Utc::now());
        assert_eq!(record.version, 1);
        assert_eq!(record.last_synced_version, None);
        assert_eq!(record.base_version(), 0);
        assert!(!record.deleted);
        assert_eq!(record.last_modified_by, Some(replica()));
    }

    #[test]
    fn every_local_mutation_bumps_version_by_one() {
        let now = Utc::now();
        let mut record = Versioned::new(Category::new("Food"), &replica(), now);
        record.update(&replica(), now, |category| category.name = "Groceries".to_string());
        assert_eq!(record.version, 2);

        assert!(record.tombstone(&replica(), now));
        assert_eq!(record.version, 3);
        assert!(record.deleted);
        assert_eq!(record.deleted_at, Some(now));

        assert!(!record.tombstone(&replica(), now));
        assert_eq!(record.version, 3);

        assert!(record.restore(&replica(), now));
        assert_eq!(record.version, 4);
        assert!(!record.deleted);
        assert_eq!(record.deleted_at, None);
    }

    #[test]
    fn raw_roundtrip_preserves_envelope() {
        let mut record = Versioned::new(Category::new("Rent"), &replica(), Utc::now());
        record.last_synced_version = Some(7);
        let raw = record.to_raw().unwrap();
        assert_eq!(raw.data["name"], "Rent");
        let back = Versioned::<Category>::from_raw(raw).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn mark_pushed_makes_self_the_merge_base() {
        let mut record = Versioned::new(Category::new("Rent"), &replica(), Utc::now());
        record.update(&replica(), Utc::now(), |category| category.icon = Some("house".into()));
        record.mark_pushed();
        assert_eq!(record.last_synced_version, Some(2));
        let base = record.base_fields.as_ref().unwrap();
        assert_eq!(base["name"], FieldValue::from("Rent"));
        assert_eq!(base["icon"], FieldValue::from("house"));
        assert_eq!(base.len(), Category::FIELDS.len());
    }

    #[test]
    fn kind_parses_aliases() {
        assert_eq!("books".parse::<RecordKind>().unwrap(), RecordKind::Ledger);
        assert_eq!("Entries".parse::<RecordKind>().unwrap(), RecordKind::Transaction);
        assert_eq!("categories".parse::<RecordKind>().unwrap(), RecordKind::Category);
        assert!("budgets".parse::<RecordKind>().is_err());
    }
}
