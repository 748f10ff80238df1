//! Store contracts consumed by the sync engine, plus the in-memory and HTTP
//! implementations. The `SQLite` implementation lives in [`crate::db`].

mod configured;
mod http;
mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::RecordId;
use crate::sync::{Record, SyncConflict, Versioned};

pub use configured::ConfiguredRemote;
pub use http::HttpRemoteStore;
pub use memory::{MemoryStore, RecordingInvalidator};

/// Failures reported by a store implementation
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot be reached at all (network loss, relay down)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Backend(error.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Bookkeeping the engine keeps next to the local records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    #[serde(default)]
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Conflicts waiting for a human decision, in key order
    #[serde(default)]
    pub pending_conflicts: Vec<SyncConflict>,
}

/// The device's own copy of the records.
///
/// `parent` scopes child kinds (transactions of one ledger). `None` loads
/// every record of the kind. Tombstones are always returned.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn load_all<T: Record>(&self, parent: Option<&RecordId>) -> StoreResult<Vec<Versioned<T>>>;

    /// Persist a batch. Implementations may fail the whole batch.
    async fn save_all<T: Record>(&self, records: &[Versioned<T>]) -> StoreResult<()>;

    async fn save<T: Record>(&self, record: &Versioned<T>) -> StoreResult<()>;

    async fn load_metadata(&self) -> StoreResult<SyncMetadata>;

    async fn save_metadata(&self, metadata: &SyncMetadata) -> StoreResult<()>;
}

/// The shared copy every replica reconciles against.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch_all<T: Record>(&self, parent: Option<&RecordId>) -> StoreResult<Vec<Versioned<T>>>;

    /// Unconditional last-writer-wins write of one record.
    async fn upsert<T: Record>(&self, record: &Versioned<T>) -> StoreResult<()>;
}

/// Sink told which cached views are stale after a pass.
///
/// Patterns are either a kind (`"ledgers"`) or a kind and id
/// (`"ledgers:0190..."`).
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, pattern: &str);
}

/// Invalidator for clients without a cache
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    fn invalidate(&self, _pattern: &str) {}
}
