//! Remote store chosen at runtime from a [`RemoteConfig`]

use std::time::Duration;

use async_trait::async_trait;

use super::{HttpRemoteStore, RemoteStore, StoreResult};
use crate::config::RemoteConfig;
use crate::db::SqliteStore;
use crate::models::RecordId;
use crate::sync::{Record, Versioned};

/// Either kind of remote a profile can point at
#[derive(Debug, Clone)]
pub enum ConfiguredRemote {
    Http(HttpRemoteStore),
    Sqlite(SqliteStore),
}

impl ConfiguredRemote {
    /// Connect to the configured remote. `timeout` bounds each HTTP request.
    pub fn open(config: &RemoteConfig, timeout: Duration) -> crate::Result<Self> {
        match config {
            RemoteConfig::Http { url, token } => Ok(Self::Http(HttpRemoteStore::new(
                url.clone(),
                token.clone(),
                timeout,
            )?)),
            RemoteConfig::Sqlite { path } => Ok(Self::Sqlite(SqliteStore::open(path)?)),
        }
    }
}

#[async_trait]
impl RemoteStore for ConfiguredRemote {
    async fn fetch_all<T: Record>(&self, parent: Option<&RecordId>) -> StoreResult<Vec<Versioned<T>>> {
        match self {
            Self::Http(store) => store.fetch_all(parent).await,
            Self::Sqlite(store) => RemoteStore::fetch_all(store, parent).await,
        }
    }

    async fn upsert<T: Record>(&self, record: &Versioned<T>) -> StoreResult<()> {
        match self {
            Self::Http(store) => store.upsert(record).await,
            Self::Sqlite(store) => RemoteStore::upsert(store, record).await,
        }
    }
}
