//! Observable sync status

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::error::SyncError;

/// Where the orchestrator is within a pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Pulling,
    Merging,
    ConflictsPending,
    Pushing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub online: bool,
    pub syncing: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub pending_conflicts: usize,
    pub phase: SyncPhase,
    pub last_error: Option<SyncError>,
}

impl SyncStatus {
    pub const fn new(online: bool) -> Self {
        Self {
            online,
            syncing: false,
            last_sync_time: None,
            pending_conflicts: 0,
            phase: SyncPhase::Idle,
            last_error: None,
        }
    }

    pub const fn indicator(&self) -> StatusIndicator {
        if self.syncing {
            StatusIndicator::Syncing
        } else if !self.online {
            StatusIndicator::Offline
        } else if self.last_error.is_some() {
            StatusIndicator::Error
        } else if self.pending_conflicts > 0 {
            StatusIndicator::ConflictsPending
        } else {
            StatusIndicator::UpToDate
        }
    }
}

/// Single badge summarizing the status, in precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusIndicator {
    Syncing,
    Offline,
    Error,
    ConflictsPending,
    UpToDate,
}

impl fmt::Display for StatusIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Syncing => "syncing",
            Self::Offline => "offline",
            Self::Error => "error",
            Self::ConflictsPending => "conflicts pending",
            Self::UpToDate => "up to date",
        })
    }
}

type Callback = Arc<dyn Fn(&SyncStatus) + Send + Sync>;
type Callbacks = Mutex<BTreeMap<u64, Callback>>;

/// Owns the current status and fans changes out to watchers and callbacks.
pub(crate) struct StatusHub {
    sender: watch::Sender<SyncStatus>,
    callbacks: Arc<Callbacks>,
    next_id: AtomicU64,
}

impl StatusHub {
    pub(crate) fn new(initial: SyncStatus) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender,
            callbacks: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn current(&self) -> SyncStatus {
        self.sender.borrow().clone()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<SyncStatus> {
        self.sender.subscribe()
    }

    /// Apply `change`; subscribers hear about it only if something differs.
    pub(crate) fn update(&self, change: impl FnOnce(&mut SyncStatus)) {
        let mut changed = false;
        self.sender.send_if_modified(|status| {
            let before = status.clone();
            change(status);
            changed = *status != before;
            changed
        });
        if changed {
            let snapshot = self.current();
            // Callbacks may subscribe or unsubscribe, so run them unlocked.
            let callbacks: Vec<Callback> = self
                .callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .cloned()
                .collect();
            for callback in callbacks {
                callback(&snapshot);
            }
        }
    }

    pub(crate) fn subscribe(
        &self,
        callback: impl Fn(&SyncStatus) + Send + Sync + 'static,
    ) -> StatusSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(callback));
        StatusSubscription {
            id,
            callbacks: Arc::downgrade(&self.callbacks),
        }
    }
}

/// Handle for a status callback. Dropping it unsubscribes.
pub struct StatusSubscription {
    id: u64,
    callbacks: Weak<Callbacks>,
}

impl StatusSubscription {
    pub fn unsubscribe(self) {}
}

impl fmt::Debug for StatusSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusSubscription").field("id", &self.id).finish()
    }
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        if let Some(callbacks) = self.callbacks.upgrade() {
            callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
        }
    }
}
