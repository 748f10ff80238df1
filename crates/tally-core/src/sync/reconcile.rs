//! Collection reconciler: pairs local and remote copies by id and merges them.

use std::collections::BTreeMap;

use super::conflict::SyncConflict;
use super::merge::{merge_records, MergeAction};
use super::record::{Record, Versioned};
use crate::models::RecordId;

/// What happened to one record during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Remote-only record adopted locally
    Downloaded,
    /// Local-only record, to be uploaded
    LocalOnly,
    /// Present on both sides and merged
    Merged(MergeAction),
}

impl ReconcileAction {
    pub const fn needs_push(self) -> bool {
        match self {
            Self::Downloaded => false,
            Self::LocalOnly => true,
            Self::Merged(action) => action.needs_push(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileCounts {
    pub downloaded: usize,
    pub local_only: usize,
    pub unchanged: usize,
    pub fast_forward_local: usize,
    pub fast_forward_remote: usize,
    pub committed: usize,
    pub deletion_conflicts: usize,
}

impl ReconcileCounts {
    fn record(&mut self, action: ReconcileAction) {
        let slot = match action {
            ReconcileAction::Downloaded => &mut self.downloaded,
            ReconcileAction::LocalOnly => &mut self.local_only,
            ReconcileAction::Merged(MergeAction::Unchanged) => &mut self.unchanged,
            ReconcileAction::Merged(MergeAction::FastForwardLocal) => &mut self.fast_forward_local,
            ReconcileAction::Merged(MergeAction::FastForwardRemote) => {
                &mut self.fast_forward_remote
            }
            ReconcileAction::Merged(MergeAction::Committed) => &mut self.committed,
            ReconcileAction::Merged(MergeAction::DeletionConflict) => &mut self.deletion_conflicts,
        };
        *slot += 1;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome<T> {
    /// Reconciled set, sorted by id, tombstones included
    pub records: Vec<Versioned<T>>,
    pub conflicts: Vec<SyncConflict>,
    pub actions: BTreeMap<RecordId, ReconcileAction>,
    /// Records the remote must receive, in id order
    pub outbound: Vec<RecordId>,
    /// Records whose reconciled copy differs from the local input
    pub changed: Vec<RecordId>,
    pub counts: ReconcileCounts,
}

impl<T> ReconcileOutcome<T> {
    pub fn get(&self, id: &RecordId) -> Option<&Versioned<T>> {
        self.records
            .binary_search_by(|record| record.id.cmp(id))
            .ok()
            .map(|index| &self.records[index])
    }
}

/// Reconcile the local and remote sets of one kind (and scope).
///
/// Pure: nothing is persisted or pushed here.
pub fn reconcile<T: Record>(
    local: Vec<Versioned<T>>,
    remote: Vec<Versioned<T>>,
) -> ReconcileOutcome<T> {
    let mut local: BTreeMap<RecordId, Versioned<T>> =
        local.into_iter().map(|record| (record.id, record)).collect();
    let remote: BTreeMap<RecordId, Versioned<T>> =
        remote.into_iter().map(|record| (record.id, record)).collect();

    let mut merged: BTreeMap<RecordId, (Versioned<T>, ReconcileAction)> = BTreeMap::new();
    let mut conflicts = Vec::new();
    let mut changed = Vec::new();

    for (id, remote_copy) in &remote {
        match local.remove(id) {
            None => {
                let mut downloaded = remote_copy.clone();
                downloaded.mark_synced_with(remote_copy);
                changed.push(*id);
                merged.insert(*id, (downloaded, ReconcileAction::Downloaded));
            }
            Some(local_copy) => {
                let outcome = merge_records(&local_copy, remote_copy);
                conflicts.extend(outcome.conflicts);
                if outcome.record != local_copy {
                    changed.push(*id);
                }
                merged.insert(*id, (outcome.record, ReconcileAction::Merged(outcome.action)));
            }
        }
    }

    for (id, local_copy) in local {
        merged.insert(id, (local_copy, ReconcileAction::LocalOnly));
    }

    let mut counts = ReconcileCounts::default();
    let mut actions = BTreeMap::new();
    let mut outbound = Vec::new();
    let mut records = Vec::with_capacity(merged.len());
    for (id, (record, action)) in merged {
        counts.record(action);
        if action.needs_push() {
            outbound.push(id);
        }
        actions.insert(id, action);
        records.push(record);
    }

    ReconcileOutcome {
        records,
        conflicts,
        actions,
        outbound,
        changed,
        counts,
    }
}
