//! Sync orchestrator.
//!
//! A pass walks `Idle -> Pulling -> Merging -> (ConflictsPending | Pushing)
//! -> Idle`. Only one pass runs at a time; a trigger that arrives while a
//! pass is in flight sets a follow-up flag and the running caller (or the
//! conflict resolution holding the lock) performs exactly one more pass
//! afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};

use super::clock::Clock;
use super::conflict::SyncConflict;
use super::error::SyncError;
use super::merge::MergeAction;
use super::reconcile::{reconcile, ReconcileAction, ReconcileOutcome};
use super::record::{Record, RecordKind, Versioned};
use super::resolve::{
    apply_resolution, plan_resolutions, AppliedResolution, Resolution, ResolutionReport,
    ResolutionSource, ResolveError,
};
use super::status::{StatusHub, StatusSubscription, SyncPhase, SyncStatus};
use crate::config::SyncSettings;
use crate::models::{Category, Entry, Ledger, RecordId, ReplicaId};
use crate::store::{
    CacheInvalidator, LocalStore, NoopInvalidator, RemoteStore, StoreError, StoreResult,
    SyncMetadata,
};

/// How a call to [`SyncEngine::sync_all`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOutcome {
    /// Every kind was visited; per-item errors may still be present
    Completed,
    /// The network signal was down, nothing was touched
    Offline,
    /// The remote became unreachable mid-pass
    Aborted,
    /// Another pass was running; a follow-up was requested instead
    Coalesced,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Completed with no errors
    pub success: bool,
    pub outcome: PassOutcome,
    /// Records downloaded, merged or pushed
    pub items_synced: usize,
    /// Conflicts raised by this pass
    pub conflicts: Vec<SyncConflict>,
    pub errors: Vec<SyncError>,
    /// Passes run by this call, follow-ups included
    pub passes: u32,
}

impl SyncReport {
    const fn coalesced() -> Self {
        Self {
            success: false,
            outcome: PassOutcome::Coalesced,
            items_synced: 0,
            conflicts: Vec::new(),
            errors: Vec::new(),
            passes: 0,
        }
    }

    /// Fold a follow-up pass into this report; the follow-up describes the
    /// final state.
    fn followed_by(self, next: Self) -> Self {
        Self {
            items_synced: self.items_synced + next.items_synced,
            passes: self.passes + next.passes,
            ..next
        }
    }
}

/// Pass aborted because the remote is unreachable
struct Abort(SyncError);

/// Reconciled state of one kind in one scope, waiting to be pushed
struct Batch<T> {
    records: BTreeMap<RecordId, Versioned<T>>,
    outbound: Vec<RecordId>,
}

#[derive(Default)]
struct PassState {
    items: BTreeSet<(RecordKind, RecordId)>,
    conflicts: Vec<SyncConflict>,
    errors: Vec<SyncError>,
    /// Records whose pending conflicts this pass re-evaluated
    reevaluated: BTreeSet<(RecordKind, RecordId)>,
    ledgers: Vec<Batch<Ledger>>,
    transactions: Vec<Batch<Entry>>,
    categories: Vec<Batch<Category>>,
}

pub struct SyncEngine<L, R> {
    local: L,
    remote: R,
    clock: Arc<dyn Clock>,
    network: watch::Receiver<bool>,
    settings: SyncSettings,
    replica: ReplicaId,
    invalidator: Arc<dyn CacheInvalidator>,
    pass_lock: Mutex<()>,
    follow_up: AtomicBool,
    status: StatusHub,
}

impl<L: LocalStore, R: RemoteStore> SyncEngine<L, R> {
    pub fn new(
        local: L,
        remote: R,
        clock: Arc<dyn Clock>,
        network: watch::Receiver<bool>,
        settings: SyncSettings,
        replica: ReplicaId,
    ) -> Self {
        let online = *network.borrow();
        Self {
            local,
            remote,
            clock,
            network,
            settings,
            replica,
            invalidator: Arc::new(NoopInvalidator),
            pass_lock: Mutex::new(()),
            follow_up: AtomicBool::new(false),
            status: StatusHub::new(SyncStatus::new(online)),
        }
    }

    #[must_use]
    pub fn with_invalidator(mut self, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        self.invalidator = invalidator;
        self
    }

    pub const fn local(&self) -> &L {
        &self.local
    }

    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub const fn replica(&self) -> &ReplicaId {
        &self.replica
    }

    pub(crate) fn network(&self) -> watch::Receiver<bool> {
        self.network.clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.current()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.watch()
    }

    /// Register a callback fired on every status change.
    pub fn on_status_changed(
        &self,
        callback: impl Fn(&SyncStatus) + Send + Sync + 'static,
    ) -> StatusSubscription {
        self.status.subscribe(callback)
    }

    /// Reload persisted bookkeeping (last sync time, pending conflicts).
    pub async fn refresh_status(&self) -> StoreResult<SyncStatus> {
        let metadata = self.local.load_metadata().await?;
        let online = *self.network.borrow();
        self.status.update(|status| {
            status.online = online;
            status.last_sync_time = metadata.last_sync_time;
            status.pending_conflicts = metadata.pending_conflicts.len();
        });
        Ok(self.status())
    }

    pub async fn pending_conflicts(&self) -> StoreResult<Vec<SyncConflict>> {
        Ok(self.local.load_metadata().await?.pending_conflicts)
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.status.update(|status| status.online = online);
    }

    /// Run a pass now, or coalesce into the one in flight.
    pub async fn sync_all(&self) -> SyncReport {
        let Ok(guard) = self.pass_lock.try_lock() else {
            self.follow_up.store(true, Ordering::SeqCst);
            tracing::debug!("sync pass already running; follow-up requested");
            return SyncReport::coalesced();
        };
        self.follow_up.store(false, Ordering::SeqCst);
        let mut report = self.run_pass().await;
        drop(guard);

        while report.outcome == PassOutcome::Completed && self.follow_up.load(Ordering::SeqCst) {
            let guard = self.pass_lock.lock().await;
            // Someone else may have drained the request while we waited.
            if !self.follow_up.swap(false, Ordering::SeqCst) {
                break;
            }
            tracing::debug!("running coalesced follow-up sync pass");
            report = report.followed_by(self.run_pass().await);
            drop(guard);
        }
        report
    }

    async fn run_pass(&self) -> SyncReport {
        if !*self.network.borrow() {
            let error = SyncError::NetworkUnavailable {
                message: "network signal reports offline".to_string(),
            };
            tracing::info!("Sync skipped: offline");
            self.status.update(|status| {
                status.online = false;
                status.syncing = false;
                status.phase = SyncPhase::Idle;
            });
            return SyncReport {
                success: false,
                outcome: PassOutcome::Offline,
                items_synced: 0,
                conflicts: Vec::new(),
                errors: vec![error],
                passes: 1,
            };
        }

        self.status.update(|status| {
            status.online = true;
            status.syncing = true;
            status.phase = SyncPhase::Pulling;
            status.last_error = None;
        });

        let mut pass = PassState::default();
        let result = match self.pull_and_merge(&mut pass).await {
            Ok(()) => self.push_all(&mut pass).await,
            Err(abort) => Err(abort),
        };

        let outcome = match result {
            Ok(()) => PassOutcome::Completed,
            Err(Abort(error)) => {
                tracing::warn!(%error, "Sync pass aborted");
                pass.errors.push(error);
                PassOutcome::Aborted
            }
        };

        let pending = self.finish_metadata(&mut pass, outcome).await;
        self.invalidate(&pass);

        let last_error = pass.errors.last().cloned();
        let now = self.clock.now();
        self.status.update(|status| {
            status.syncing = false;
            status.phase = SyncPhase::Idle;
            status.online = outcome != PassOutcome::Aborted;
            if outcome == PassOutcome::Completed {
                status.last_sync_time = Some(now);
            }
            if let Some(pending) = pending {
                status.pending_conflicts = pending;
            }
            status.last_error = last_error;
        });

        tracing::info!(
            items = pass.items.len(),
            conflicts = pass.conflicts.len(),
            errors = pass.errors.len(),
            ?outcome,
            "Sync pass finished"
        );

        SyncReport {
            success: outcome == PassOutcome::Completed && pass.errors.is_empty(),
            outcome,
            items_synced: pass.items.len(),
            conflicts: pass.conflicts,
            errors: pass.errors,
            passes: 1,
        }
    }

    async fn pull_and_merge(&self, pass: &mut PassState) -> Result<(), Abort> {
        let ledger_ids = match self.sync_kind::<Ledger>(None, pass).await? {
            Some(batch) => {
                let ids = batch.records.keys().copied().collect::<Vec<_>>();
                pass.ledgers.push(batch);
                Some(ids)
            }
            None => self.local_ids::<Ledger>(pass).await,
        };

        for ledger_id in ledger_ids.unwrap_or_default() {
            if let Some(batch) = self.sync_kind::<Entry>(Some(&ledger_id), pass).await? {
                pass.transactions.push(batch);
            }
        }

        if let Some(batch) = self.sync_kind::<Category>(None, pass).await? {
            pass.categories.push(batch);
        }

        let phase = if pass.conflicts.is_empty() {
            SyncPhase::Pushing
        } else {
            SyncPhase::ConflictsPending
        };
        self.status.update(|status| status.phase = phase);
        Ok(())
    }

    /// Ledger ids known locally, used when the remote ledger read failed.
    async fn local_ids<T: Record>(&self, pass: &mut PassState) -> Option<Vec<RecordId>> {
        match self.local.load_all::<T>(None).await {
            Ok(records) => Some(records.into_iter().map(|record| record.id).collect()),
            Err(error) => {
                pass.errors.push(SyncError::LocalReadFailure {
                    kind: T::KIND,
                    message: error.to_string(),
                });
                None
            }
        }
    }

    /// Pull, reconcile and persist one kind in one scope.
    ///
    /// `Ok(None)` means the scope was skipped after a per-kind failure.
    async fn sync_kind<T: Record>(
        &self,
        parent: Option<&RecordId>,
        pass: &mut PassState,
    ) -> Result<Option<Batch<T>>, Abort> {
        self.ensure_online()?;
        self.status.update(|status| status.phase = SyncPhase::Pulling);

        let remote = match self.remote_call(self.remote.fetch_all::<T>(parent)).await {
            Ok(records) => records,
            Err(error) if error.is_unavailable() => return Err(abort_for(&error)),
            Err(error) => {
                tracing::warn!(kind = %T::KIND, %error, "Remote read failed; skipping kind");
                pass.errors.push(SyncError::RemoteReadFailure {
                    kind: T::KIND,
                    message: error.to_string(),
                });
                return Ok(None);
            }
        };

        let local = match self.local.load_all::<T>(parent).await {
            Ok(records) => records,
            Err(error) => {
                tracing::warn!(kind = %T::KIND, %error, "Local read failed; skipping kind");
                pass.errors.push(SyncError::LocalReadFailure {
                    kind: T::KIND,
                    message: error.to_string(),
                });
                return Ok(None);
            }
        };

        self.status.update(|status| status.phase = SyncPhase::Merging);
        let mut outcome = reconcile(local, remote);
        tracing::debug!(
            kind = %T::KIND,
            parent = ?parent,
            counts = ?outcome.counts,
            conflicts = outcome.conflicts.len(),
            "Reconciled"
        );

        self.stamp_commits(&mut outcome);
        let failed = self.persist(&outcome).await;
        for (id, message) in &failed {
            pass.errors.push(SyncError::LocalPersistFailure {
                kind: T::KIND,
                id: *id,
                message: message.clone(),
            });
        }

        for (id, action) in &outcome.actions {
            if failed.iter().any(|(failed_id, _)| failed_id == id) {
                continue;
            }
            match action {
                ReconcileAction::Merged(
                    MergeAction::Committed | MergeAction::DeletionConflict | MergeAction::FastForwardRemote,
                ) => {
                    pass.reevaluated.insert((T::KIND, *id));
                }
                ReconcileAction::Merged(_) | ReconcileAction::Downloaded | ReconcileAction::LocalOnly => {}
            }
        }
        for id in &outcome.changed {
            if !failed.iter().any(|(failed_id, _)| failed_id == id) {
                pass.items.insert((T::KIND, *id));
            }
        }
        pass.conflicts.extend(outcome.conflicts.iter().cloned());

        let outbound = outcome
            .outbound
            .iter()
            .copied()
            .filter(|id| !failed.iter().any(|(failed_id, _)| failed_id == id))
            .collect();
        let records = outcome
            .records
            .into_iter()
            .map(|record| (record.id, record))
            .collect();
        Ok(Some(Batch { records, outbound }))
    }

    /// A merge commit is a mutation made by this replica.
    fn stamp_commits<T: Record>(&self, outcome: &mut ReconcileOutcome<T>) {
        for record in &mut outcome.records {
            if outcome.actions.get(&record.id)
                == Some(&ReconcileAction::Merged(MergeAction::Committed))
            {
                record.last_modified_by = Some(self.replica.clone());
            }
        }
    }

    /// Save changed records; returns the ids that could not be saved.
    async fn persist<T: Record>(&self, outcome: &ReconcileOutcome<T>) -> Vec<(RecordId, String)> {
        let changed: Vec<Versioned<T>> = outcome
            .changed
            .iter()
            .filter_map(|id| outcome.get(id).cloned())
            .collect();
        if changed.is_empty() {
            return Vec::new();
        }

        match self.local.save_all(&changed).await {
            Ok(()) => Vec::new(),
            Err(error) => {
                tracing::warn!(kind = %T::KIND, %error, "Batch save failed; saving records one by one");
                let mut failed = Vec::new();
                for record in &changed {
                    if let Err(error) = self.local.save(record).await {
                        failed.push((record.id, error.to_string()));
                    }
                }
                failed
            }
        }
    }

    async fn push_all(&self, pass: &mut PassState) -> Result<(), Abort> {
        let mut ledgers = std::mem::take(&mut pass.ledgers);
        for batch in &mut ledgers {
            self.push_batch(batch, pass).await?;
        }
        let mut transactions = std::mem::take(&mut pass.transactions);
        for batch in &mut transactions {
            self.push_batch(batch, pass).await?;
        }
        let mut categories = std::mem::take(&mut pass.categories);
        for batch in &mut categories {
            self.push_batch(batch, pass).await?;
        }
        Ok(())
    }

    async fn push_batch<T: Record>(&self, batch: &mut Batch<T>, pass: &mut PassState) -> Result<(), Abort> {
        for id in std::mem::take(&mut batch.outbound) {
            let Some(record) = batch.records.get_mut(&id) else {
                continue;
            };
            self.ensure_online()?;
            self.status.update(|status| {
                if status.phase != SyncPhase::ConflictsPending {
                    status.phase = SyncPhase::Pushing;
                }
            });

            match self.remote_call(self.remote.upsert(&*record)).await {
                Ok(()) => {}
                Err(error) if error.is_unavailable() => return Err(abort_for(&error)),
                Err(error) => {
                    tracing::warn!(kind = %T::KIND, %id, %error, "Push failed");
                    pass.errors.push(SyncError::RemoteWriteFailure {
                        kind: T::KIND,
                        id,
                        message: error.to_string(),
                    });
                    continue;
                }
            }

            record.mark_pushed();
            pass.items.insert((T::KIND, id));
            if let Err(error) = self.local.save(record).await {
                tracing::warn!(kind = %T::KIND, %id, %error, "Could not record push locally");
                pass.errors.push(SyncError::LocalPersistFailure {
                    kind: T::KIND,
                    id,
                    message: error.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Replace pending conflicts for re-evaluated records and stamp the
    /// sync time. Returns the new pending count when metadata was written.
    async fn finish_metadata(&self, pass: &mut PassState, outcome: PassOutcome) -> Option<usize> {
        let mut metadata = match self.local.load_metadata().await {
            Ok(metadata) => metadata,
            Err(error) => {
                pass.errors.push(SyncError::MetadataFailure {
                    message: error.to_string(),
                });
                return None;
            }
        };

        metadata
            .pending_conflicts
            .retain(|conflict| !pass.reevaluated.contains(&(conflict.kind, conflict.id)));
        merge_pending(&mut metadata, pass.conflicts.iter().cloned());
        if outcome == PassOutcome::Completed {
            metadata.last_sync_time = Some(self.clock.now());
        }

        match self.local.save_metadata(&metadata).await {
            Ok(()) => Some(metadata.pending_conflicts.len()),
            Err(error) => {
                pass.errors.push(SyncError::MetadataFailure {
                    message: error.to_string(),
                });
                None
            }
        }
    }

    fn invalidate(&self, pass: &PassState) {
        let kinds: BTreeSet<RecordKind> = pass.items.iter().map(|(kind, _)| *kind).collect();
        for kind in kinds {
            self.invalidator.invalidate(kind.as_str());
        }
        for (kind, id) in &pass.items {
            self.invalidator.invalidate(&format!("{kind}:{id}"));
        }
    }

    fn ensure_online(&self) -> Result<(), Abort> {
        if *self.network.borrow() {
            Ok(())
        } else {
            Err(Abort(SyncError::NetworkUnavailable {
                message: "network lost during sync".to_string(),
            }))
        }
    }

    async fn remote_call<T>(&self, call: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        let timeout = self.settings.remote_timeout();
        tokio::time::timeout(timeout, call)
            .await
            .unwrap_or(Err(StoreError::Timeout(timeout)))
    }

    /// Apply decisions for pending conflicts.
    pub async fn resolve_conflicts(
        &self,
        choices: &BTreeMap<String, Resolution>,
    ) -> crate::Result<ResolutionReport> {
        self.resolve(choices, false).await
    }

    /// Like [`Self::resolve_conflicts`], defaulting every undecided conflict
    /// to the remote value.
    pub async fn resolve_all_conflicts(
        &self,
        choices: &BTreeMap<String, Resolution>,
    ) -> crate::Result<ResolutionReport> {
        self.resolve(choices, true).await
    }

    async fn resolve(
        &self,
        choices: &BTreeMap<String, Resolution>,
        default_remaining: bool,
    ) -> crate::Result<ResolutionReport> {
        let report = {
            let _guard = self.pass_lock.lock().await;
            self.apply_decisions(choices, default_remaining).await
        };
        // Triggers coalesced while resolution held the lock have no running
        // pass to pick them up.
        if self.follow_up.load(Ordering::SeqCst) {
            tracing::debug!("running sync pass requested during conflict resolution");
            let pass = self.sync_all().await;
            tracing::debug!(outcome = ?pass.outcome, "Follow-up sync pass finished");
        }
        report
    }

    async fn apply_decisions(
        &self,
        choices: &BTreeMap<String, Resolution>,
        default_remaining: bool,
    ) -> crate::Result<ResolutionReport> {
        let mut metadata = self.local.load_metadata().await?;
        let plan = plan_resolutions(&metadata.pending_conflicts, choices, default_remaining);

        let mut report = ResolutionReport {
            unmatched: plan.unmatched,
            remaining: plan.remaining,
            ..ResolutionReport::default()
        };
        let now = self.clock.now();

        let mut by_kind: BTreeMap<RecordKind, Vec<Decision>> = BTreeMap::new();
        for (conflict, resolution, source) in plan.decisions {
            by_kind
                .entry(conflict.kind)
                .or_default()
                .push((conflict, resolution, source));
        }
        for (kind, decisions) in by_kind {
            match kind {
                RecordKind::Ledger => self.apply_kind::<Ledger>(decisions, now, &mut report).await?,
                RecordKind::Transaction => {
                    self.apply_kind::<Entry>(decisions, now, &mut report).await?;
                }
                RecordKind::Category => {
                    self.apply_kind::<Category>(decisions, now, &mut report).await?;
                }
            }
        }

        let applied: BTreeSet<&str> = report.applied.iter().map(|item| item.key.as_str()).collect();
        metadata
            .pending_conflicts
            .retain(|conflict| !applied.contains(conflict.key().as_str()));
        self.local.save_metadata(&metadata).await?;
        self.status
            .update(|status| status.pending_conflicts = metadata.pending_conflicts.len());

        for item in &report.applied {
            self.invalidator.invalidate(&format!("{}:{}", item.kind, item.id));
        }
        tracing::info!(
            applied = report.applied.len(),
            failed = report.failed.len(),
            unmatched = report.unmatched.len(),
            "Applied conflict resolutions"
        );
        Ok(report)
    }

    async fn apply_kind<T: Record>(
        &self,
        decisions: Vec<Decision>,
        now: DateTime<Utc>,
        report: &mut ResolutionReport,
    ) -> crate::Result<()> {
        let mut records: BTreeMap<RecordId, Versioned<T>> = self
            .local
            .load_all::<T>(None)
            .await?
            .into_iter()
            .map(|record| (record.id, record))
            .collect();
        let mut touched = BTreeSet::new();

        for (conflict, resolution, source) in decisions {
            let key = conflict.key();
            let Some(record) = records.get_mut(&conflict.id) else {
                report.failed.push((key.clone(), ResolveError::MissingRecord { key }.to_string()));
                continue;
            };
            match apply_resolution(record, &conflict, &resolution, &self.replica, now) {
                Ok(value) => {
                    touched.insert(conflict.id);
                    report.applied.push(AppliedResolution {
                        key,
                        kind: T::KIND,
                        id: conflict.id,
                        field: conflict.field.clone(),
                        value,
                        source,
                        version: record.version,
                    });
                }
                Err(error) => report.failed.push((key, error.to_string())),
            }
        }

        for id in touched {
            if let Some(record) = records.get(&id) {
                self.local.save(record).await?;
            }
        }
        Ok(())
    }
}

type Decision = (SyncConflict, Resolution, ResolutionSource);

fn abort_for(error: &StoreError) -> Abort {
    Abort(SyncError::NetworkUnavailable {
        message: error.to_string(),
    })
}

/// Insert `conflicts` keyed by conflict key, newest winning, kept in key order.
fn merge_pending(metadata: &mut SyncMetadata, conflicts: impl IntoIterator<Item = SyncConflict>) {
    let mut by_key: BTreeMap<String, SyncConflict> = metadata
        .pending_conflicts
        .drain(..)
        .map(|conflict| (conflict.key(), conflict))
        .collect();
    for conflict in conflicts {
        by_key.insert(conflict.key(), conflict);
    }
    metadata.pending_conflicts = by_key.into_values().collect();
}
