//! Pairwise three-way merge of one local and one remote copy of a record.
//!
//! The merge base is the larger of the two `last_synced_version` markers. A
//! side "changed" when its version moved past that base. Tombstones are
//! arbitrated first; live records either fast-forward (one side changed) or
//! go through a field-by-field pass over [`Record::FIELDS`] (both changed).
//!
//! In the field pass a differing field is only a conflict when both sides
//! diverged from the base snapshot. Without a snapshot (never synced) every
//! difference counts as a conflict.
//!
//! The merge is pure: no clock, no I/O, no replica identity.

use std::collections::BTreeMap;

use super::conflict::SyncConflict;
use super::record::{Record, Versioned};
use super::value::{deep_equal, FieldValue};

/// What the merge did with the pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    /// Neither side moved past the base
    Unchanged,
    /// Only the local side changed; the remote needs the local state
    FastForwardLocal,
    /// Only the remote side changed; local adopts it
    FastForwardRemote,
    /// Both sides changed; a new merged version was produced
    Committed,
    /// Delete-versus-edit; the local copy is held until a human decides
    DeletionConflict,
}

impl MergeAction {
    /// Whether the merged record carries state the remote does not have yet
    pub const fn needs_push(self) -> bool {
        matches!(self, Self::FastForwardLocal | Self::Committed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome<T> {
    pub record: Versioned<T>,
    pub conflicts: Vec<SyncConflict>,
    pub action: MergeAction,
}

impl<T> MergeOutcome<T> {
    const fn clean(record: Versioned<T>, action: MergeAction) -> Self {
        Self {
            record,
            conflicts: Vec::new(),
            action,
        }
    }
}

/// Merge two copies of the same record.
///
/// # Panics
///
/// Panics when the copies do not share an id. The reconciler only pairs
/// records by id, so this is a programming error.
pub fn merge_records<T: Record>(local: &Versioned<T>, remote: &Versioned<T>) -> MergeOutcome<T> {
    assert_eq!(
        local.id, remote.id,
        "three-way merge requires two copies of the same record"
    );

    let base = local.base_version().max(remote.base_version());
    let local_changed = local.version > base;
    let remote_changed = remote.version > base;

    match (local.deleted, remote.deleted) {
        (true, true) => merge_tombstones(local, remote, local_changed, remote_changed),
        (true, false) | (false, true) => {
            merge_delete_against_edit(local, remote, local_changed, remote_changed)
        }
        (false, false) => merge_live(local, remote, local_changed, remote_changed),
    }
}

fn merge_tombstones<T: Record>(
    local: &Versioned<T>,
    remote: &Versioned<T>,
    local_changed: bool,
    remote_changed: bool,
) -> MergeOutcome<T> {
    match (local_changed, remote_changed) {
        (true, true) => {
            let source = if remote.version > local.version {
                remote
            } else {
                local
            };
            let mut record = source.clone();
            commit(&mut record, local, remote);
            MergeOutcome::clean(record, MergeAction::Committed)
        }
        (true, false) => fast_forward_local(local, remote),
        (false, true) => fast_forward_remote(remote),
        (false, false) => unchanged(local, remote),
    }
}

fn merge_delete_against_edit<T: Record>(
    local: &Versioned<T>,
    remote: &Versioned<T>,
    local_changed: bool,
    remote_changed: bool,
) -> MergeOutcome<T> {
    match (local_changed, remote_changed) {
        (true, true) => {
            let mut record = local.clone();
            record.version = local.version.max(remote.version);
            let conflict = SyncConflict::deletion(
                T::KIND,
                local.id,
                local.deleted,
                local.version,
                remote.version,
            );
            MergeOutcome {
                record,
                conflicts: vec![conflict],
                action: MergeAction::DeletionConflict,
            }
        }
        // Either the new tombstone wins over an untouched record, or the
        // live side restored/edited a deletion it had already observed.
        (true, false) => fast_forward_local(local, remote),
        (false, true) => fast_forward_remote(remote),
        (false, false) => unchanged(local, remote),
    }
}

fn merge_live<T: Record>(
    local: &Versioned<T>,
    remote: &Versioned<T>,
    local_changed: bool,
    remote_changed: bool,
) -> MergeOutcome<T> {
    match (local_changed, remote_changed) {
        (false, false) => unchanged(local, remote),
        (true, false) => fast_forward_local(local, remote),
        (false, true) => fast_forward_remote(remote),
        (true, true) => merge_fields(local, remote),
    }
}

fn merge_fields<T: Record>(local: &Versioned<T>, remote: &Versioned<T>) -> MergeOutcome<T> {
    let remote_wins = remote.version > local.version;
    let base = base_snapshot(local, remote);
    let mut record = local.clone();
    let mut conflicts = Vec::new();

    for field in T::FIELDS {
        let local_value = read_field(&local.data, field);
        let remote_value = read_field(&remote.data, field);
        if deep_equal(&local_value, &remote_value) {
            continue;
        }

        match base.and_then(|fields| fields.get(*field)) {
            Some(base_value) if deep_equal(base_value, &local_value) => {
                write_field(&mut record.data, field, remote_value);
                continue;
            }
            Some(base_value) if deep_equal(base_value, &remote_value) => continue,
            _ => {}
        }

        if remote_wins {
            write_field(&mut record.data, field, remote_value.clone());
        }
        conflicts.push(SyncConflict {
            kind: T::KIND,
            id: local.id,
            field: (*field).to_string(),
            local_value,
            remote_value,
            local_version: local.version,
            remote_version: remote.version,
        });
    }

    commit(&mut record, local, remote);
    MergeOutcome {
        record,
        conflicts,
        action: MergeAction::Committed,
    }
}

/// Snapshot belonging to the larger merge base.
fn base_snapshot<'a, T>(
    local: &'a Versioned<T>,
    remote: &'a Versioned<T>,
) -> Option<&'a BTreeMap<String, FieldValue>> {
    if remote.base_version() > local.base_version() {
        remote.base_fields.as_ref()
    } else {
        local.base_fields.as_ref()
    }
}

fn commit<T: Record>(record: &mut Versioned<T>, local: &Versioned<T>, remote: &Versioned<T>) {
    record.version = local.version.max(remote.version) + 1;
    record.mark_synced_with(remote);
    record.updated_at = local.updated_at.max(remote.updated_at);
}

fn fast_forward_local<T: Record>(local: &Versioned<T>, remote: &Versioned<T>) -> MergeOutcome<T> {
    let mut record = local.clone();
    record.mark_synced_with(remote);
    MergeOutcome::clean(record, MergeAction::FastForwardLocal)
}

fn fast_forward_remote<T: Record>(remote: &Versioned<T>) -> MergeOutcome<T> {
    let mut record = remote.clone();
    record.mark_synced_with(remote);
    MergeOutcome::clean(record, MergeAction::FastForwardRemote)
}

fn unchanged<T: Record>(local: &Versioned<T>, remote: &Versioned<T>) -> MergeOutcome<T> {
    let mut record = local.clone();
    record.version = local.version.max(remote.version);
    if local.last_synced_version != Some(remote.version) || local.base_fields.is_none() {
        record.mark_synced_with(remote);
    }
    MergeOutcome::clean(record, MergeAction::Unchanged)
}

fn read_field<T: Record>(data: &T, field: &str) -> FieldValue {
    data.field(field)
        .unwrap_or_else(|error| panic!("declared field '{field}' of {} is unreadable: {error}", T::KIND))
}

fn write_field<T: Record>(data: &mut T, field: &str, value: FieldValue) {
    if let Err(error) = data.set_field(field, value) {
        panic!("declared field '{field}' of {} is unwritable: {error}", T::KIND);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{Category, Entry, Ledger, RecordId, ReplicaId};
    use crate::sync::conflict::{DELETED_FIELD, DELETED_SENTINEL, EDITED_SENTINEL};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    pub(crate) fn versioned<T>(
        id: RecordId,
        data: T,
        version: u64,
        last_synced_version: Option<u64>,
    ) -> Versioned<T> {
        Versioned {
            id,
            version,
            last_synced_version,
            base_fields: None,
            deleted: false,
            deleted_at: None,
            last_modified_by: Some(ReplicaId::new("test")),
            updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            data,
        }
    }

    pub(crate) fn with_base<T: Record>(mut record: Versioned<T>, base: &T) -> Versioned<T> {
        let mut snapshot_source = record.clone();
        snapshot_source.data = base.clone();
        record.base_fields = Some(snapshot_source.field_snapshot());
        record
    }

    pub(crate) fn tombstoned<T>(mut record: Versioned<T>) -> Versioned<T> {
        record.deleted = true;
        record.deleted_at = Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        record
    }

    fn entry(ledger: RecordId, amount: i64) -> Entry {
        Entry::new(
            ledger,
            amount,
            "Grocer",
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
        )
    }

    #[test]
    fn concurrent_amount_edit_is_won_by_higher_version() {
        let id = RecordId::new();
        let ledger = RecordId::new();
        let base = entry(ledger, 50);
        let local = with_base(versioned(id, entry(ledger, 100), 3, Some(1)), &base);
        let remote = with_base(versioned(id, entry(ledger, 75), 2, Some(1)), &base);

        let outcome = merge_records(&local, &remote);

        assert_eq!(outcome.action, MergeAction::Committed);
        assert_eq!(
            outcome.conflicts,
            vec![SyncConflict {
                kind: crate::sync::RecordKind::Transaction,
                id,
                field: "amount".to_string(),
                local_value: FieldValue::Integer(100),
                remote_value: FieldValue::Integer(75),
                local_version: 3,
                remote_version: 2,
            }]
        );
        assert_eq!(outcome.record.data.amount, 100);
        assert_eq!(outcome.record.version, 4);
        assert_eq!(outcome.record.last_synced_version, Some(2));
    }

    #[test]
    fn remote_wins_field_when_its_version_is_higher() {
        let id = RecordId::new();
        let ledger = RecordId::new();
        let local = versioned(id, entry(ledger, 100), 2, Some(1));
        let remote = versioned(id, entry(ledger, 75), 5, Some(1));

        let outcome = merge_records(&local, &remote);
        assert_eq!(outcome.record.data.amount, 75);
        assert_eq!(outcome.record.version, 6);
        assert_eq!(outcome.conflicts.len(), 1);
    }

    #[test]
    fn field_changed_on_one_side_only_is_not_a_conflict() {
        let id = RecordId::new();
        let ledger = RecordId::new();
        let base = entry(ledger, 50);
        let mut recategorised = base.clone();
        recategorised.remarks = Some("weekly shop".to_string());
        let local = with_base(versioned(id, recategorised, 2, Some(1)), &base);
        let remote = with_base(versioned(id, entry(ledger, 65), 4, Some(1)), &base);

        let outcome = merge_records(&local, &remote);
        assert!(outcome.conflicts.is_empty());
        assert_eq!(outcome.record.data.amount, 65);
        assert_eq!(outcome.record.data.remarks.as_deref(), Some("weekly shop"));
        assert_eq!(outcome.record.version, 5);
    }

    #[test]
    fn snapshot_of_larger_base_is_used() {
        let id = RecordId::new();
        let old = Category::new("Old");
        let newer = Category::new("Newer");
        let mut local_data = newer.clone();
        local_data.icon = Some("tag".to_string());
        let mut remote_data = newer.clone();
        remote_data.color = Some("#123456".to_string());

        let local = with_base(versioned(id, local_data, 6, Some(2)), &old);
        let remote = with_base(versioned(id, remote_data, 5, Some(4)), &newer);

        let outcome = merge_records(&local, &remote);
        assert!(outcome.conflicts.is_empty());
        assert_eq!(outcome.record.data.name, "Newer");
        assert_eq!(outcome.record.data.icon.as_deref(), Some("tag"));
        assert_eq!(outcome.record.data.color.as_deref(), Some("#123456"));
    }

    #[test]
    fn equal_versions_default_to_local_value() {
        let id = RecordId::new();
        let ledger = RecordId::new();
        let local = versioned(id, entry(ledger, 100), 2, Some(1));
        let remote = versioned(id, entry(ledger, 75), 2, Some(1));

        let outcome = merge_records(&local, &remote);
        assert_eq!(outcome.record.data.amount, 100);
        assert_eq!(outcome.record.version, 3);
    }

    #[test]
    fn disjoint_ledger_edits_merge_without_conflict() {
        let id = RecordId::new();
        let mut renamed = Ledger::new("Household", "EUR");
        renamed.name = "Home".to_string();
        let mut described = Ledger::new("Household", "EUR");
        described.description = Some("shared costs".to_string());

        let base = Ledger::new("Household", "EUR");
        let local = with_base(versioned(id, renamed, 3, Some(1)), &base);
        let remote = with_base(versioned(id, described, 2, Some(1)), &base);

        let outcome = merge_records(&local, &remote);
        assert!(outcome.conflicts.is_empty());
        assert_eq!(outcome.action, MergeAction::Committed);
        assert_eq!(outcome.record.data.name, "Home");
        assert_eq!(outcome.record.data.description.as_deref(), Some("shared costs"));
        assert_eq!(outcome.record.version, 4);
        assert_eq!(outcome.record.last_synced_version, Some(2));
    }

    #[test]
    fn merge_commit_happens_even_without_differing_fields() {
        let id = RecordId::new();
        let local = versioned(id, Category::new("Food"), 2, Some(1));
        let remote = versioned(id, Category::new("Food"), 4, Some(1));

        let outcome = merge_records(&local, &remote);
        assert!(outcome.conflicts.is_empty());
        assert_eq!(outcome.record.version, 5);
        assert!(outcome.action.needs_push());
    }

    #[test]
    fn one_sided_change_fast_forwards_verbatim() {
        let id = RecordId::new();
        let mut edited = Category::new("Food");
        edited.color = Some("#00ff00".to_string());
        let local = versioned(id, Category::new("Food"), 3, Some(3));
        let remote = versioned(id, edited.clone(), 5, Some(3));

        let outcome = merge_records(&local, &remote);
        assert_eq!(outcome.action, MergeAction::FastForwardRemote);
        assert!(outcome.conflicts.is_empty());
        assert_eq!(outcome.record.data, edited);
        assert_eq!(outcome.record.version, 5);
        assert_eq!(outcome.record.last_synced_version, Some(5));

        let local_edit = versioned(id, edited.clone(), 4, Some(3));
        let remote_stale = versioned(id, Category::new("Food"), 3, Some(3));
        let outcome = merge_records(&local_edit, &remote_stale);
        assert_eq!(outcome.action, MergeAction::FastForwardLocal);
        assert_eq!(outcome.record.data, edited);
        assert_eq!(outcome.record.version, 4);
        assert_eq!(outcome.record.last_synced_version, Some(3));
    }

    #[test]
    fn synced_identical_copies_are_left_alone() {
        let id = RecordId::new();
        let food = Category::new("Food");
        let local = with_base(versioned(id, food.clone(), 4, Some(4)), &food);
        let remote = versioned(id, food, 4, Some(3));

        let outcome = merge_records(&local, &remote);
        assert_eq!(outcome.action, MergeAction::Unchanged);
        assert_eq!(outcome.record, local);
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn merge_is_idempotent_for_fixed_inputs() {
        let id = RecordId::new();
        let ledger = RecordId::new();
        let local = versioned(id, entry(ledger, 100), 3, Some(1));
        let remote = versioned(id, entry(ledger, 75), 2, Some(1));

        assert_eq!(merge_records(&local, &remote), merge_records(&local, &remote));
    }

    #[test]
    fn swapping_sides_yields_same_conflict_fields_and_clean_values() {
        let id = RecordId::new();
        let mut left = Ledger::new("Household", "EUR");
        left.name = "Home".to_string();
        left.archived = true;
        let mut right = Ledger::new("Household", "EUR");
        right.name = "Flat".to_string();
        right.description = Some("rent and bills".to_string());

        let a = versioned(id, left, 3, Some(1));
        let b = versioned(id, right, 3, Some(1));

        let ab = merge_records(&a, &b);
        let ba = merge_records(&b, &a);

        let fields = |outcome: &MergeOutcome<Ledger>| {
            outcome
                .conflicts
                .iter()
                .map(|conflict| conflict.field.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(fields(&ab), fields(&ba));
        assert_eq!(fields(&ab), vec!["name", "description", "archived"]);
        assert_eq!(ab.conflicts[0].local_value, ba.conflicts[0].remote_value);
        assert_eq!(ab.record.data.currency, ba.record.data.currency);
        assert_eq!(ab.record.version, ba.record.version);
    }

    #[test]
    fn delete_without_concurrent_edit_fast_forwards_tombstone() {
        let id = RecordId::new();
        let local = tombstoned(versioned(id, Category::new("Food"), 3, Some(2)));
        let remote = versioned(id, Category::new("Food"), 2, Some(1));

        let outcome = merge_records(&local, &remote);
        assert!(outcome.conflicts.is_empty());
        assert_eq!(outcome.action, MergeAction::FastForwardLocal);
        assert!(outcome.record.deleted);

        let outcome = merge_records(&remote_as_local(&remote, 2), &local);
        assert!(outcome.conflicts.is_empty());
        assert_eq!(outcome.action, MergeAction::FastForwardRemote);
        assert!(outcome.record.deleted);
    }

    fn remote_as_local(record: &Versioned<Category>, last_synced: u64) -> Versioned<Category> {
        let mut copy = record.clone();
        copy.last_synced_version = Some(last_synced);
        copy
    }

    #[test]
    fn delete_concurrent_with_edit_raises_exactly_one_conflict() {
        let id = RecordId::new();
        let local = tombstoned(versioned(id, Category::new("Food"), 3, Some(2)));
        let mut edited = Category::new("Food");
        edited.icon = Some("cart".to_string());
        let remote = versioned(id, edited, 4, Some(2));

        let outcome = merge_records(&local, &remote);
        assert_eq!(outcome.action, MergeAction::DeletionConflict);
        assert_eq!(outcome.conflicts.len(), 1);
        let conflict = &outcome.conflicts[0];
        assert_eq!(conflict.field, DELETED_FIELD);
        assert_eq!(conflict.local_value, FieldValue::from(DELETED_SENTINEL));
        assert_eq!(conflict.remote_value, FieldValue::from(EDITED_SENTINEL));
        assert!(outcome.record.deleted, "tombstone is kept pending resolution");
        assert_eq!(outcome.record.version, 4);
        assert_eq!(outcome.record.last_synced_version, Some(2));
        assert!(!outcome.action.needs_push());

        let mirrored = merge_records(&remote, &local);
        assert_eq!(mirrored.conflicts.len(), 1);
        assert_eq!(mirrored.conflicts[0].local_value, FieldValue::from(EDITED_SENTINEL));
        assert_eq!(mirrored.conflicts[0].remote_value, FieldValue::from(DELETED_SENTINEL));
    }

    #[test]
    fn restore_after_observed_delete_fast_forwards_live_side() {
        let id = RecordId::new();
        let local = tombstoned(versioned(id, Category::new("Food"), 3, Some(3)));
        let remote = versioned(id, Category::new("Food"), 5, Some(3));

        let outcome = merge_records(&local, &remote);
        assert!(outcome.conflicts.is_empty());
        assert_eq!(outcome.action, MergeAction::FastForwardRemote);
        assert!(!outcome.record.deleted);
    }

    #[test]
    fn concurrent_tombstones_commit_without_conflict() {
        let id = RecordId::new();
        let local = tombstoned(versioned(id, Category::new("Food"), 3, Some(1)));
        let remote = tombstoned(versioned(id, Category::new("Food"), 2, Some(1)));

        let outcome = merge_records(&local, &remote);
        assert!(outcome.conflicts.is_empty());
        assert!(outcome.record.deleted);
        assert_eq!(outcome.record.version, 4);
        assert_eq!(outcome.record.last_synced_version, Some(2));

        let settled = versioned(id, Category::new("Food"), 4, Some(4));
        let settled = tombstoned(settled);
        let outcome = merge_records(&settled, &tombstoned(versioned(id, Category::new("Food"), 4, Some(2))));
        assert_eq!(outcome.action, MergeAction::Unchanged);
        assert_eq!(outcome.record.version, 4);
    }

    #[test]
    fn merged_version_never_drops_below_inputs() {
        let id = RecordId::new();
        let cases = [
            (1, None, 1, None),
            (4, Some(4), 9, Some(2)),
            (7, Some(3), 2, Some(2)),
            (2, Some(1), 2, Some(1)),
            (5, Some(5), 5, Some(5)),
        ];
        for (lv, ls, rv, rs) in cases {
            let local = versioned(id, Category::new("A"), lv, ls);
            let remote = versioned(id, Category::new("B"), rv, rs);
            let outcome = merge_records(&local, &remote);
            assert!(outcome.record.version >= lv.max(rv));
            if outcome.action == MergeAction::Committed {
                assert!(outcome.record.version > lv.max(rv));
            }
            let lsv = outcome.record.last_synced_version.unwrap_or(0);
            assert!(lsv <= outcome.record.version);
        }
    }

    #[test]
    #[should_panic(expected = "same record")]
    fn merging_different_ids_is_a_programming_error() {
        let local = versioned(RecordId::new(), Category::new("A"), 1, None);
        let remote = versioned(RecordId::new(), Category::new("A"), 1, None);
        let _ = merge_records(&local, &remote);
    }
}
