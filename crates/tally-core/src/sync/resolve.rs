//! Applying human decisions to recorded conflicts.
//!
//! Planning (which decision applies to which pending conflict) is separated
//! from application (mutating one record) so both stay pure. The engine
//! loads records, applies the plan and persists the result.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::conflict::{SyncConflict, DELETED_SENTINEL, EDITED_SENTINEL};
use super::record::{Record, RecordKind, Versioned};
use super::value::{FieldError, FieldValue};
use crate::models::{RecordId, ReplicaId};

/// A decision for one conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    UseLocal,
    UseRemote,
    /// Explicit value, parsed against the shape of the field
    Value(String),
}

impl FromStr for Resolution {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "use-local" => Self::UseLocal,
            "use-remote" => Self::UseRemote,
            other => Self::Value(other.to_string()),
        })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UseLocal => f.write_str("use-local"),
            Self::UseRemote => f.write_str("use-remote"),
            Self::Value(value) => f.write_str(value),
        }
    }
}

/// Who made a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    UserChoice,
    /// Filled in by "resolve all" for conflicts the user did not decide
    Defaulted,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("'{value}' is not a valid choice for deletion conflict {key} (use DELETED or EDITED)")]
    InvalidDeletionChoice { key: String, value: String },

    #[error("record for conflict {key} no longer exists locally")]
    MissingRecord { key: String },

    #[error(transparent)]
    Field(#[from] FieldError),
}

/// Pending conflicts matched against a resolution map
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionPlan {
    pub decisions: Vec<(SyncConflict, Resolution, ResolutionSource)>,
    /// Pending conflicts left undecided
    pub remaining: Vec<SyncConflict>,
    /// Resolution keys with no pending conflict
    pub unmatched: Vec<String>,
}

/// One applied decision
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedResolution {
    pub key: String,
    pub kind: RecordKind,
    pub id: RecordId,
    pub field: String,
    pub value: FieldValue,
    pub source: ResolutionSource,
    pub version: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionReport {
    pub applied: Vec<AppliedResolution>,
    pub unmatched: Vec<String>,
    /// Key and reason for decisions that could not be applied
    pub failed: Vec<(String, String)>,
    /// Conflicts still pending afterwards
    pub remaining: Vec<SyncConflict>,
}

/// Match `choices` against `pending`.
///
/// With `default_remaining`, every undecided conflict is resolved in favour
/// of the remote and marked [`ResolutionSource::Defaulted`].
pub fn plan_resolutions(
    pending: &[SyncConflict],
    choices: &BTreeMap<String, Resolution>,
    default_remaining: bool,
) -> ResolutionPlan {
    let mut decisions = Vec::new();
    let mut remaining = Vec::new();

    for conflict in pending {
        match choices.get(&conflict.key()) {
            Some(choice) => {
                decisions.push((conflict.clone(), choice.clone(), ResolutionSource::UserChoice));
            }
            None if default_remaining => decisions.push((
                conflict.clone(),
                Resolution::UseRemote,
                ResolutionSource::Defaulted,
            )),
            None => remaining.push(conflict.clone()),
        }
    }

    let unmatched = choices
        .keys()
        .filter(|key| !pending.iter().any(|conflict| &conflict.key() == *key))
        .cloned()
        .collect();

    ResolutionPlan {
        decisions,
        remaining,
        unmatched,
    }
}

/// Apply one decision to the local copy of the conflicted record.
///
/// Every applied decision is a local mutation and bumps the version by one.
/// Returns the value that was chosen.
pub fn apply_resolution<T: Record>(
    record: &mut Versioned<T>,
    conflict: &SyncConflict,
    resolution: &Resolution,
    replica: &ReplicaId,
    now: DateTime<Utc>,
) -> Result<FieldValue, ResolveError> {
    let chosen = match resolution {
        Resolution::UseLocal => conflict.local_value.clone(),
        Resolution::UseRemote => conflict.remote_value.clone(),
        Resolution::Value(raw) if conflict.is_deletion() => {
            FieldValue::Text(raw.trim().to_ascii_uppercase())
        }
        Resolution::Value(raw) => {
            let template = if conflict.local_value.is_null() {
                &conflict.remote_value
            } else {
                &conflict.local_value
            };
            FieldValue::parse_like(template, &conflict.field, raw)?
        }
    };

    if conflict.is_deletion() {
        apply_deletion_choice(record, conflict, &chosen, now)?;
    } else {
        record.data.set_field(&conflict.field, chosen.clone())?;
    }
    record.touch(Some(replica), now);
    Ok(chosen)
}

fn apply_deletion_choice<T>(
    record: &mut Versioned<T>,
    conflict: &SyncConflict,
    chosen: &FieldValue,
    now: DateTime<Utc>,
) -> Result<(), ResolveError> {
    let choice = match chosen {
        FieldValue::Text(text) => text.as_str(),
        _ => "",
    };
    match choice {
        DELETED_SENTINEL => {
            record.deleted = true;
            record.deleted_at = Some(now);
            acknowledge_remote(record, conflict);
        }
        EDITED_SENTINEL if record.deleted => {
            // The remote edit has not been merged in yet: keep the merge
            // base so the next pass does a field merge with it.
            record.deleted = false;
            record.deleted_at = None;
        }
        EDITED_SENTINEL => acknowledge_remote(record, conflict),
        other => {
            return Err(ResolveError::InvalidDeletionChoice {
                key: conflict.key(),
                value: other.to_string(),
            })
        }
    }
    Ok(())
}

/// The decision supersedes the remote copy seen when the conflict arose.
fn acknowledge_remote<T>(record: &mut Versioned<T>, conflict: &SyncConflict) {
    record.last_synced_version = Some(conflict.remote_version);
    record.base_fields = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Entry};
    use crate::sync::merge::tests::{tombstoned, versioned};
    use crate::sync::merge::{merge_records, MergeAction};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 8, 0, 0).unwrap()
    }

    fn replica() -> ReplicaId {
        ReplicaId::new("resolver")
    }

    fn amount_conflict(id: RecordId) -> SyncConflict {
        SyncConflict {
            kind: RecordKind::Transaction,
            id,
            field: "amount".to_string(),
            local_value: FieldValue::Integer(100),
            remote_value: FieldValue::Integer(75),
            local_version: 3,
            remote_version: 2,
        }
    }

    fn sample_entry(amount: i64) -> Entry {
        Entry::new(
            RecordId::new(),
            amount,
            "Grocer",
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn resolution_parses_keywords_and_values() {
        assert_eq!("use-local".parse::<Resolution>().unwrap(), Resolution::UseLocal);
        assert_eq!("use-remote".parse::<Resolution>().unwrap(), Resolution::UseRemote);
        assert_eq!(
            " 42 ".parse::<Resolution>().unwrap(),
            Resolution::Value("42".to_string())
        );
    }

    #[test]
    fn use_remote_sets_recorded_remote_value_and_bumps_version() {
        let id = RecordId::new();
        let mut record = versioned(id, sample_entry(100), 4, Some(2));

        let chosen =
            apply_resolution(&mut record, &amount_conflict(id), &Resolution::UseRemote, &replica(), now())
                .unwrap();

        assert_eq!(chosen, FieldValue::Integer(75));
        assert_eq!(record.data.amount, 75);
        assert_eq!(record.version, 5);
        assert_eq!(record.last_modified_by, Some(replica()));
    }

    #[test]
    fn explicit_value_is_parsed_like_the_field() {
        let id = RecordId::new();
        let mut record = versioned(id, sample_entry(100), 4, Some(2));

        apply_resolution(
            &mut record,
            &amount_conflict(id),
            &Resolution::Value("90".to_string()),
            &replica(),
            now(),
        )
        .unwrap();
        assert_eq!(record.data.amount, 90);

        let error = apply_resolution(
            &mut record,
            &amount_conflict(id),
            &Resolution::Value("ninety".to_string()),
            &replica(),
            now(),
        )
        .unwrap_err();
        assert!(matches!(error, ResolveError::Field(FieldError::Invalid { .. })));
        assert_eq!(record.version, 5, "failed resolution must not bump");
    }

    #[test]
    fn choosing_deleted_tombstones_and_acknowledges_remote() {
        let id = RecordId::new();
        let mut record = versioned(id, Category::new("Food"), 4, Some(2));
        let conflict = SyncConflict::deletion(RecordKind::Category, id, false, 3, 4);

        apply_resolution(&mut record, &conflict, &Resolution::UseRemote, &replica(), now()).unwrap();

        assert!(record.deleted);
        assert_eq!(record.deleted_at, Some(now()));
        assert_eq!(record.version, 5);
        assert_eq!(record.last_synced_version, Some(4));

        let remote = tombstoned(versioned(id, Category::new("Food"), 4, Some(2)));
        let next = merge_records(&record, &remote);
        assert_eq!(next.action, MergeAction::FastForwardLocal);
        assert!(next.conflicts.is_empty());
    }

    #[test]
    fn choosing_edited_over_remote_tombstone_keeps_record_live() {
        let id = RecordId::new();
        let mut record = versioned(id, Category::new("Food"), 4, Some(2));
        let conflict = SyncConflict::deletion(RecordKind::Category, id, false, 3, 4);

        apply_resolution(
            &mut record,
            &conflict,
            &Resolution::Value("edited".to_string()),
            &replica(),
            now(),
        )
        .unwrap();
        assert!(!record.deleted);
        assert_eq!(record.version, 5);

        let remote = tombstoned(versioned(id, Category::new("Food"), 4, Some(2)));
        let next = merge_records(&record, &remote);
        assert_eq!(next.action, MergeAction::FastForwardLocal);
        assert!(!next.record.deleted);
    }

    #[test]
    fn restoring_local_tombstone_leads_to_field_merge() {
        let id = RecordId::new();
        let mut record = tombstoned(versioned(id, Category::new("Food"), 4, Some(2)));
        let conflict = SyncConflict::deletion(RecordKind::Category, id, true, 3, 4);

        apply_resolution(&mut record, &conflict, &Resolution::UseRemote, &replica(), now()).unwrap();
        assert!(!record.deleted);
        assert_eq!(record.deleted_at, None);
        assert_eq!(record.last_synced_version, Some(2));

        let mut edited = Category::new("Food");
        edited.icon = Some("cart".to_string());
        let remote = versioned(id, edited, 4, Some(2));
        let next = merge_records(&record, &remote);
        assert_eq!(next.action, MergeAction::Committed);
        assert!(!next.record.deleted);
    }

    #[test]
    fn deletion_conflict_rejects_other_values() {
        let id = RecordId::new();
        let mut record = versioned(id, Category::new("Food"), 4, Some(2));
        let conflict = SyncConflict::deletion(RecordKind::Category, id, false, 3, 4);
        let error = apply_resolution(
            &mut record,
            &conflict,
            &Resolution::Value("maybe".to_string()),
            &replica(),
            now(),
        )
        .unwrap_err();
        assert!(matches!(error, ResolveError::InvalidDeletionChoice { .. }));
    }

    #[test]
    fn plan_reports_unmatched_and_remaining() {
        let first = amount_conflict(RecordId::new());
        let second = amount_conflict(RecordId::new());
        let mut choices = BTreeMap::new();
        choices.insert(first.key(), Resolution::UseLocal);
        choices.insert("nope-amount".to_string(), Resolution::UseRemote);

        let plan = plan_resolutions(&[first.clone(), second.clone()], &choices, false);
        assert_eq!(
            plan.decisions,
            vec![(first.clone(), Resolution::UseLocal, ResolutionSource::UserChoice)]
        );
        assert_eq!(plan.remaining, vec![second.clone()]);
        assert_eq!(plan.unmatched, vec!["nope-amount".to_string()]);

        let plan = plan_resolutions(&[first.clone(), second.clone()], &choices, true);
        assert_eq!(plan.decisions.len(), 2);
        assert_eq!(
            plan.decisions[1],
            (second, Resolution::UseRemote, ResolutionSource::Defaulted)
        );
        assert!(plan.remaining.is_empty());
    }
}
