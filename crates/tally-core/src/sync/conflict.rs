//! Conflict descriptors produced by the three-way merge

use serde::{Deserialize, Serialize};

use super::record::RecordKind;
use super::value::FieldValue;
use crate::models::RecordId;

/// Field name used for delete-versus-edit conflicts
pub const DELETED_FIELD: &str = "deleted";
/// Sentinel value standing for "the tombstone"
pub const DELETED_SENTINEL: &str = "DELETED";
/// Sentinel value standing for "the edited, live record"
pub const EDITED_SENTINEL: &str = "EDITED";

/// One field on which both replicas diverged since the merge base
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub kind: RecordKind,
    pub id: RecordId,
    pub field: String,
    pub local_value: FieldValue,
    pub remote_value: FieldValue,
    pub local_version: u64,
    pub remote_version: u64,
}

impl SyncConflict {
    /// Key used by resolution maps: `"{id}-{field}"`
    pub fn key(&self) -> String {
        conflict_key(&self.id, &self.field)
    }

    pub fn is_deletion(&self) -> bool {
        self.field == DELETED_FIELD
    }

    /// Delete-versus-edit conflict where `local_deleted` tells which side
    /// holds the tombstone.
    pub(crate) fn deletion(
        kind: RecordKind,
        id: RecordId,
        local_deleted: bool,
        local_version: u64,
        remote_version: u64,
    ) -> Self {
        let (local, remote) = if local_deleted {
            (DELETED_SENTINEL, EDITED_SENTINEL)
        } else {
            (EDITED_SENTINEL, DELETED_SENTINEL)
        };
        Self {
            kind,
            id,
            field: DELETED_FIELD.to_string(),
            local_value: FieldValue::Text(local.to_string()),
            remote_value: FieldValue::Text(remote.to_string()),
            local_version,
            remote_version,
        }
    }
}

pub fn conflict_key(id: &RecordId, field: &str) -> String {
    format!("{id}-{field}")
}

/// Split a resolution key back into record id and field.
///
/// Record ids contain dashes, field names never do, so the split happens at
/// the last dash.
pub fn parse_conflict_key(key: &str) -> Option<(RecordId, String)> {
    let (id, field) = key.trim().rsplit_once('-')?;
    if field.is_empty() {
        return None;
    }
    let id = id.parse().ok()?;
    Some((id, field.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_roundtrips_through_parse() {
        let id = RecordId::new();
        let key = conflict_key(&id, "amount");
        assert_eq!(parse_conflict_key(&key), Some((id, "amount".to_string())));
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        assert_eq!(parse_conflict_key("amount"), None);
        assert_eq!(parse_conflict_key("not-a-uuid-amount"), None);
        let id = RecordId::new();
        assert_eq!(parse_conflict_key(&format!("{id}-")), None);
    }

    #[test]
    fn deletion_conflict_places_sentinels_by_side() {
        let id = RecordId::new();
        let local_deleted = SyncConflict::deletion(RecordKind::Ledger, id, true, 3, 4);
        assert_eq!(local_deleted.local_value, FieldValue::from(DELETED_SENTINEL));
        assert_eq!(local_deleted.remote_value, FieldValue::from(EDITED_SENTINEL));
        assert!(local_deleted.is_deletion());

        let remote_deleted = SyncConflict::deletion(RecordKind::Ledger, id, false, 3, 4);
        assert_eq!(remote_deleted.local_value, FieldValue::from(EDITED_SENTINEL));
        assert_eq!(remote_deleted.remote_value, FieldValue::from(DELETED_SENTINEL));
    }
}
