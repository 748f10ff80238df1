//! Per-pass error taxonomy

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::record::RecordKind;
use crate::models::RecordId;

/// Something that went wrong during a pass.
///
/// Only `NetworkUnavailable` aborts a pass. The others are collected per item
/// and the pass carries on. Conflicts are never errors.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncError {
    #[error("network unavailable: {message}")]
    NetworkUnavailable { message: String },

    #[error("failed to read {kind} from remote: {message}")]
    RemoteReadFailure { kind: RecordKind, message: String },

    #[error("failed to push {kind} {id}: {message}")]
    RemoteWriteFailure {
        kind: RecordKind,
        id: RecordId,
        message: String,
    },

    #[error("failed to read local {kind}: {message}")]
    LocalReadFailure { kind: RecordKind, message: String },

    #[error("failed to persist {kind} {id} locally: {message}")]
    LocalPersistFailure {
        kind: RecordKind,
        id: RecordId,
        message: String,
    },

    #[error("failed to persist sync metadata: {message}")]
    MetadataFailure { message: String },
}

impl SyncError {
    pub const fn aborts_pass(&self) -> bool {
        matches!(self, Self::NetworkUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let error = SyncError::RemoteReadFailure {
            kind: RecordKind::Category,
            message: "boom".to_string(),
        };
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["type"], "remote_read_failure");
        assert_eq!(json["kind"], "categories");
        assert!(!error.aborts_pass());
        assert!(SyncError::NetworkUnavailable {
            message: String::new()
        }
        .aborts_pass());
    }
}
