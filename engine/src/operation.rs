//! Operation log data model.
//!
//! Every successful local mutation appends one [`OperationLogEntry`] to the
//! outbox. Entries are an append-only history per key until reconciliation
//! drains them; the newest entry for a key decides whether the key is live
//! or tombstoned.

use crate::{error::Result, RecordKey, Timestamp};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Kind of a logged local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    /// Integer code used by the SQLite backend.
    pub fn code(self) -> i64 {
        match self {
            OperationType::Create => 0,
            OperationType::Update => 1,
            OperationType::Delete => 2,
        }
    }

    /// Inverse of [`code`](Self::code).
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(OperationType::Create),
            1 => Some(OperationType::Update),
            2 => Some(OperationType::Delete),
            _ => None,
        }
    }

    /// A delete entry is a tombstone.
    pub fn is_tombstone(self) -> bool {
        self == OperationType::Delete
    }
}

/// What a mutation call ended up recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationResult {
    Create,
    Update,
    Delete,
    NoOperation,
}

impl From<OperationType> for OperationResult {
    fn from(op: OperationType) -> Self {
        match op {
            OperationType::Create => OperationResult::Create,
            OperationType::Update => OperationResult::Update,
            OperationType::Delete => OperationResult::Delete,
        }
    }
}

/// Result of a Create/Update/Delete/Upsert call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationOutcome {
    pub success: bool,
    pub operation: OperationResult,
}

impl MutationOutcome {
    /// The mutation was recorded as `op`.
    pub fn applied(op: OperationType) -> Self {
        Self {
            success: true,
            operation: op.into(),
        }
    }

    /// The mutation was rejected by the state machine.
    pub fn rejected() -> Self {
        Self {
            success: false,
            operation: OperationResult::NoOperation,
        }
    }
}

/// An outbox record.
///
/// The storage layer works with `OperationLogEntry<serde_json::Value>`;
/// [`decode`](Self::decode) turns that into the caller's type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationLogEntry<T = serde_json::Value> {
    /// Storage identity only, never business identity
    pub entry_id: String,
    /// Append order assigned by the store; breaks timestamp ties
    #[serde(default)]
    pub sequence: u64,
    pub key: RecordKey,
    pub partition: Option<String>,
    pub type_name: String,
    pub value: Option<T>,
    /// Client wall clock, milliseconds since epoch
    pub modified_timestamp: Timestamp,
    pub operation: OperationType,
}

impl OperationLogEntry<serde_json::Value> {
    /// Create a new entry with a random id and no sequence yet.
    pub fn new(
        key: RecordKey,
        partition: Option<&str>,
        type_name: impl Into<String>,
        value: Option<serde_json::Value>,
        modified_timestamp: Timestamp,
        operation: OperationType,
    ) -> Self {
        Self {
            entry_id: uuid::Uuid::new_v4().to_string(),
            sequence: 0,
            key,
            partition: partition.map(str::to_string),
            type_name: type_name.into(),
            value,
            modified_timestamp,
            operation,
        }
    }

    /// Deserialize the payload into `T`.
    pub fn decode<T: DeserializeOwned>(self) -> Result<OperationLogEntry<T>> {
        let value = match self.value {
            Some(value) => Some(serde_json::from_value(value)?),
            None => None,
        };
        Ok(OperationLogEntry {
            entry_id: self.entry_id,
            sequence: self.sequence,
            key: self.key,
            partition: self.partition,
            type_name: self.type_name,
            value,
            modified_timestamp: self.modified_timestamp,
            operation: self.operation,
        })
    }
}

impl<T> OperationLogEntry<T> {
    /// Whether this entry marks the key as deleted.
    pub fn is_tombstone(&self) -> bool {
        self.operation.is_tombstone()
    }

    /// Ordering key inside one namespace: modification time, then append order.
    pub fn order_key(&self) -> (Timestamp, u64) {
        (self.modified_timestamp, self.sequence)
    }
}

/// The last materialized value of a key, independent of the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalSnapshotRecord {
    pub key: RecordKey,
    pub value: serde_json::Value,
}

impl LocalSnapshotRecord {
    pub fn new(key: RecordKey, value: serde_json::Value) -> Self {
        Self { key, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Note {
        id: String,
        n: i64,
    }

    #[test]
    fn operation_codes() {
        for op in [
            OperationType::Create,
            OperationType::Update,
            OperationType::Delete,
        ] {
            assert_eq!(OperationType::from_code(op.code()), Some(op));
        }
        assert_eq!(OperationType::from_code(9), None);
        assert!(OperationType::Delete.is_tombstone());
        assert!(!OperationType::Update.is_tombstone());
    }

    #[test]
    fn mutation_outcomes() {
        let applied = MutationOutcome::applied(OperationType::Update);
        assert!(applied.success);
        assert_eq!(applied.operation, OperationResult::Update);

        let rejected = MutationOutcome::rejected();
        assert!(!rejected.success);
        assert_eq!(rejected.operation, OperationResult::NoOperation);
    }

    #[test]
    fn new_entry_has_unique_id() {
        let a = OperationLogEntry::new("x".into(), None, "Note", None, 1, OperationType::Delete);
        let b = OperationLogEntry::new("x".into(), None, "Note", None, 1, OperationType::Delete);
        assert_ne!(a.entry_id, b.entry_id);
        assert_eq!(a.sequence, 0);
    }

    #[test]
    fn decode_typed_payload() {
        let entry = OperationLogEntry::new(
            "x".into(),
            Some("tenant"),
            "Note",
            Some(json!({"id": "x", "n": 3})),
            1000,
            OperationType::Create,
        );
        let typed = entry.decode::<Note>().unwrap();
        assert_eq!(
            typed.value,
            Some(Note {
                id: "x".into(),
                n: 3
            })
        );
        assert_eq!(typed.partition.as_deref(), Some("tenant"));
    }

    #[test]
    fn decode_rejects_wrong_shape() {
        let entry = OperationLogEntry::new(
            "x".into(),
            None,
            "Note",
            Some(json!({"id": 5})),
            1000,
            OperationType::Create,
        );
        assert!(entry.decode::<Note>().is_err());
    }

    #[test]
    fn serialization_format() {
        let entry = OperationLogEntry::new(
            "x".into(),
            None,
            "Note",
            None,
            1000,
            OperationType::Delete,
        );
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"modifiedTimestamp\":1000"));
        assert!(json.contains("\"operation\":\"Delete\""));
    }
}
