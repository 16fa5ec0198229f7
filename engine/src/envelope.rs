//! Wire envelopes exchanged with the authoritative resolver.
//!
//! The client ships a list of [`ClientSyncInfo`] built from its pending log
//! and gets back a list of [`ServerSyncInfo`] to feed into reconciliation.
//! The transport is up to the application; both shapes serialize to JSON.

use crate::{OperationLogEntry, OperationType, Timestamp};
use serde::{Deserialize, Serialize};

/// Outcome the resolver assigned to one client mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerOperation {
    Created,
    Updated,
    Deleted,
    NotModified,
}

/// Which pending entries `get_sync_history` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncHistoryMode {
    /// Newest entry per key
    #[default]
    Latest,
    /// Every entry, oldest first
    FullHistory,
}

/// Outbound mutation envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSyncInfo<T> {
    /// Client timestamp of the mutation (milliseconds since epoch)
    pub modified_on: Timestamp,
    pub operation: OperationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    pub value: Option<T>,
}

impl<T> ClientSyncInfo<T> {
    pub fn new(modified_on: Timestamp, operation: OperationType, value: Option<T>) -> Self {
        Self {
            modified_on,
            operation,
            partition: None,
            value,
        }
    }

    /// Builder-style partition setter.
    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }
}

impl<T> From<OperationLogEntry<T>> for ClientSyncInfo<T> {
    fn from(entry: OperationLogEntry<T>) -> Self {
        Self {
            modified_on: entry.modified_timestamp,
            operation: entry.operation,
            partition: entry.partition,
            value: entry.value,
        }
    }
}

/// Inbound outcome envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSyncInfo<T> {
    pub operation: ServerOperation,
    /// Display form of the record key
    pub id: String,
    /// Authoritative timestamp (milliseconds since epoch)
    pub modified_on: Timestamp,
    pub value: Option<T>,
}

impl<T> ServerSyncInfo<T> {
    pub fn new(
        operation: ServerOperation,
        id: impl Into<String>,
        modified_on: Timestamp,
        value: Option<T>,
    ) -> Self {
        Self {
            operation,
            id: id.into(),
            modified_on,
            value,
        }
    }

    /// Convert the payload type, e.g. to or from `serde_json::Value`.
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<ServerSyncInfo<U>, E> {
        let value = match self.value {
            Some(value) => Some(f(value)?),
            None => None,
        };
        Ok(ServerSyncInfo {
            operation: self.operation,
            id: self.id,
            modified_on: self.modified_on,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordKey;
    use serde_json::json;

    #[test]
    fn client_info_from_entry() {
        let entry = OperationLogEntry::new(
            RecordKey::from("1"),
            Some("tenant"),
            "Post",
            Some(json!({"id": "1"})),
            1234,
            OperationType::Update,
        );
        let info = ClientSyncInfo::from(entry);
        assert_eq!(info.modified_on, 1234);
        assert_eq!(info.operation, OperationType::Update);
        assert_eq!(info.partition.as_deref(), Some("tenant"));
        assert_eq!(info.value, Some(json!({"id": "1"})));
    }

    #[test]
    fn client_info_wire_format() {
        let info = ClientSyncInfo::new(10, OperationType::Create, Some(json!({"id": "a"})));
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(
            json,
            json!({"modifiedOn": 10, "operation": "Create", "value": {"id": "a"}})
        );

        let parsed: ClientSyncInfo<serde_json::Value> =
            serde_json::from_value(json!({"modifiedOn": 1, "operation": "Delete", "value": null}))
                .unwrap();
        assert_eq!(parsed.operation, OperationType::Delete);
        assert!(parsed.partition.is_none());
    }

    #[test]
    fn server_info_wire_format() {
        let info = ServerSyncInfo::new(ServerOperation::NotModified, "a", 5, None::<i32>);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(
            json,
            json!({"operation": "NotModified", "id": "a", "modifiedOn": 5, "value": null})
        );
    }

    #[test]
    fn try_map_converts_payload() {
        let info = ServerSyncInfo::new(ServerOperation::Updated, "a", 5, Some(json!(3)));
        let mapped = info
            .try_map(serde_json::from_value::<i64>)
            .unwrap();
        assert_eq!(mapped.value, Some(3));
        assert_eq!(mapped.operation, ServerOperation::Updated);
    }
}
