//! Batch resolver.
//!
//! Turns a batch of client mutation envelopes into authoritative outcomes.
//! Creates and updates are last-writer-wins on timestamps: the stored
//! document is kept only when it was modified strictly after the client's
//! change, so equal timestamps go to the client.

use serde_json::Value;
use std::sync::Arc;
use tether_engine::{
    ClientSyncInfo, Clock, OperationType, RecordKey, ServerOperation, ServerSyncInfo,
    SystemClock,
};

use crate::error::Result;
use crate::store::{AuthoritativeStore, DocumentRef};

/// Where identity and partition live inside a document.
#[derive(Debug, Clone)]
pub struct IdentityFields {
    pub id_field: String,
    pub partition_field: Option<String>,
}

impl Default for IdentityFields {
    fn default() -> Self {
        Self {
            id_field: "id".to_string(),
            partition_field: None,
        }
    }
}

impl IdentityFields {
    /// Display form of the document identity, if the field holds a scalar.
    fn id_of(&self, value: &Value) -> Option<String> {
        scalar(value.get(&self.id_field)?)
    }

    /// Partition key from the document field, else the envelope, else empty.
    fn partition_of(&self, value: &Value, envelope: Option<&str>) -> String {
        self.partition_field
            .as_deref()
            .and_then(|field| value.get(field))
            .and_then(scalar)
            .or_else(|| envelope.map(str::to_string))
            .unwrap_or_default()
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Resolves client batches against an [`AuthoritativeStore`].
pub struct BatchResolver {
    store: Arc<dyn AuthoritativeStore>,
    fields: IdentityFields,
    clock: Arc<dyn Clock>,
}

impl BatchResolver {
    pub fn new(store: Arc<dyn AuthoritativeStore>, fields: IdentityFields) -> Self {
        Self {
            store,
            fields,
            clock: Arc::new(SystemClock),
        }
    }

    /// Clock used to stamp `Deleted` outcomes.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Resolve every envelope in order; one outcome per envelope.
    pub async fn resolve(
        &self,
        collection: &str,
        batch: Vec<ClientSyncInfo<Value>>,
    ) -> Result<Vec<ServerSyncInfo<Value>>> {
        let mut outcomes = Vec::with_capacity(batch.len());
        for envelope in batch {
            outcomes.push(self.resolve_one(collection, envelope).await?);
        }

        tracing::debug!(collection, count = outcomes.len(), "resolved batch");
        Ok(outcomes)
    }

    async fn resolve_one(
        &self,
        collection: &str,
        envelope: ClientSyncInfo<Value>,
    ) -> Result<ServerSyncInfo<Value>> {
        let not_modified =
            |id: String| ServerSyncInfo::new(ServerOperation::NotModified, id, envelope.modified_on, None);

        let Some(value) = envelope.value.as_ref() else {
            tracing::warn!(collection, operation = ?envelope.operation, "envelope without value");
            return Ok(not_modified(String::new()));
        };

        let id = match self.fields.id_of(value) {
            Some(id) if RecordKey::Text(id.clone()).is_valid() => id,
            other => {
                tracing::warn!(collection, id = ?other, "invalid identity");
                return Ok(not_modified(other.unwrap_or_default()));
            }
        };

        let partition_key = self
            .fields
            .partition_of(value, envelope.partition.as_deref());
        let doc = DocumentRef {
            collection,
            partition_key: &partition_key,
            record_key: &id,
        };

        match envelope.operation {
            OperationType::Create | OperationType::Update => {
                match self.store.get_with_meta(doc).await? {
                    None => {
                        let stamped = self.store.upsert(doc, value).await?;
                        self.refreshed(doc, ServerOperation::Created, value, stamped)
                            .await
                    }
                    Some(existing) if existing.modified_at > envelope.modified_on => {
                        tracing::debug!(
                            collection,
                            id = %id,
                            server = existing.modified_at,
                            client = envelope.modified_on,
                            "server copy is newer"
                        );
                        Ok(ServerSyncInfo::new(
                            ServerOperation::Updated,
                            id,
                            existing.modified_at,
                            Some(existing.value),
                        ))
                    }
                    Some(_) => {
                        let stamped = self.store.upsert(doc, value).await?;
                        self.refreshed(doc, ServerOperation::Updated, value, stamped)
                            .await
                    }
                }
            }
            OperationType::Delete => {
                if self.store.delete(doc).await? {
                    Ok(ServerSyncInfo::new(
                        ServerOperation::Deleted,
                        id,
                        self.clock.now_millis(),
                        None,
                    ))
                } else {
                    Ok(not_modified(id))
                }
            }
        }
    }

    /// Outcome carrying the document as stored after a write.
    async fn refreshed(
        &self,
        doc: DocumentRef<'_>,
        operation: ServerOperation,
        written: &Value,
        stamped: i64,
    ) -> Result<ServerSyncInfo<Value>> {
        let (value, modified_on) = match self.store.get_with_meta(doc).await? {
            Some(stored) => (stored.value, stored.modified_at),
            None => (written.clone(), stamped),
        };
        Ok(ServerSyncInfo::new(
            operation,
            doc.record_key,
            modified_on,
            Some(value),
        ))
    }
}

impl std::fmt::Debug for BatchResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchResolver")
            .field("fields", &self.fields)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
