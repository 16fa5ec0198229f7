//! Authoritative document store.
//!
//! The resolver only needs three things from the store behind it: a point
//! read that also returns the last-modified timestamp, an upsert, and a
//! delete, all addressed by (collection, partition key, record key). The
//! store stamps every write with its own clock.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tether_engine::{Clock, SystemClock, Timestamp};

use crate::error::Result;

/// A document with its authoritative last-modified timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub value: Value,
    pub modified_at: Timestamp,
}

/// Address of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentRef<'a> {
    pub collection: &'a str,
    pub partition_key: &'a str,
    pub record_key: &'a str,
}

#[async_trait]
pub trait AuthoritativeStore: Send + Sync {
    /// Read a document together with its last-modified timestamp.
    async fn get_with_meta(&self, doc: DocumentRef<'_>) -> Result<Option<StoredDocument>>;

    /// Insert or replace a document. Returns the timestamp it was stamped with.
    async fn upsert(&self, doc: DocumentRef<'_>, value: &Value) -> Result<Timestamp>;

    /// Delete a document. Returns whether it existed.
    async fn delete(&self, doc: DocumentRef<'_>) -> Result<bool>;
}

type DocumentKey = (String, String, String);

/// In-memory authoritative store.
///
/// Used when no database is configured and in tests.
pub struct MemoryDocumentStore {
    documents: DashMap<DocumentKey, StoredDocument>,
    clock: Arc<dyn Clock>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            documents: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn key(doc: DocumentRef<'_>) -> DocumentKey {
        (
            doc.collection.to_string(),
            doc.partition_key.to_string(),
            doc.record_key.to_string(),
        )
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthoritativeStore for MemoryDocumentStore {
    async fn get_with_meta(&self, doc: DocumentRef<'_>) -> Result<Option<StoredDocument>> {
        Ok(self
            .documents
            .get(&Self::key(doc))
            .map(|entry| entry.value().clone()))
    }

    async fn upsert(&self, doc: DocumentRef<'_>, value: &Value) -> Result<Timestamp> {
        let modified_at = self.clock.now_millis();
        self.documents.insert(
            Self::key(doc),
            StoredDocument {
                value: value.clone(),
                modified_at,
            },
        );
        Ok(modified_at)
    }

    async fn delete(&self, doc: DocumentRef<'_>) -> Result<bool> {
        Ok(self.documents.remove(&Self::key(doc)).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_engine::ManualClock;

    fn doc(key: &str) -> DocumentRef<'_> {
        DocumentRef {
            collection: "Note",
            partition_key: "",
            record_key: key,
        }
    }

    #[tokio::test]
    async fn upsert_stamps_with_store_clock() {
        let clock = Arc::new(ManualClock::new(500));
        let store = MemoryDocumentStore::with_clock(clock.clone());

        assert_eq!(store.upsert(doc("a"), &json!({"id": "a"})).await.unwrap(), 500);
        clock.advance(10);
        store.upsert(doc("a"), &json!({"id": "a", "n": 2})).await.unwrap();

        let stored = store.get_with_meta(doc("a")).await.unwrap().unwrap();
        assert_eq!(stored.modified_at, 510);
        assert_eq!(stored.value["n"], 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn partitions_and_collections_are_separate() {
        let store = MemoryDocumentStore::new();
        store.upsert(doc("a"), &json!({})).await.unwrap();

        let other_partition = DocumentRef {
            partition_key: "tenant",
            ..doc("a")
        };
        let other_collection = DocumentRef {
            collection: "Task",
            ..doc("a")
        };
        assert!(store.get_with_meta(other_partition).await.unwrap().is_none());
        assert!(store.get_with_meta(other_collection).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = MemoryDocumentStore::new();
        store.upsert(doc("a"), &json!({})).await.unwrap();

        assert!(store.delete(doc("a")).await.unwrap());
        assert!(!store.delete(doc("a")).await.unwrap());
        assert!(store.is_empty());
    }
}
