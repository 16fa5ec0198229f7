//! Local snapshot store.
//!
//! The last materialized value per key, kept apart from the outbox. It is
//! written by bulk cache population and by reconciliation, and read as the
//! base layer of every merge.

use crate::{error::Result, store::LocalStore, LocalSnapshotRecord, RecordKey};
use serde_json::Value;

/// The snapshot set of one (type, partition) namespace.
pub struct SnapshotSet<'a> {
    store: &'a mut dyn LocalStore,
    namespace: &'a str,
}

impl<'a> SnapshotSet<'a> {
    pub fn new(store: &'a mut dyn LocalStore, namespace: &'a str) -> Self {
        Self { store, namespace }
    }

    pub fn get(&mut self, key: &RecordKey) -> Result<Option<Value>> {
        Ok(self.store.snapshot_get(self.namespace, key)?)
    }

    pub fn contains(&mut self, key: &RecordKey) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn all(&mut self) -> Result<Vec<LocalSnapshotRecord>> {
        Ok(self.store.snapshot_all(self.namespace)?)
    }

    /// Delete everything, then insert `records`.
    pub fn replace_all(&mut self, records: &[LocalSnapshotRecord]) -> Result<()> {
        self.store.snapshot_replace(self.namespace, records)?;
        tracing::debug!(namespace = self.namespace, count = records.len(), "replaced snapshot set");
        Ok(())
    }

    pub fn upsert_many(&mut self, records: &[LocalSnapshotRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        Ok(self.store.snapshot_upsert_many(self.namespace, records)?)
    }

    pub fn remove_many(&mut self, keys: &[RecordKey]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        Ok(self.store.snapshot_delete_many(self.namespace, keys)?)
    }
}
