//! Operation log store.
//!
//! Typed view of one namespace of the outbox over a [`LocalStore`].

use crate::{
    error::Result,
    merge,
    store::{EntryFilter, LocalStore},
    OperationLogEntry, RecordKey, Timestamp,
};

/// The pending log of one (type, partition) namespace.
pub struct OperationLog<'a> {
    store: &'a mut dyn LocalStore,
    namespace: &'a str,
}

impl<'a> OperationLog<'a> {
    pub fn new(store: &'a mut dyn LocalStore, namespace: &'a str) -> Self {
        Self { store, namespace }
    }

    /// Append an entry; the returned copy carries its assigned sequence.
    pub fn append(&mut self, mut entry: OperationLogEntry) -> Result<OperationLogEntry> {
        entry.sequence = self.store.append_entry(self.namespace, &entry)?;
        tracing::trace!(
            namespace = self.namespace,
            key = %entry.key,
            operation = ?entry.operation,
            sequence = entry.sequence,
            "appended log entry"
        );
        Ok(entry)
    }

    pub fn latest(&mut self, key: &RecordKey) -> Result<Option<OperationLogEntry>> {
        Ok(self.store.latest_entry(self.namespace, key)?)
    }

    /// Every entry for `key`, oldest first.
    pub fn history(&mut self, key: &RecordKey) -> Result<Vec<OperationLogEntry>> {
        Ok(self.store.key_history(self.namespace, key)?)
    }

    /// Every entry in the namespace, oldest first.
    pub fn all(&mut self) -> Result<Vec<OperationLogEntry>> {
        Ok(self.store.entries(self.namespace)?)
    }

    /// Newest entry per key, ordered by when that entry was written.
    pub fn latest_per_key(&mut self) -> Result<Vec<OperationLogEntry>> {
        Ok(merge::latest_per_key(self.all()?))
    }

    /// Remove every entry for the given keys.
    pub fn drain(&mut self, keys: &[RecordKey]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        Ok(self
            .store
            .delete_entries(self.namespace, EntryFilter::Keys(keys))?)
    }

    /// Remove the whole namespace.
    pub fn drain_all(&mut self) -> Result<usize> {
        Ok(self.store.delete_entries(self.namespace, EntryFilter::All)?)
    }

    /// Remove the entries of `key` stamped at `modified_at`.
    pub fn drain_at(&mut self, key: &RecordKey, modified_at: Timestamp) -> Result<usize> {
        Ok(self
            .store
            .delete_entries(self.namespace, EntryFilter::KeyAt { key, modified_at })?)
    }
}
