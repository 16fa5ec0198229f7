//! In-memory store backend.

use super::{EntryFilter, LocalStore, StoreResult};
use crate::{LocalSnapshotRecord, OperationLogEntry, RecordKey};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A [`LocalStore`] that lives only as long as the process.
///
/// Backs `SyncClient::initialize_in_memory` and most tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    types: BTreeSet<String>,
    oplog: HashMap<String, Vec<OperationLogEntry>>,
    snapshots: HashMap<String, BTreeMap<String, LocalSnapshotRecord>>,
    next_seq: u64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Type names registered so far.
    pub fn registered_types(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(String::as_str)
    }

    fn sorted_entries(
        &self,
        namespace: &str,
        filter: impl Fn(&OperationLogEntry) -> bool,
    ) -> Vec<OperationLogEntry> {
        let mut entries: Vec<_> = self
            .oplog
            .get(namespace)
            .into_iter()
            .flatten()
            .filter(|entry| filter(*entry))
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.order_key());
        entries
    }
}

impl LocalStore for MemoryStore {
    fn ensure_type(&mut self, type_name: &str) -> StoreResult<()> {
        self.types.insert(type_name.to_string());
        Ok(())
    }

    fn append_entry(&mut self, namespace: &str, entry: &OperationLogEntry) -> StoreResult<u64> {
        self.next_seq += 1;
        let mut stored = entry.clone();
        stored.sequence = self.next_seq;
        self.oplog
            .entry(namespace.to_string())
            .or_default()
            .push(stored);
        Ok(self.next_seq)
    }

    fn latest_entry(
        &mut self,
        namespace: &str,
        key: &RecordKey,
    ) -> StoreResult<Option<OperationLogEntry>> {
        Ok(self
            .oplog
            .get(namespace)
            .into_iter()
            .flatten()
            .filter(|entry| entry.key == *key)
            .max_by_key(|entry| entry.order_key())
            .cloned())
    }

    fn key_history(
        &mut self,
        namespace: &str,
        key: &RecordKey,
    ) -> StoreResult<Vec<OperationLogEntry>> {
        Ok(self.sorted_entries(namespace, |entry| entry.key == *key))
    }

    fn entries(&mut self, namespace: &str) -> StoreResult<Vec<OperationLogEntry>> {
        Ok(self.sorted_entries(namespace, |_| true))
    }

    fn delete_entries(&mut self, namespace: &str, filter: EntryFilter<'_>) -> StoreResult<usize> {
        let Some(entries) = self.oplog.get_mut(namespace) else {
            return Ok(0);
        };
        let before = entries.len();
        entries.retain(|entry| !filter.matches(entry));
        Ok(before - entries.len())
    }

    fn snapshot_get(
        &mut self,
        namespace: &str,
        key: &RecordKey,
    ) -> StoreResult<Option<serde_json::Value>> {
        Ok(self
            .snapshots
            .get(namespace)
            .and_then(|records| records.get(&key.storage_key()))
            .map(|record| record.value.clone()))
    }

    fn snapshot_all(&mut self, namespace: &str) -> StoreResult<Vec<LocalSnapshotRecord>> {
        Ok(self
            .snapshots
            .get(namespace)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    fn snapshot_replace(
        &mut self,
        namespace: &str,
        records: &[LocalSnapshotRecord],
    ) -> StoreResult<()> {
        let replaced = records
            .iter()
            .map(|record| (record.key.storage_key(), record.clone()))
            .collect();
        self.snapshots.insert(namespace.to_string(), replaced);
        Ok(())
    }

    fn snapshot_upsert_many(
        &mut self,
        namespace: &str,
        records: &[LocalSnapshotRecord],
    ) -> StoreResult<()> {
        let set = self.snapshots.entry(namespace.to_string()).or_default();
        for record in records {
            set.insert(record.key.storage_key(), record.clone());
        }
        Ok(())
    }

    fn snapshot_delete_many(&mut self, namespace: &str, keys: &[RecordKey]) -> StoreResult<usize> {
        let Some(set) = self.snapshots.get_mut(namespace) else {
            return Ok(0);
        };
        Ok(keys
            .iter()
            .filter(|key| set.remove(&key.storage_key()).is_some())
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    #[test]
    fn append_and_scan() {
        contract::append_and_scan(&mut MemoryStore::new());
    }

    #[test]
    fn equal_timestamps_fall_back_to_append_order() {
        contract::equal_timestamps_fall_back_to_append_order(&mut MemoryStore::new());
    }

    #[test]
    fn delete_by_filter() {
        contract::delete_by_filter(&mut MemoryStore::new());
    }

    #[test]
    fn snapshot_operations() {
        contract::snapshot_operations(&mut MemoryStore::new());
    }

    #[test]
    fn keys_of_different_kinds_do_not_collide() {
        contract::keys_of_different_kinds_do_not_collide(&mut MemoryStore::new());
    }

    #[test]
    fn tracks_registered_types() {
        let mut store = MemoryStore::new();
        store.ensure_type("Note").unwrap();
        store.ensure_type("Note").unwrap();
        store.ensure_type("Post").unwrap();
        assert_eq!(store.registered_types().collect::<Vec<_>>(), vec!["Note", "Post"]);
    }
}
