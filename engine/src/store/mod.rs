//! Embedded store boundary.
//!
//! The sync client only needs a handful of primitives from its local store:
//! append and scan the operation log, bulk delete log entries by predicate,
//! and read and bulk write snapshot records. [`LocalStore`] captures exactly
//! that. Everything is addressed by a *namespace* (type name plus optional
//! partition, see [`TypeRegistration::namespace`](crate::TypeRegistration::namespace))
//! and a [`RecordKey`].
//!
//! The trait is synchronous and takes `&mut self`: every call is made from a
//! unit of work on the [`ProcessingQueue`](crate::ProcessingQueue), so a
//! backend never sees concurrent writers.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::{error::StorageError, LocalSnapshotRecord, OperationLogEntry, RecordKey, Timestamp};

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StorageError>;

/// Which log entries a bulk delete removes.
#[derive(Debug, Clone, Copy)]
pub enum EntryFilter<'a> {
    /// Every entry in the namespace
    All,
    /// Every entry for any of these keys
    Keys(&'a [RecordKey]),
    /// Entries of one key stamped at exactly this time
    KeyAt {
        key: &'a RecordKey,
        modified_at: Timestamp,
    },
}

impl EntryFilter<'_> {
    /// Whether `entry` is selected by this filter.
    pub fn matches(&self, entry: &OperationLogEntry) -> bool {
        match self {
            EntryFilter::All => true,
            EntryFilter::Keys(keys) => keys.contains(&entry.key),
            EntryFilter::KeyAt { key, modified_at } => {
                entry.key == **key && entry.modified_timestamp == *modified_at
            }
        }
    }
}

/// Primitive operations over an embedded store.
///
/// Log scans return entries ordered by modification time, then append
/// order. "Latest" always means the last entry in that order.
pub trait LocalStore: Send {
    /// Prepare storage for a newly registered type (indexes, bookkeeping).
    fn ensure_type(&mut self, type_name: &str) -> StoreResult<()>;

    /// Append a log entry and return the sequence number assigned to it.
    fn append_entry(&mut self, namespace: &str, entry: &OperationLogEntry) -> StoreResult<u64>;

    /// Newest entry for a key, if any.
    fn latest_entry(
        &mut self,
        namespace: &str,
        key: &RecordKey,
    ) -> StoreResult<Option<OperationLogEntry>>;

    /// Every entry for a key, oldest first.
    fn key_history(&mut self, namespace: &str, key: &RecordKey)
        -> StoreResult<Vec<OperationLogEntry>>;

    /// Every entry in a namespace, oldest first.
    fn entries(&mut self, namespace: &str) -> StoreResult<Vec<OperationLogEntry>>;

    /// Delete the entries selected by `filter`, returning how many went away.
    fn delete_entries(&mut self, namespace: &str, filter: EntryFilter<'_>) -> StoreResult<usize>;

    /// Snapshot value of a key.
    fn snapshot_get(
        &mut self,
        namespace: &str,
        key: &RecordKey,
    ) -> StoreResult<Option<serde_json::Value>>;

    /// Every snapshot record in a namespace.
    fn snapshot_all(&mut self, namespace: &str) -> StoreResult<Vec<LocalSnapshotRecord>>;

    /// Replace the whole snapshot set of a namespace.
    fn snapshot_replace(
        &mut self,
        namespace: &str,
        records: &[LocalSnapshotRecord],
    ) -> StoreResult<()>;

    /// Insert or overwrite snapshot records.
    fn snapshot_upsert_many(
        &mut self,
        namespace: &str,
        records: &[LocalSnapshotRecord],
    ) -> StoreResult<()>;

    /// Remove snapshot records, returning how many existed.
    fn snapshot_delete_many(&mut self, namespace: &str, keys: &[RecordKey]) -> StoreResult<usize>;
}
