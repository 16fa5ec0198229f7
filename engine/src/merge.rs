//! Merge of the snapshot with pending log entries.
//!
//! The current truth for a key is the newest log entry if one exists, else
//! the snapshot. A tombstone as newest entry means "absent", whatever the
//! snapshot says. Everything here is pure and works on JSON payloads so it
//! can be shared by every registered type.

use crate::{
    config::TombstonePolicy, LocalSnapshotRecord, OperationLogEntry, OperationType,
};
use std::collections::HashMap;

/// State of a key as seen by the mutation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Newest entry is a create/update, or no entry and a snapshot exists
    Live,
    /// Newest entry is a delete
    Tombstoned,
    /// Nothing known about the key
    Absent,
}

impl Liveness {
    /// Classify a key from its newest log entry and snapshot presence.
    pub fn of(latest: Option<&OperationLogEntry>, in_snapshot: bool) -> Self {
        match latest {
            Some(entry) if entry.is_tombstone() => Liveness::Tombstoned,
            Some(_) => Liveness::Live,
            None if in_snapshot => Liveness::Live,
            None => Liveness::Absent,
        }
    }
}

/// A mutation requested through the sync client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    Upsert,
}

/// The Create/Update/Delete state machine.
///
/// Returns the operation to log, or `None` when the mutation is rejected.
pub fn transition(
    kind: MutationKind,
    liveness: Liveness,
    policy: TombstonePolicy,
) -> Option<OperationType> {
    match (kind, liveness) {
        (MutationKind::Create, Liveness::Absent) => Some(OperationType::Create),
        (MutationKind::Create, _) => None,

        (MutationKind::Update, Liveness::Live) => Some(OperationType::Update),
        (MutationKind::Delete, Liveness::Live) => Some(OperationType::Delete),
        (MutationKind::Update | MutationKind::Delete, _) => None,

        (MutationKind::Upsert, Liveness::Live) => Some(OperationType::Update),
        (MutationKind::Upsert, Liveness::Absent) => Some(OperationType::Create),
        (MutationKind::Upsert, Liveness::Tombstoned) => match policy {
            TombstonePolicy::Reject => None,
            TombstonePolicy::Resurrect => Some(OperationType::Create),
        },
    }
}

/// Reduce a log to its newest entry per key.
///
/// The result is ordered by the position of each surviving entry in the
/// (modified, sequence) order.
pub fn latest_per_key(entries: Vec<OperationLogEntry>) -> Vec<OperationLogEntry> {
    let mut newest: HashMap<String, OperationLogEntry> = HashMap::new();
    for entry in entries {
        let slot = newest.entry(entry.key.storage_key());
        match slot {
            std::collections::hash_map::Entry::Occupied(mut current) => {
                if entry.order_key() >= current.get().order_key() {
                    current.insert(entry);
                }
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
    }

    let mut latest: Vec<_> = newest.into_values().collect();
    latest.sort_by_key(|entry| entry.order_key());
    latest
}

/// Full outer merge of a snapshot set with pending log entries.
///
/// For every key with log activity the newest entry wins: a tombstone removes
/// the key, otherwise the entry's value replaces the snapshot value or is
/// added when the snapshot has none. Snapshot order is preserved; added keys
/// follow in log order.
pub fn overlay(
    snapshot: Vec<LocalSnapshotRecord>,
    entries: Vec<OperationLogEntry>,
) -> Vec<LocalSnapshotRecord> {
    let mut merged: Vec<Option<LocalSnapshotRecord>> = snapshot.into_iter().map(Some).collect();
    let mut index: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .filter_map(|(i, record)| record.as_ref().map(|r| (r.key.storage_key(), i)))
        .collect();

    for entry in latest_per_key(entries) {
        let storage_key = entry.key.storage_key();
        let position = index.get(&storage_key).copied();

        if entry.is_tombstone() {
            if let Some(i) = position {
                merged[i] = None;
            }
            continue;
        }

        let Some(value) = entry.value else {
            continue;
        };
        let record = LocalSnapshotRecord::new(entry.key, value);
        match position {
            Some(i) => merged[i] = Some(record),
            None => {
                index.insert(storage_key, merged.len());
                merged.push(Some(record));
            }
        }
    }

    merged.into_iter().flatten().collect()
}
