//! Reconciliation of server outcomes with the pending log.
//!
//! The *detection* of a conflict (a server outcome arriving for a key that
//! still has pending local entries) is separated from the *decision* of who
//! wins, which is delegated to a [`SyncReconciler`].
//!
//! # Algorithm
//!
//! 1. Take the newest pending entry per key.
//! 2. For each server envelope, find its key and the matching pending entry
//!    (exact key first, then the registered comparer).
//! 3. Matched: ask the reconciler for the winning value. Unmatched: take the
//!    server value as is.
//! 4. Drain the log for every key that got an answer, then write the winners
//!    into the snapshot (`None` removes the key).

use crate::{LocalSnapshotRecord, OperationLogEntry, RecordKey, ServerSyncInfo};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Conflict resolution policy.
///
/// Returns the value to persist for the key, or `None` to drop it from the
/// snapshot. Implementations must be pure.
pub trait SyncReconciler: Send + Sync {
    fn reconcile(
        &self,
        server: &ServerSyncInfo<Value>,
        client: Option<&OperationLogEntry>,
    ) -> Option<Value>;
}

impl<F> SyncReconciler for F
where
    F: Fn(&ServerSyncInfo<Value>, Option<&OperationLogEntry>) -> Option<Value> + Send + Sync,
{
    fn reconcile(
        &self,
        server: &ServerSyncInfo<Value>,
        client: Option<&OperationLogEntry>,
    ) -> Option<Value> {
        self(server, client)
    }
}

/// The remote authority always wins (default).
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerWins;

impl SyncReconciler for ServerWins {
    fn reconcile(
        &self,
        server: &ServerSyncInfo<Value>,
        _client: Option<&OperationLogEntry>,
    ) -> Option<Value> {
        server.value.clone()
    }
}

/// Keep the pending client change when it is strictly newer than the server
/// outcome; otherwise take the server's value.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriterWins;

impl SyncReconciler for LastWriterWins {
    fn reconcile(
        &self,
        server: &ServerSyncInfo<Value>,
        client: Option<&OperationLogEntry>,
    ) -> Option<Value> {
        match client {
            Some(entry) if entry.modified_timestamp > server.modified_on => {
                if entry.is_tombstone() {
                    None
                } else {
                    entry.value.clone()
                }
            }
            _ => server.value.clone(),
        }
    }
}

/// Writes decided for one reconciliation batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Keys whose pending entries are drained
    pub drain: Vec<RecordKey>,
    /// Winning values written to the snapshot
    pub upserts: Vec<LocalSnapshotRecord>,
    /// Keys removed from the snapshot
    pub removals: Vec<RecordKey>,
    /// Envelopes that had a pending local entry
    pub matched: usize,
}

/// What a `reconcile` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    /// Server envelopes processed
    pub received: usize,
    /// Envelopes matched to a pending entry
    pub matched: usize,
    /// Log entries drained
    pub drained: usize,
    /// Snapshot records written
    pub upserted: usize,
    /// Snapshot records removed
    pub removed: usize,
}

impl fmt::Display for ReconcileSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} received, {} matched, {} drained, {} upserted, {} removed",
            self.received, self.matched, self.drained, self.upserted, self.removed
        )
    }
}

/// Decide the writes for a batch of server outcomes.
///
/// `pending` holds the newest entry per key. `key_of` derives the identity
/// from a server payload; when it cannot, the envelope `id` is matched
/// against the display form of pending keys and finally taken as text.
pub fn plan(
    batch: &[ServerSyncInfo<Value>],
    pending: &[OperationLogEntry],
    key_of: &dyn Fn(&Value) -> Option<RecordKey>,
    keys_equal: &dyn Fn(&RecordKey, &RecordKey) -> bool,
    reconciler: &dyn SyncReconciler,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();
    let mut drained: HashSet<String> = HashSet::new();
    // storage key -> (key, winner) in first-seen order; later envelopes overwrite
    let mut order: Vec<String> = Vec::new();
    let mut outcomes: HashMap<String, (RecordKey, Option<Value>)> = HashMap::new();

    let mut drain = |key: &RecordKey, plan: &mut ReconcilePlan| {
        if drained.insert(key.storage_key()) {
            plan.drain.push(key.clone());
        }
    };

    for server in batch {
        let key = server_key(server, pending, key_of);

        let matched = pending
            .iter()
            .find(|entry| entry.key == key)
            .or_else(|| pending.iter().find(|entry| keys_equal(&entry.key, &key)));

        let winner = match matched {
            Some(entry) => {
                plan.matched += 1;
                drain(&entry.key, &mut plan);
                if entry.key != key {
                    // The comparer matched a differently spelled key; retire it.
                    record_outcome(&mut order, &mut outcomes, entry.key.clone(), None);
                }
                reconciler.reconcile(server, Some(entry))
            }
            None => server.value.clone(),
        };

        drain(&key, &mut plan);
        record_outcome(&mut order, &mut outcomes, key, winner);
    }

    for storage_key in order {
        if let Some((key, winner)) = outcomes.remove(&storage_key) {
            match winner {
                Some(value) => plan.upserts.push(LocalSnapshotRecord::new(key, value)),
                None => plan.removals.push(key),
            }
        }
    }

    plan
}

fn record_outcome(
    order: &mut Vec<String>,
    outcomes: &mut HashMap<String, (RecordKey, Option<Value>)>,
    key: RecordKey,
    winner: Option<Value>,
) {
    let storage_key = key.storage_key();
    if outcomes.insert(storage_key.clone(), (key, winner)).is_none() {
        order.push(storage_key);
    }
}

fn server_key(
    server: &ServerSyncInfo<Value>,
    pending: &[OperationLogEntry],
    key_of: &dyn Fn(&Value) -> Option<RecordKey>,
) -> RecordKey {
    server
        .value
        .as_ref()
        .and_then(key_of)
        .or_else(|| {
            pending
                .iter()
                .find(|entry| entry.key.to_string() == server.id)
                .map(|entry| entry.key.clone())
        })
        .unwrap_or_else(|| RecordKey::Text(server.id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OperationType, ServerOperation, Timestamp};
    use serde_json::json;

    fn pending(key: &str, ts: Timestamp, op: OperationType, n: i64) -> OperationLogEntry {
        OperationLogEntry::new(key.into(), None, "Note", Some(json!({"id": key, "n": n})), ts, op)
    }

    fn server(op: ServerOperation, id: &str, ts: Timestamp, n: Option<i64>) -> ServerSyncInfo<Value> {
        ServerSyncInfo::new(op, id, ts, n.map(|n| json!({"id": id, "n": n})))
    }

    fn id_of(value: &Value) -> Option<RecordKey> {
        value.get("id")?.as_str().map(RecordKey::from)
    }

    fn exact(a: &RecordKey, b: &RecordKey) -> bool {
        a == b
    }

    #[test]
    fn server_wins_takes_server_value() {
        let client = pending("1", 200, OperationType::Update, 5);
        let env = server(ServerOperation::Updated, "1", 100, Some(1));
        assert_eq!(ServerWins.reconcile(&env, Some(&client)), Some(json!({"id": "1", "n": 1})));

        let deleted = server(ServerOperation::Deleted, "1", 100, None);
        assert_eq!(ServerWins.reconcile(&deleted, Some(&client)), None);
    }

    #[test]
    fn last_writer_wins_compares_timestamps() {
        let env = server(ServerOperation::Updated, "1", 100, Some(1));

        let newer = pending("1", 101, OperationType::Update, 5);
        assert_eq!(
            LastWriterWins.reconcile(&env, Some(&newer)),
            Some(json!({"id": "1", "n": 5}))
        );

        let tie = pending("1", 100, OperationType::Update, 5);
        assert_eq!(
            LastWriterWins.reconcile(&env, Some(&tie)),
            Some(json!({"id": "1", "n": 1}))
        );

        let newer_delete = pending("1", 150, OperationType::Delete, 5);
        assert_eq!(LastWriterWins.reconcile(&env, Some(&newer_delete)), None);

        assert_eq!(
            LastWriterWins.reconcile(&env, None),
            Some(json!({"id": "1", "n": 1}))
        );
    }

    #[test]
    fn closures_are_reconcilers() {
        let always_null = |_: &ServerSyncInfo<Value>, _: Option<&OperationLogEntry>| Some(Value::Null);
        let env = server(ServerOperation::Created, "1", 1, Some(1));
        assert_eq!(always_null.reconcile(&env, None), Some(Value::Null));
    }

    #[test]
    fn plan_matches_and_drains() {
        let log = vec![
            pending("1", 300, OperationType::Update, 99),
            pending("2", 300, OperationType::Create, 1),
        ];
        let batch = vec![
            server(ServerOperation::Updated, "1", 100, Some(10)),
            server(ServerOperation::Created, "3", 100, Some(30)),
        ];

        let plan = plan(&batch, &log, &id_of, &exact, &ServerWins);
        assert_eq!(plan.matched, 1);
        assert_eq!(plan.drain, vec![RecordKey::from("1"), RecordKey::from("3")]);
        assert_eq!(
            plan.upserts,
            vec![
                LocalSnapshotRecord::new("1".into(), json!({"id": "1", "n": 10})),
                LocalSnapshotRecord::new("3".into(), json!({"id": "3", "n": 30})),
            ]
        );
        assert!(plan.removals.is_empty());
    }

    #[test]
    fn plan_removes_deleted_keys_by_id() {
        let log = vec![pending("7", 10, OperationType::Delete, 0)];
        let batch = vec![server(ServerOperation::Deleted, "7", 20, None)];

        let plan = plan(&batch, &log, &id_of, &exact, &ServerWins);
        assert_eq!(plan.matched, 1);
        assert_eq!(plan.drain, vec![RecordKey::from("7")]);
        assert_eq!(plan.removals, vec![RecordKey::from("7")]);
    }

    #[test]
    fn plan_matches_integer_keys_by_display_form() {
        let mut entry = pending("ignored", 10, OperationType::Delete, 0);
        entry.key = RecordKey::Int(42);
        let batch = vec![server(ServerOperation::Deleted, "42", 20, None)];

        let plan = plan(&batch, &[entry], &id_of, &exact, &ServerWins);
        assert_eq!(plan.drain, vec![RecordKey::Int(42)]);
        assert_eq!(plan.removals, vec![RecordKey::Int(42)]);
    }

    #[test]
    fn plan_uses_custom_comparer() {
        let log = vec![pending("ABC", 10, OperationType::Update, 1)];
        let batch = vec![server(ServerOperation::Updated, "abc", 5, Some(2))];
        let case_insensitive =
            |a: &RecordKey, b: &RecordKey| a.to_string().eq_ignore_ascii_case(&b.to_string());

        let plan = plan(&batch, &log, &id_of, &case_insensitive, &LastWriterWins);
        assert_eq!(plan.matched, 1);
        assert_eq!(plan.drain, vec![RecordKey::from("ABC"), RecordKey::from("abc")]);
        assert_eq!(plan.removals, vec![RecordKey::from("ABC")]);
        // Client entry is newer, so its value lands under the server's spelling.
        assert_eq!(
            plan.upserts,
            vec![LocalSnapshotRecord::new("abc".into(), json!({"id": "ABC", "n": 1}))]
        );
    }

    #[test]
    fn plan_later_envelope_for_same_key_wins() {
        let batch = vec![
            server(ServerOperation::Updated, "1", 1, Some(1)),
            server(ServerOperation::Deleted, "1", 2, None),
        ];
        let plan = plan(&batch, &[], &id_of, &exact, &ServerWins);
        assert_eq!(plan.drain, vec![RecordKey::from("1")]);
        assert!(plan.upserts.is_empty());
        assert_eq!(plan.removals, vec![RecordKey::from("1")]);
    }
}
