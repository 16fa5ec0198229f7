//! SQLite store backend.
//!
//! The durable [`LocalStore`] used by `SyncClient::initialize`. One file
//! holds every registered type; rows are namespaced by type name and
//! partition. Bulk writes run inside a single transaction each.

use super::{EntryFilter, LocalStore, StoreResult};
use crate::{error::StorageError, LocalSnapshotRecord, OperationLogEntry, OperationType, RecordKey};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

const ENTRY_COLUMNS: &str =
    "seq, entry_id, type_name, partition, key_json, value, modified_at, operation";

/// SQLite-backed [`LocalStore`].
pub struct SqliteStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) a database file and bring its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let mut conn = Connection::open(path)?;
        migrate(&mut conn)?;
        tracing::debug!(path = %path.display(), "opened sqlite store");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        migrate(&mut conn)?;
        Ok(Self { conn, path: None })
    }

    /// Backing file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn query_entries(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<Vec<OperationLogEntry>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, read_entry_row)?;
        let entries = rows
            .map(|row| decode_entry(row?))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(entries)
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish()
    }
}

/// Initialize or migrate the database schema. Idempotent.
fn migrate(conn: &mut Connection) -> StoreResult<()> {
    // journal_mode reports the resulting mode as a row
    conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
    conn.execute_batch("PRAGMA synchronous = NORMAL")?;

    let current: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current >= SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    tx.execute_batch(
        r#"
        -- Pending local mutations, append only until reconciled
        CREATE TABLE IF NOT EXISTS oplog (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            entry_id TEXT NOT NULL UNIQUE,
            namespace TEXT NOT NULL,
            type_name TEXT NOT NULL,
            partition TEXT,
            record_key TEXT NOT NULL,         -- RecordKey::storage_key
            key_json TEXT NOT NULL,           -- serialized RecordKey
            value TEXT,                       -- JSON payload, NULL for tombstones
            modified_at INTEGER NOT NULL,     -- client clock, unix ms
            operation INTEGER NOT NULL        -- 0=create 1=update 2=delete
        );

        -- Last materialized value per key
        CREATE TABLE IF NOT EXISTS snapshot (
            namespace TEXT NOT NULL,
            record_key TEXT NOT NULL,
            key_json TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (namespace, record_key)
        );

        CREATE TABLE IF NOT EXISTS registered_types (
            type_name TEXT PRIMARY KEY,
            registered_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_oplog_namespace_order
            ON oplog(namespace, modified_at, seq);
        "#,
    )?;
    tx.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
    tx.commit()?;

    tracing::debug!(version = SCHEMA_VERSION, "sqlite schema migrated");
    Ok(())
}

struct EntryRow {
    seq: i64,
    entry_id: String,
    type_name: String,
    partition: Option<String>,
    key_json: String,
    value: Option<String>,
    modified_at: i64,
    operation: i64,
}

fn read_entry_row(row: &Row<'_>) -> rusqlite::Result<EntryRow> {
    Ok(EntryRow {
        seq: row.get(0)?,
        entry_id: row.get(1)?,
        type_name: row.get(2)?,
        partition: row.get(3)?,
        key_json: row.get(4)?,
        value: row.get(5)?,
        modified_at: row.get(6)?,
        operation: row.get(7)?,
    })
}

fn decode_entry(row: EntryRow) -> StoreResult<OperationLogEntry> {
    let operation = OperationType::from_code(row.operation).ok_or_else(|| {
        StorageError::InvalidData(format!("unknown operation code {}", row.operation))
    })?;
    let value = row.value.as_deref().map(decode_json).transpose()?;

    Ok(OperationLogEntry {
        entry_id: row.entry_id,
        sequence: u64::try_from(row.seq)
            .map_err(|_| StorageError::InvalidData(format!("negative sequence {}", row.seq)))?,
        key: decode_json(&row.key_json)?,
        partition: row.partition,
        type_name: row.type_name,
        value,
        modified_timestamp: row.modified_at,
        operation,
    })
}

fn decode_json<T: serde::de::DeserializeOwned>(text: &str) -> StoreResult<T> {
    serde_json::from_str(text).map_err(|err| StorageError::InvalidData(err.to_string()))
}

fn encode_json<T: serde::Serialize>(value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|err| StorageError::InvalidData(err.to_string()))
}

/// Index name derived from a type name: identifier characters only.
fn index_name(type_name: &str) -> String {
    let sanitized: String = type_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("idx_oplog_type_{}", sanitized)
}

impl LocalStore for SqliteStore {
    fn ensure_type(&mut self, type_name: &str) -> StoreResult<()> {
        let literal = type_name.replace('\'', "''");
        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS \"{}\" ON oplog(namespace, record_key, modified_at, seq) \
             WHERE type_name = '{}'",
            index_name(type_name),
            literal
        ))?;
        tx.execute(
            "INSERT OR IGNORE INTO registered_types (type_name, registered_at) \
             VALUES (?1, CAST(strftime('%s', 'now') AS INTEGER) * 1000)",
            params![type_name],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn append_entry(&mut self, namespace: &str, entry: &OperationLogEntry) -> StoreResult<u64> {
        let value = entry.value.as_ref().map(encode_json).transpose()?;
        self.conn.execute(
            "INSERT INTO oplog (entry_id, namespace, type_name, partition, record_key, key_json, \
             value, modified_at, operation) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.entry_id,
                namespace,
                entry.type_name,
                entry.partition,
                entry.key.storage_key(),
                encode_json(&entry.key)?,
                value,
                entry.modified_timestamp,
                entry.operation.code(),
            ],
        )?;
        let seq = self.conn.last_insert_rowid();
        u64::try_from(seq).map_err(|_| StorageError::InvalidData(format!("negative sequence {}", seq)))
    }

    fn latest_entry(
        &mut self,
        namespace: &str,
        key: &RecordKey,
    ) -> StoreResult<Option<OperationLogEntry>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM oplog WHERE namespace = ?1 AND record_key = ?2 \
                     ORDER BY modified_at DESC, seq DESC LIMIT 1",
                    ENTRY_COLUMNS
                ),
                params![namespace, key.storage_key()],
                read_entry_row,
            )
            .optional()?;
        row.map(decode_entry).transpose()
    }

    fn key_history(
        &mut self,
        namespace: &str,
        key: &RecordKey,
    ) -> StoreResult<Vec<OperationLogEntry>> {
        self.query_entries(
            &format!(
                "SELECT {} FROM oplog WHERE namespace = ?1 AND record_key = ?2 \
                 ORDER BY modified_at ASC, seq ASC",
                ENTRY_COLUMNS
            ),
            params![namespace, key.storage_key()],
        )
    }

    fn entries(&mut self, namespace: &str) -> StoreResult<Vec<OperationLogEntry>> {
        self.query_entries(
            &format!(
                "SELECT {} FROM oplog WHERE namespace = ?1 ORDER BY modified_at ASC, seq ASC",
                ENTRY_COLUMNS
            ),
            params![namespace],
        )
    }

    fn delete_entries(&mut self, namespace: &str, filter: EntryFilter<'_>) -> StoreResult<usize> {
        match filter {
            EntryFilter::All => Ok(self
                .conn
                .execute("DELETE FROM oplog WHERE namespace = ?1", params![namespace])?),
            EntryFilter::Keys(keys) => {
                let tx = self.conn.transaction()?;
                let mut removed = 0;
                {
                    let mut stmt =
                        tx.prepare("DELETE FROM oplog WHERE namespace = ?1 AND record_key = ?2")?;
                    for key in keys {
                        removed += stmt.execute(params![namespace, key.storage_key()])?;
                    }
                }
                tx.commit()?;
                Ok(removed)
            }
            EntryFilter::KeyAt { key, modified_at } => Ok(self.conn.execute(
                "DELETE FROM oplog WHERE namespace = ?1 AND record_key = ?2 AND modified_at = ?3",
                params![namespace, key.storage_key(), modified_at],
            )?),
        }
    }

    fn snapshot_get(
        &mut self,
        namespace: &str,
        key: &RecordKey,
    ) -> StoreResult<Option<serde_json::Value>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM snapshot WHERE namespace = ?1 AND record_key = ?2",
                params![namespace, key.storage_key()],
                |row| row.get(0),
            )
            .optional()?;
        value.as_deref().map(decode_json).transpose()
    }

    fn snapshot_all(&mut self, namespace: &str) -> StoreResult<Vec<LocalSnapshotRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key_json, value FROM snapshot WHERE namespace = ?1 ORDER BY record_key")?;
        let rows = stmt.query_map(params![namespace], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let records = rows
            .map(|row| {
                let (key_json, value) = row?;
                Ok(LocalSnapshotRecord::new(
                    decode_json(&key_json)?,
                    decode_json(&value)?,
                ))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(records)
    }

    fn snapshot_replace(
        &mut self,
        namespace: &str,
        records: &[LocalSnapshotRecord],
    ) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM snapshot WHERE namespace = ?1", params![namespace])?;
        insert_snapshots(&tx, namespace, records)?;
        tx.commit()?;
        Ok(())
    }

    fn snapshot_upsert_many(
        &mut self,
        namespace: &str,
        records: &[LocalSnapshotRecord],
    ) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        insert_snapshots(&tx, namespace, records)?;
        tx.commit()?;
        Ok(())
    }

    fn snapshot_delete_many(&mut self, namespace: &str, keys: &[RecordKey]) -> StoreResult<usize> {
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt =
                tx.prepare("DELETE FROM snapshot WHERE namespace = ?1 AND record_key = ?2")?;
            for key in keys {
                removed += stmt.execute(params![namespace, key.storage_key()])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }
}

fn insert_snapshots(
    conn: &Connection,
    namespace: &str,
    records: &[LocalSnapshotRecord],
) -> StoreResult<()> {
    let mut stmt = conn.prepare(
        "INSERT OR REPLACE INTO snapshot (namespace, record_key, key_json, value) \
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for record in records {
        stmt.execute(params![
            namespace,
            record.key.storage_key(),
            encode_json(&record.key)?,
            encode_json(&record.value)?,
        ])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;
    use serde_json::json;

    #[test]
    fn append_and_scan() {
        contract::append_and_scan(&mut SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn equal_timestamps_fall_back_to_append_order() {
        contract::equal_timestamps_fall_back_to_append_order(
            &mut SqliteStore::open_in_memory().unwrap(),
        );
    }

    #[test]
    fn delete_by_filter() {
        contract::delete_by_filter(&mut SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn snapshot_operations() {
        contract::snapshot_operations(&mut SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn keys_of_different_kinds_do_not_collide() {
        contract::keys_of_different_kinds_do_not_collide(
            &mut SqliteStore::open_in_memory().unwrap(),
        );
    }

    #[test]
    fn index_names_are_sanitized() {
        assert_eq!(index_name("Note"), "idx_oplog_type_Note");
        assert_eq!(index_name("blog post's"), "idx_oplog_type_blog_post_s");
    }

    #[test]
    fn ensure_type_is_idempotent_and_creates_index() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.ensure_type("Note").unwrap();
        store.ensure_type("Note").unwrap();
        store.ensure_type("it's odd").unwrap();

        let indexes: i64 = store
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_oplog_type_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(indexes, 2);

        let types: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM registered_types", [], |row| row.get(0))
            .unwrap();
        assert_eq!(types, 2);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        {
            let mut store = SqliteStore::open(&path).unwrap();
            store
                .append_entry(
                    "Note",
                    &OperationLogEntry::new(
                        "a".into(),
                        None,
                        "Note",
                        Some(json!({"id": "a"})),
                        5,
                        OperationType::Create,
                    ),
                )
                .unwrap();
            store
                .snapshot_upsert_many("Note", &[LocalSnapshotRecord::new("b".into(), json!(1))])
                .unwrap();
        }

        let mut store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        let entry = store.latest_entry("Note", &"a".into()).unwrap().unwrap();
        assert_eq!(entry.value, Some(json!({"id": "a"})));
        assert_eq!(store.snapshot_get("Note", &"b".into()).unwrap(), Some(json!(1)));
    }
}
