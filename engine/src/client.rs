//! Sync facade.
//!
//! [`SyncClient`] is the public surface of the engine. Every call that touches
//! the local store is funneled through one [`ProcessingQueue`], so the store
//! sees exactly one writer no matter how many tasks share the client.
//!
//! ```rust,no_run
//! use serde::{Deserialize, Serialize};
//! use tether_engine::{ClientConfig, SyncClient, TypeRegistration};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Note {
//!     id: String,
//!     body: String,
//! }
//!
//! # async fn demo() -> tether_engine::Result<()> {
//! let client = SyncClient::new(ClientConfig::default());
//! client.initialize("./data", None, false).await?;
//! client.register(TypeRegistration::<Note>::new(|n| n.id.clone())).await?;
//!
//! let note = Note { id: "n1".into(), body: "hello".into() };
//! let outcome = client.create(&note, None).await?;
//! assert!(outcome.success);
//!
//! // Ship these to the server, then feed its answer to `reconcile`.
//! let outbound = client.pending_changes::<Note>(None).await?;
//! # let _ = outbound;
//! # Ok(())
//! # }
//! ```

use crate::{
    config::ClientConfig,
    error::{Result, StorageError},
    merge::{self, Liveness, MutationKind},
    oplog::OperationLog,
    queue::ProcessingQueue,
    reconcile::{self, ReconcileSummary},
    registry::{TypeRegistration, TypeRegistry},
    snapshot::SnapshotSet,
    store::{LocalStore, MemoryStore, SqliteStore},
    ClientSyncInfo, Error, LocalSnapshotRecord, MutationOutcome, OperationLogEntry, OperationType,
    RecordKey, ServerSyncInfo, Syncable, SyncHistoryMode, Timestamp,
};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Where the open store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    File(PathBuf),
    Memory,
}

enum StoreSlot {
    Uninitialized,
    Open {
        store: Box<dyn LocalStore>,
        location: StorageLocation,
    },
    /// After shutdown. In-memory stores are kept so startup can resume them.
    Released {
        location: StorageLocation,
        retained: Option<Box<dyn LocalStore>>,
    },
}

struct Inner {
    config: ClientConfig,
    registry: TypeRegistry,
    queue: ProcessingQueue,
    slot: Arc<Mutex<StoreSlot>>,
}

/// The offline-first sync client.
///
/// Cheap to clone; clones share the store, registry and queue.
#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<Inner>,
    cancel: Option<CancellationToken>,
}

impl SyncClient {
    /// Create a client. Must be called from within a Tokio runtime.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry: TypeRegistry::new(),
                queue: ProcessingQueue::new(),
                slot: Arc::new(Mutex::new(StoreSlot::Uninitialized)),
            }),
            cancel: None,
        }
    }

    /// A handle whose queued calls observe `token`.
    ///
    /// Cancelling the token fails pending calls made through this handle with
    /// [`QueueError::Cancelled`](crate::QueueError::Cancelled); other handles
    /// and work that already started are unaffected.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            cancel: Some(token),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // Lifecycle

    /// Open the file-backed store in `directory`.
    ///
    /// `file_name` defaults to the configured cache file name. With
    /// `delete_existing` any previous database file is removed first.
    /// Returns the database path.
    pub async fn initialize(
        &self,
        directory: impl AsRef<Path>,
        file_name: Option<&str>,
        delete_existing: bool,
    ) -> Result<PathBuf> {
        let path = directory
            .as_ref()
            .join(file_name.unwrap_or(self.inner.config.cache_file_name.as_str()));
        let types = self.inner.registry.type_names();
        let slot = Arc::clone(&self.inner.slot);
        let opened = path.clone();

        self.inner
            .queue
            .enqueue_blocking(
                move || -> Result<()> {
                    if let Some(parent) = opened.parent() {
                        std::fs::create_dir_all(parent).map_err(StorageError::from)?;
                    }
                    if delete_existing {
                        remove_database_files(&opened)?;
                    }
                    let store = SqliteStore::open(&opened)?;
                    install(&slot, Box::new(store), StorageLocation::File(opened), &types)
                },
                self.cancel.as_ref(),
            )
            .await??;

        tracing::info!(path = %path.display(), delete_existing, "sync client initialized");
        Ok(path)
    }

    /// Open a store that lives only in memory.
    pub async fn initialize_in_memory(&self) -> Result<()> {
        let types = self.inner.registry.type_names();
        let slot = Arc::clone(&self.inner.slot);

        self.inner
            .queue
            .enqueue_blocking(
                move || install(&slot, Box::new(MemoryStore::new()), StorageLocation::Memory, &types),
                self.cancel.as_ref(),
            )
            .await??;

        tracing::info!("sync client initialized in memory");
        Ok(())
    }

    /// Release the store handle. Calls made afterwards fail until `startup`.
    pub async fn shutdown(&self) -> Result<()> {
        let slot = Arc::clone(&self.inner.slot);
        self.inner
            .queue
            .enqueue_blocking(
                move || -> Result<()> {
                    let mut slot = lock_slot(&slot);
                    let current = std::mem::replace(&mut *slot, StoreSlot::Uninitialized);
                    *slot = match current {
                        StoreSlot::Open { store, location } => {
                            let retained = (location == StorageLocation::Memory).then_some(store);
                            StoreSlot::Released { location, retained }
                        }
                        StoreSlot::Uninitialized => return Err(Error::NotInitialized),
                        released => released,
                    };
                    Ok(())
                },
                self.cancel.as_ref(),
            )
            .await??;

        tracing::info!("sync client shut down");
        Ok(())
    }

    /// Reopen the store released by `shutdown`.
    pub async fn startup(&self) -> Result<()> {
        let slot = Arc::clone(&self.inner.slot);
        self.inner
            .queue
            .enqueue_blocking(
                move || -> Result<()> {
                    let mut slot = lock_slot(&slot);
                    let reopened = match &mut *slot {
                        StoreSlot::Released { location, retained } => {
                            let store: Box<dyn LocalStore> = match (retained.take(), &*location) {
                                (Some(store), _) => store,
                                (None, StorageLocation::File(path)) => Box::new(SqliteStore::open(path)?),
                                (None, StorageLocation::Memory) => Box::new(MemoryStore::new()),
                            };
                            StoreSlot::Open {
                                store,
                                location: location.clone(),
                            }
                        }
                        StoreSlot::Uninitialized => return Err(Error::NotInitialized),
                        StoreSlot::Open { .. } => return Ok(()),
                    };
                    *slot = reopened;
                    Ok(())
                },
                self.cancel.as_ref(),
            )
            .await??;

        tracing::info!("sync client started");
        Ok(())
    }

    /// Location of the open store, `None` when not open.
    pub fn storage_location(&self) -> Option<StorageLocation> {
        match &*lock_slot(&self.inner.slot) {
            StoreSlot::Open { location, .. } => Some(location.clone()),
            _ => None,
        }
    }

    /// Register an entity type.
    ///
    /// Fails with [`Error::NotInitialized`] before the store is open, and
    /// with [`Error::InvalidTypeName`] when the type name is empty or contains
    /// the partition separator. Registering a type again replaces its registration.
    pub async fn register<T: Syncable>(&self, registration: TypeRegistration<T>) -> Result<()> {
        registration.check_type_name(&self.inner.config.partition_separator)?;
        let type_name = registration.type_name().to_string();
        self.run(move |store| Ok(store.ensure_type(&type_name)?))
            .await?;

        tracing::debug!(type_name = registration.type_name(), "registered type");
        self.inner.registry.insert(registration);
        Ok(())
    }

    /// Whether `T` is registered.
    pub fn is_registered<T: Syncable>(&self) -> bool {
        self.inner.registry.contains::<T>()
    }

    // Mutations

    /// Record a create. Rejected when the key is live or tombstoned.
    pub async fn create<T: Syncable>(&self, value: &T, partition: Option<&str>) -> Result<MutationOutcome> {
        self.mutate(MutationKind::Create, value, partition).await
    }

    /// Record an update. Requires a live record.
    pub async fn update<T: Syncable>(&self, value: &T, partition: Option<&str>) -> Result<MutationOutcome> {
        self.mutate(MutationKind::Update, value, partition).await
    }

    /// Record a delete (tombstone). Requires a live record.
    pub async fn delete<T: Syncable>(&self, value: &T, partition: Option<&str>) -> Result<MutationOutcome> {
        self.mutate(MutationKind::Delete, value, partition).await
    }

    /// Update when live, create when unknown; a tombstoned key follows the
    /// configured [`TombstonePolicy`](crate::TombstonePolicy).
    pub async fn upsert<T: Syncable>(&self, value: &T, partition: Option<&str>) -> Result<MutationOutcome> {
        self.mutate(MutationKind::Upsert, value, partition).await
    }

    async fn mutate<T: Syncable>(
        &self,
        kind: MutationKind,
        value: &T,
        partition: Option<&str>,
    ) -> Result<MutationOutcome> {
        let registration = self.registration::<T>()?;
        let key = registration.key_of(value)?;
        let payload = serde_json::to_value(value)?;
        let namespace = self.namespace(&registration, partition);
        let type_name = registration.type_name().to_string();
        let partition = partition.map(str::to_string);
        let policy = self.inner.config.tombstone_policy;
        let clock = Arc::clone(&self.inner.config.clock);

        self.run(move |store| {
            let latest = OperationLog::new(store, &namespace).latest(&key)?;
            let in_snapshot = latest.is_none() && SnapshotSet::new(store, &namespace).contains(&key)?;
            let liveness = Liveness::of(latest.as_ref(), in_snapshot);

            let Some(operation) = merge::transition(kind, liveness, policy) else {
                tracing::debug!(
                    type_name = %type_name,
                    key = %key,
                    ?kind,
                    ?liveness,
                    "mutation rejected"
                );
                return Ok(MutationOutcome::rejected());
            };

            let entry = OperationLogEntry::new(
                key,
                partition.as_deref(),
                type_name,
                Some(payload),
                clock.now_millis(),
                operation,
            );
            OperationLog::new(store, &namespace).append(entry)?;
            Ok(MutationOutcome::applied(operation))
        })
        .await
    }

    /// Drop every pending entry for the value's key. Returns how many.
    pub async fn discard_pending<T: Syncable>(&self, value: &T, partition: Option<&str>) -> Result<usize> {
        let registration = self.registration::<T>()?;
        let key = registration.key_of(value)?;
        let namespace = self.namespace(&registration, partition);

        self.run(move |store| OperationLog::new(store, &namespace).drain(&[key]))
            .await
    }

    /// Drop the pending entries of the value's key stamped at `modified_at`.
    pub async fn discard_pending_at<T: Syncable>(
        &self,
        value: &T,
        modified_at: Timestamp,
        partition: Option<&str>,
    ) -> Result<usize> {
        let registration = self.registration::<T>()?;
        let key = registration.key_of(value)?;
        let namespace = self.namespace(&registration, partition);

        self.run(move |store| OperationLog::new(store, &namespace).drain_at(&key, modified_at))
            .await
    }

    /// Replace the key's pending history with a single fresh create.
    pub async fn replace_pending<T: Syncable>(&self, value: &T, partition: Option<&str>) -> Result<MutationOutcome> {
        let registration = self.registration::<T>()?;
        let key = registration.key_of(value)?;
        let payload = serde_json::to_value(value)?;
        let namespace = self.namespace(&registration, partition);
        let type_name = registration.type_name().to_string();
        let partition = partition.map(str::to_string);
        let clock = Arc::clone(&self.inner.config.clock);

        self.run(move |store| {
            let mut log = OperationLog::new(store, &namespace);
            log.drain(std::slice::from_ref(&key))?;
            log.append(OperationLogEntry::new(
                key,
                partition.as_deref(),
                type_name,
                Some(payload),
                clock.now_millis(),
                OperationType::Create,
            ))?;
            Ok(MutationOutcome::applied(OperationType::Create))
        })
        .await
    }

    // Reads

    /// Current value of a key: newest log entry, else the snapshot.
    pub async fn get_latest<T: Syncable>(
        &self,
        key: impl Into<RecordKey>,
        partition: Option<&str>,
    ) -> Result<Option<T>> {
        let registration = self.registration::<T>()?;
        let key = key.into();
        registration.check_key(&key)?;
        let namespace = self.namespace(&registration, partition);

        let value = self
            .run(move |store| {
                let latest = OperationLog::new(store, &namespace).latest(&key)?;
                match latest {
                    Some(entry) if entry.is_tombstone() => Ok(None),
                    Some(entry) => Ok(entry.value),
                    None => SnapshotSet::new(store, &namespace).get(&key),
                }
            })
            .await?;

        decode_optional(value)
    }

    /// [`get_latest`](Self::get_latest) keyed by an example value.
    pub async fn get_latest_for<T: Syncable>(&self, value: &T, partition: Option<&str>) -> Result<Option<T>> {
        let key = self.registration::<T>()?.key_of(value)?;
        self.get_latest(key, partition).await
    }

    /// Snapshot value of a key, ignoring pending entries.
    pub async fn get_cached<T: Syncable>(
        &self,
        key: impl Into<RecordKey>,
        partition: Option<&str>,
    ) -> Result<Option<T>> {
        let registration = self.registration::<T>()?;
        let key = key.into();
        registration.check_key(&key)?;
        let namespace = self.namespace(&registration, partition);

        let value = self
            .run(move |store| SnapshotSet::new(store, &namespace).get(&key))
            .await?;
        decode_optional(value)
    }

    /// Every live value: the snapshot overlaid with the pending log.
    pub async fn get_all_latest<T: Syncable>(&self, partition: Option<&str>) -> Result<Vec<T>> {
        let registration = self.registration::<T>()?;
        let namespace = self.namespace(&registration, partition);

        let merged = self
            .run(move |store| {
                let snapshot = SnapshotSet::new(store, &namespace).all()?;
                let entries = OperationLog::new(store, &namespace).all()?;
                Ok(merge::overlay(snapshot, entries))
            })
            .await?;

        merged
            .into_iter()
            .map(|record| serde_json::from_value(record.value).map_err(Error::from))
            .collect()
    }

    /// Pending log entries.
    ///
    /// | key | mode | result |
    /// |---|---|---|
    /// | `None` | `Latest` | newest entry per key |
    /// | `None` | `FullHistory` | every entry, oldest first |
    /// | `Some` | `Latest` | the key's newest entry |
    /// | `Some` | `FullHistory` | the key's entries, oldest first |
    pub async fn get_sync_history<T: Syncable>(
        &self,
        key: Option<RecordKey>,
        mode: SyncHistoryMode,
        partition: Option<&str>,
    ) -> Result<Vec<OperationLogEntry<T>>> {
        let registration = self.registration::<T>()?;
        if let Some(key) = &key {
            registration.check_key(key)?;
        }
        let namespace = self.namespace(&registration, partition);

        let entries = self
            .run(move |store| {
                let mut log = OperationLog::new(store, &namespace);
                match (key, mode) {
                    (None, SyncHistoryMode::Latest) => log.latest_per_key(),
                    (None, SyncHistoryMode::FullHistory) => log.all(),
                    (Some(key), SyncHistoryMode::Latest) => {
                        Ok(log.latest(&key)?.into_iter().collect())
                    }
                    (Some(key), SyncHistoryMode::FullHistory) => log.history(&key),
                }
            })
            .await?;

        entries.into_iter().map(|entry| entry.decode::<T>()).collect()
    }

    /// Raw newest pending entry per key.
    pub async fn get_all_latest_sync_queue<T: Syncable>(
        &self,
        partition: Option<&str>,
    ) -> Result<Vec<OperationLogEntry<T>>> {
        self.get_sync_history(None, SyncHistoryMode::Latest, partition)
            .await
    }

    /// Outbound envelopes for the newest pending change of every key.
    pub async fn pending_changes<T: Syncable>(&self, partition: Option<&str>) -> Result<Vec<ClientSyncInfo<T>>> {
        Ok(self
            .get_all_latest_sync_queue::<T>(partition)
            .await?
            .into_iter()
            .map(ClientSyncInfo::from)
            .collect())
    }

    // Bulk

    /// Replace the snapshot set with `items`; optionally drop pending entries.
    pub async fn populate_cache<T: Syncable>(
        &self,
        items: &[T],
        partition: Option<&str>,
        drain_log: bool,
    ) -> Result<()> {
        let registration = self.registration::<T>()?;
        let namespace = self.namespace(&registration, partition);
        let records = items
            .iter()
            .map(|item| -> Result<LocalSnapshotRecord> {
                Ok(LocalSnapshotRecord::new(
                    registration.key_of(item)?,
                    serde_json::to_value(item)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        let count = records.len();

        let drained = self
            .run(move |store| {
                SnapshotSet::new(store, &namespace).replace_all(&records)?;
                if drain_log {
                    OperationLog::new(store, &namespace).drain_all()
                } else {
                    Ok(0)
                }
            })
            .await?;

        tracing::info!(
            type_name = registration.type_name(),
            count,
            drained,
            "populated cache"
        );
        Ok(())
    }

    /// Fold a batch of server outcomes into local state.
    ///
    /// Drains the log for every key in the batch, then writes the values
    /// chosen by the configured reconciler into the snapshot. Not atomic
    /// across the batch; re-running with the same batch is safe.
    pub async fn reconcile<T: Syncable>(
        &self,
        batch: Vec<ServerSyncInfo<T>>,
        partition: Option<&str>,
    ) -> Result<ReconcileSummary> {
        let registration = self.registration::<T>()?;
        let namespace = self.namespace(&registration, partition);
        let batch = batch
            .into_iter()
            .map(|info| info.try_map(serde_json::to_value))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let reconciler = Arc::clone(&self.inner.config.reconciler);
        let type_name = registration.type_name().to_string();

        let summary = self
            .run_staged(move |slot| {
                let pending =
                    with_store(slot, |store| OperationLog::new(store, &namespace).latest_per_key())?;

                let key_of = |value: &Value| {
                    serde_json::from_value::<T>(value.clone())
                        .ok()
                        .and_then(|typed| registration.key_of(&typed).ok())
                };
                let keys_equal = |a: &RecordKey, b: &RecordKey| registration.keys_equal(a, b);
                let plan = reconcile::plan(&batch, &pending, &key_of, &keys_equal, reconciler.as_ref());

                let (drained, removed) = with_store(slot, |store| {
                    let drained = OperationLog::new(store, &namespace).drain(&plan.drain)?;
                    let mut snapshot = SnapshotSet::new(store, &namespace);
                    let removed = snapshot.remove_many(&plan.removals)?;
                    snapshot.upsert_many(&plan.upserts)?;
                    Ok((drained, removed))
                })?;

                Ok(ReconcileSummary {
                    received: batch.len(),
                    matched: plan.matched,
                    drained,
                    upserted: plan.upserts.len(),
                    removed,
                })
            })
            .await?;

        tracing::info!(type_name = %type_name, %summary, "reconciled server batch");
        Ok(summary)
    }

    // Internals

    fn registration<T: Syncable>(&self) -> Result<Arc<TypeRegistration<T>>> {
        self.inner.registry.get::<T>()
    }

    fn namespace<T>(&self, registration: &TypeRegistration<T>, partition: Option<&str>) -> String {
        registration.namespace(partition, &self.inner.config.partition_separator)
    }

    /// Run `work` against the open store as one queued unit.
    async fn run<R, F>(&self, work: F) -> Result<R>
    where
        F: FnOnce(&mut dyn LocalStore) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.run_staged(move |slot| with_store(slot, work)).await
    }

    /// Run `work` as one queued unit that takes the store lock per step.
    ///
    /// Used where caller-supplied code runs between store steps, so that code
    /// never executes while the slot is locked.
    async fn run_staged<R, F>(&self, work: F) -> Result<R>
    where
        F: FnOnce(&Mutex<StoreSlot>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let slot = Arc::clone(&self.inner.slot);
        self.inner
            .queue
            .enqueue_blocking(move || work(&slot), self.cancel.as_ref())
            .await?
    }
}

impl fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncClient")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .field("location", &self.storage_location())
            .finish()
    }
}

fn install(
    slot: &Mutex<StoreSlot>,
    mut store: Box<dyn LocalStore>,
    location: StorageLocation,
    types: &[String],
) -> Result<()> {
    for type_name in types {
        store.ensure_type(type_name)?;
    }
    let mut slot = lock_slot(&slot);
    *slot = StoreSlot::Open { store, location };
    Ok(())
}

/// Lock the store slot.
///
/// A panic inside a queued unit only reaches the slot between store calls,
/// and every bulk store step is its own transaction, so the slot is still
/// consistent after poisoning.
fn lock_slot(slot: &Mutex<StoreSlot>) -> MutexGuard<'_, StoreSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run one store step with the slot locked.
fn with_store<R>(
    slot: &Mutex<StoreSlot>,
    work: impl FnOnce(&mut dyn LocalStore) -> Result<R>,
) -> Result<R> {
    let mut slot = lock_slot(slot);
    match &mut *slot {
        StoreSlot::Open { store, .. } => work(&mut **store),
        StoreSlot::Released { .. } => Err(StorageError::Released.into()),
        StoreSlot::Uninitialized => Err(Error::NotInitialized),
    }
}

fn remove_database_files(path: &Path) -> Result<()> {
    let mut candidates = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut name = path.as_os_str().to_os_string();
        name.push(suffix);
        candidates.push(PathBuf::from(name));
    }

    for candidate in candidates {
        match std::fs::remove_file(&candidate) {
            Ok(()) => tracing::debug!(path = %candidate.display(), "removed existing database file"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(StorageError::from(err).into()),
        }
    }
    Ok(())
}

fn decode_optional<T: Syncable>(value: Option<Value>) -> Result<Option<T>> {
    Ok(value.map(serde_json::from_value).transpose()?)
}
