//! # Tether Engine
//!
//! The client half of an offline-first sync system.
//!
//! Applications keep working against a local store while disconnected. Every
//! mutation is recorded in an ordered, typed operation log (the *outbox*).
//! When connectivity returns the pending entries are shipped to an
//! authoritative resolver, and its answers are folded back into local state
//! through a pluggable conflict resolution policy.
//!
//! ## Core Concepts
//!
//! ### Registration
//!
//! Every entity type is registered once with an identity function
//! `T -> RecordKey` ([`TypeRegistration`]). The type name namespaces storage;
//! an optional partition string scopes it further (for example per tenant).
//!
//! ### Operation log and snapshot
//!
//! Two sets are kept per (type, partition):
//! - the **operation log**: one [`OperationLogEntry`] per successful
//!   Create/Update/Delete, kept until reconciliation drains it;
//! - the **snapshot**: the last materialized value per key, written by
//!   [`SyncClient::populate_cache`] and by reconciliation.
//!
//! The current value of a key is its newest log entry, else its snapshot
//! value. A Delete entry is a tombstone: while it is newest the key reads as
//! absent and cannot be created again.
//!
//! ### Serialized queue
//!
//! All store access runs through a single [`ProcessingQueue`], one unit of
//! work at a time in submission order.
//!
//! ### Reconciliation
//!
//! [`SyncClient::reconcile`] matches server outcomes ([`ServerSyncInfo`]) with
//! pending entries and asks a [`SyncReconciler`] for the winning value.
//! [`ServerWins`] is the default; [`LastWriterWins`] is also provided.
//!
//! ## Quick Start
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use tether_engine::{ClientConfig, OperationResult, SyncClient, TypeRegistration};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Task {
//!     id: String,
//!     done: bool,
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let client = SyncClient::new(ClientConfig::default());
//! client.initialize_in_memory().await.unwrap();
//! client
//!     .register(TypeRegistration::<Task>::new(|t| t.id.clone()))
//!     .await
//!     .unwrap();
//!
//! let task = Task { id: "t1".into(), done: false };
//! let outcome = client.create(&task, None).await.unwrap();
//! assert_eq!(outcome.operation, OperationResult::Create);
//!
//! // A second create for the same key is rejected, not an error.
//! let again = client.create(&task, None).await.unwrap();
//! assert!(!again.success);
//!
//! let latest: Option<Task> = client.get_latest("t1", None).await.unwrap();
//! assert_eq!(latest, Some(task));
//! # });
//! ```

pub mod client;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod error;
pub mod key;
pub mod merge;
pub mod oplog;
pub mod operation;
pub mod queue;
pub mod reconcile;
pub mod registry;
pub mod snapshot;
pub mod store;

// Re-export main types at crate root
pub use client::{StorageLocation, SyncClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ClientConfig, TombstonePolicy};
pub use envelope::{ClientSyncInfo, ServerOperation, ServerSyncInfo, SyncHistoryMode};
pub use error::{Error, QueueError, Result, StorageError};
pub use key::RecordKey;
pub use operation::{
    LocalSnapshotRecord, MutationOutcome, OperationLogEntry, OperationResult, OperationType,
};
pub use queue::ProcessingQueue;
pub use reconcile::{LastWriterWins, ReconcileSummary, ServerWins, SyncReconciler};
pub use registry::{KeyComparer, TypeRegistration, TypeRegistry};
pub use store::{LocalStore, MemoryStore, SqliteStore};

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Bound for types stored through the sync client.
pub trait Syncable: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static {}

impl<T> Syncable for T where T: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static {}
