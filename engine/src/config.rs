//! Client configuration.

use crate::{
    clock::{Clock, SystemClock},
    reconcile::{ServerWins, SyncReconciler},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default separator between type name and partition in namespaces.
pub const DEFAULT_PARTITION_SEPARATOR: &str = "::";

/// Default cache file name inside the storage directory.
pub const DEFAULT_CACHE_FILE_NAME: &str = "tether_cache.db";

/// What `upsert` does with a key whose newest entry is a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TombstonePolicy {
    /// Report `(false, NoOperation)`
    #[default]
    Reject,
    /// Record a fresh create for the key
    Resurrect,
}

/// Configuration of a [`SyncClient`](crate::SyncClient).
#[derive(Clone)]
pub struct ClientConfig {
    pub partition_separator: String,
    pub cache_file_name: String,
    pub tombstone_policy: TombstonePolicy,
    pub reconciler: Arc<dyn SyncReconciler>,
    pub clock: Arc<dyn Clock>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            partition_separator: DEFAULT_PARTITION_SEPARATOR.to_string(),
            cache_file_name: DEFAULT_CACHE_FILE_NAME.to_string(),
            tombstone_policy: TombstonePolicy::default(),
            reconciler: Arc::new(ServerWins),
            clock: Arc::new(SystemClock),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_partition_separator(mut self, separator: impl Into<String>) -> Self {
        self.partition_separator = separator.into();
        self
    }

    pub fn with_cache_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.cache_file_name = file_name.into();
        self
    }

    pub fn with_tombstone_policy(mut self, policy: TombstonePolicy) -> Self {
        self.tombstone_policy = policy;
        self
    }

    /// Replace the conflict resolution policy.
    pub fn with_reconciler(mut self, reconciler: impl SyncReconciler + 'static) -> Self {
        self.reconciler = Arc::new(reconciler);
        self
    }

    /// Replace the clock used to stamp log entries.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("partition_separator", &self.partition_separator)
            .field("cache_file_name", &self.cache_file_name)
            .field("tombstone_policy", &self.tombstone_policy)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
