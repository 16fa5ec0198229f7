//! Error types for the Tether engine.
//!
//! A rejected mutation (create on an existing key, update of a missing key)
//! is not an error: it is reported as a [`MutationOutcome`](crate::MutationOutcome)
//! with `success == false`. Everything in here means the call itself failed.

use thiserror::Error;

/// All possible errors from the Tether engine.
#[derive(Debug, Error)]
pub enum Error {
    // Lifecycle errors
    #[error("client not initialized yet: call initialize before registering or mutating")]
    NotInitialized,

    #[error("type not registered: {0}")]
    TypeNotRegistered(&'static str),

    // Caller misuse
    #[error("invalid identity for '{type_name}': {reason}")]
    InvalidIdentity { type_name: String, reason: String },

    #[error("invalid type name '{type_name}': {reason}")]
    InvalidTypeName { type_name: String, reason: String },

    // Queue errors
    #[error(transparent)]
    Queue(#[from] QueueError),

    // Underlying store errors
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Failures of the serialized task queue itself.
///
/// `Closed` and `Cancelled` raised before dispatch mean the unit of work never
/// ran. `Panicked` means it ran and blew up; the queue keeps going.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("unable to queue task: processing queue is closed")]
    Closed,

    #[error("the queued task was cancelled")]
    Cancelled,

    #[error("queued task panicked: {0}")]
    Panicked(String),
}

/// Errors raised by an embedded store backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage handle has been released")]
    Released,

    #[error("invalid data in storage: {0}")]
    InvalidData(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
