//! Sync handler - resolves a batch of client mutations.

use crate::error::{AppError, Result};
use crate::resolver::BatchResolver;
use serde_json::Value;
use tether_engine::{ClientSyncInfo, ServerSyncInfo};

/// Resolve a client batch for one collection.
///
/// A batch that produces no outcomes is rejected.
pub async fn handle_sync(
    resolver: &BatchResolver,
    collection: &str,
    batch: Vec<ClientSyncInfo<Value>>,
) -> Result<Vec<ServerSyncInfo<Value>>> {
    if collection.trim().is_empty() {
        return Err(AppError::BadRequest("collection name is required".to_string()));
    }

    let received = batch.len();
    let outcomes = resolver.resolve(collection, batch).await?;

    if outcomes.is_empty() {
        return Err(AppError::BadRequest("nothing to sync".to_string()));
    }

    tracing::info!(collection, received, "sync batch resolved");
    Ok(outcomes)
}
