//! Sync endpoint routes.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde_json::Value;
use tether_engine::{ClientSyncInfo, ServerSyncInfo};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::handle_sync;
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/api/sync/{collection}", post(sync_handler))
}

/// POST /api/sync/{collection} - Resolve client mutations.
async fn sync_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(collection): Path<String>,
    Json(batch): Json<Vec<ClientSyncInfo<Value>>>,
) -> Result<Json<Vec<ServerSyncInfo<Value>>>> {
    let outcomes = handle_sync(&state.resolver, &collection, batch).await?;
    Ok(Json(outcomes))
}
