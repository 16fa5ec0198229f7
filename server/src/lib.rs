//! Tether Server - authoritative side of Tether sync.
//!
//! Clients post the pending changes of one collection to
//! `POST /api/sync/{collection}` and get back one authoritative outcome per
//! change, which they feed into their reconcile step.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod resolver;
pub mod routes;
pub mod store;

use crate::config::Config;
use crate::resolver::{BatchResolver, IdentityFields};
use crate::store::{AuthoritativeStore, MemoryDocumentStore};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Which authoritative store is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl StorageBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageBackend::Memory => "memory",
            StorageBackend::Postgres => "postgres",
        }
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<BatchResolver>,
    pub config: Arc<Config>,
    pub storage: StorageBackend,
}

impl AppState {
    /// State over an explicit store.
    pub fn new(config: Config, store: Arc<dyn AuthoritativeStore>, storage: StorageBackend) -> Self {
        let fields = IdentityFields {
            id_field: config.id_field.clone(),
            partition_field: config.partition_field.clone(),
        };
        Self {
            resolver: Arc::new(BatchResolver::new(store, fields)),
            config: Arc::new(config),
            storage,
        }
    }

    /// State backed by PostgreSQL when `database_url` is set, else memory.
    pub async fn from_config(config: Config) -> error::Result<Self> {
        match config.database_url.as_deref() {
            Some(url) => {
                let pool = db::create_pool(url).await?;
                tracing::info!("Running database migrations...");
                db::run_migrations(&pool).await?;
                let store = Arc::new(db::PgDocumentStore::new(pool));
                Ok(Self::new(config, store, StorageBackend::Postgres))
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory document store");
                Ok(Self::new(
                    config,
                    Arc::new(MemoryDocumentStore::new()),
                    StorageBackend::Memory,
                ))
            }
        }
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
