//! PostgreSQL-backed authoritative store.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tether_engine::{Clock, SystemClock, Timestamp};

use crate::error::Result;
use crate::store::{AuthoritativeStore, DocumentRef, StoredDocument};

/// Documents in the `documents` table.
pub struct PgDocumentStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

#[async_trait]
impl AuthoritativeStore for PgDocumentStore {
    async fn get_with_meta(&self, doc: DocumentRef<'_>) -> Result<Option<StoredDocument>> {
        let row = sqlx::query(
            r#"
            SELECT payload, modified_at
            FROM documents
            WHERE collection = $1 AND partition_key = $2 AND record_key = $3
            "#,
        )
        .bind(doc.collection)
        .bind(doc.partition_key)
        .bind(doc.record_key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(StoredDocument {
                value: row.try_get::<Value, _>("payload")?,
                modified_at: row.try_get("modified_at")?,
            })),
            None => Ok(None),
        }
    }

    async fn upsert(&self, doc: DocumentRef<'_>, value: &Value) -> Result<Timestamp> {
        let modified_at = self.clock.now_millis();
        sqlx::query(
            r#"
            INSERT INTO documents (collection, partition_key, record_key, payload, modified_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (collection, partition_key, record_key) DO UPDATE SET
                payload = EXCLUDED.payload,
                modified_at = EXCLUDED.modified_at
            "#,
        )
        .bind(doc.collection)
        .bind(doc.partition_key)
        .bind(doc.record_key)
        .bind(value)
        .bind(modified_at)
        .execute(&self.pool)
        .await?;

        Ok(modified_at)
    }

    async fn delete(&self, doc: DocumentRef<'_>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM documents
            WHERE collection = $1 AND partition_key = $2 AND record_key = $3
            "#,
        )
        .bind(doc.collection)
        .bind(doc.partition_key)
        .bind(doc.record_key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
