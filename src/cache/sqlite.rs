//! SQLite-backed result cache with per-entry expiry.
//!
//! Expiry is stored as a millisecond UNIX timestamp; reads never return a
//! row at or past it and lazily remove it.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

use super::ResultCache;
use crate::core::errors::ApiError;

pub struct SqliteResultCache {
    pool: SqlitePool,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl SqliteResultCache {
    pub async fn with_path(db_path: PathBuf) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (namespace, key)
            )",
        )
        .execute(&pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache_entries(expires_at)")
            .execute(&pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(Self { pool })
    }

    /// Drop every expired entry, returning how many were removed.
    pub async fn cleanup_expired(&self) -> Result<usize, ApiError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?1")
            .bind(now_millis())
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl ResultCache for SqliteResultCache {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, ApiError> {
        let row: Option<(String, i64)> = sqlx::query_as(
            "SELECT value, expires_at FROM cache_entries WHERE namespace = ?1 AND key = ?2",
        )
        .bind(namespace)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let Some((raw, expires_at)) = row else {
            return Ok(None);
        };

        if expires_at <= now_millis() {
            self.delete(namespace, key).await?;
            return Ok(None);
        }

        serde_json::from_str(&raw).map(Some).map_err(ApiError::internal)
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), ApiError> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now_millis().saturating_add(ttl_ms);
        let raw = serde_json::to_string(&value).map_err(ApiError::internal)?;

        sqlx::query(
            "INSERT OR REPLACE INTO cache_entries (namespace, key, value, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(namespace)
        .bind(key)
        .bind(&raw)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2")
            .bind(namespace)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_prefix(&self, namespace: &str, prefix: &str) -> Result<usize, ApiError> {
        // substr instead of LIKE so '%' and '_' in ids are matched literally.
        let result = sqlx::query(
            "DELETE FROM cache_entries
             WHERE namespace = ?1 AND substr(key, 1, length(?2)) = ?2",
        )
        .bind(namespace)
        .bind(prefix)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;
        Ok(result.rows_affected() as usize)
    }
}
