//! Namespaced result cache.
//!
//! `ResultCache` is the storage seam; `QueryCache` layers the query and
//! chunk-set key scheme on top of it. Cache failures never fail a request:
//! read errors count as misses and write errors are logged.

pub mod keys;
mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::errors::ApiError;
pub use keys::{
    document_prefix, query_fingerprint, DOCUMENT_CHUNKS_NAMESPACE,
    QUERY_RESULT_NAMESPACE,
};
pub use sqlite::SqliteResultCache;

#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, ApiError>;

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), ApiError>;

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, ApiError>;

    /// Remove every key in `namespace` starting with `prefix`.
    async fn delete_by_prefix(&self, namespace: &str, prefix: &str) -> Result<usize, ApiError>;
}

#[derive(Clone)]
pub struct QueryCache {
    backend: Arc<dyn ResultCache>,
    ttl: Duration,
}

impl QueryCache {
    pub fn new(backend: Arc<dyn ResultCache>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub async fn cached_answer(&self, document_id: &str, question: &str) -> Option<String> {
        let key = query_fingerprint(document_id, question);
        match self.backend.get(QUERY_RESULT_NAMESPACE, &key).await {
            Ok(value) => value
                .as_ref()
                .and_then(|v| v.get("answer"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
            Err(e) => {
                tracing::warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    pub async fn store_answer(&self, document_id: &str, question: &str, answer: &str) {
        let key = query_fingerprint(document_id, question);
        if let Err(e) = self
            .backend
            .set(QUERY_RESULT_NAMESPACE, &key, json!({ "answer": answer }), self.ttl)
            .await
        {
            tracing::warn!("Cache write failed for {}: {}", key, e);
        }
    }

    pub async fn store_chunks(&self, document_id: &str, chunks: &[String]) {
        if let Err(e) = self
            .backend
            .set(DOCUMENT_CHUNKS_NAMESPACE, document_id, json!(chunks), self.ttl)
            .await
        {
            tracing::warn!("Failed to cache chunks for document {}: {}", document_id, e);
        }
    }

    pub async fn cached_chunks(&self, document_id: &str) -> Option<Vec<String>> {
        match self.backend.get(DOCUMENT_CHUNKS_NAMESPACE, document_id).await {
            Ok(value) => value.and_then(|v| serde_json::from_value(v).ok()),
            Err(e) => {
                tracing::warn!("Cache read failed for chunks of {}: {}", document_id, e);
                None
            }
        }
    }

    /// Drop the chunk set and every cached answer of a document.
    pub async fn purge_document(&self, document_id: &str) -> Result<usize, ApiError> {
        let chunks_removed = self
            .backend
            .delete(DOCUMENT_CHUNKS_NAMESPACE, document_id)
            .await?;
        let answers_removed = self
            .backend
            .delete_by_prefix(QUERY_RESULT_NAMESPACE, &document_prefix(document_id))
            .await?;
        Ok(answers_removed + usize::from(chunks_removed))
    }
}
