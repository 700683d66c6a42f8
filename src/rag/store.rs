//! VectorIndex trait: document-scoped embedding storage.
//!
//! Every search is filtered to a single document; a query never sees
//! another document's chunks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

/// A chunk and the metadata stored alongside its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Fresh UUIDv4 per indexing pass.
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub file_name: String,
}

/// Result of a similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMatch {
    pub chunk: ChunkRecord,
    /// Cosine similarity, higher is better.
    pub score: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Store `(record, embedding)` pairs for `document_id`.
    ///
    /// Every record must belong to `document_id`.
    async fn upsert(
        &self,
        document_id: &str,
        items: Vec<(ChunkRecord, Vec<f32>)>,
    ) -> Result<(), ApiError>;

    /// Top `top_k` chunks of `document_id` by descending cosine similarity.
    async fn search(
        &self,
        query: &[f32],
        document_id: &str,
        top_k: usize,
    ) -> Result<Vec<ChunkMatch>, ApiError>;

    /// Remove all vectors of a document, returning how many were removed.
    async fn delete_by_document(&self, document_id: &str) -> Result<usize, ApiError>;

    async fn count(&self, document_id: &str) -> Result<usize, ApiError>;
}
