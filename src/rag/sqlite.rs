//! SQLite-backed vector index.
//!
//! Metadata and little-endian `f32` blobs live in one table; search loads a
//! document's rows and ranks them by brute-force cosine similarity.

use std::path::PathBuf;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::store::{ChunkMatch, ChunkRecord, VectorIndex};
use crate::core::errors::ApiError;

pub struct SqliteVectorIndex {
    pool: SqlitePool,
    /// Expected embedding length; `None` accepts any length.
    dimension: Option<usize>,
}

impl SqliteVectorIndex {
    pub async fn with_path(db_path: PathBuf, dimension: Option<usize>) -> Result<Self, ApiError> {
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

        let index = Self { pool, dimension };
        index.init_schema().await?;
        Ok(index)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chunk_vectors (
                chunk_id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                text TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                total_chunks INTEGER NOT NULL,
                file_name TEXT NOT NULL DEFAULT '',
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_document ON chunk_vectors(document_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        let denom = norm_a * norm_b;

        if denom <= f32::EPSILON {
            0.0
        } else {
            dot / denom
        }
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<(), ApiError> {
        match self.dimension {
            Some(expected) if embedding.len() != expected => Err(ApiError::BadRequest(format!(
                "Embedding has {} dimensions, index expects {}",
                embedding.len(),
                expected
            ))),
            _ => Ok(()),
        }
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> ChunkRecord {
        let chunk_index: i64 = row.get("chunk_index");
        let total_chunks: i64 = row.get("total_chunks");
        ChunkRecord {
            chunk_id: row.get("chunk_id"),
            document_id: row.get("document_id"),
            text: row.get("text"),
            chunk_index: chunk_index.max(0) as usize,
            total_chunks: total_chunks.max(0) as usize,
            file_name: row.get("file_name"),
        }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(
        &self,
        document_id: &str,
        items: Vec<(ChunkRecord, Vec<f32>)>,
    ) -> Result<(), ApiError> {
        if items.is_empty() {
            return Ok(());
        }

        for (record, embedding) in &items {
            if record.document_id != document_id {
                return Err(ApiError::BadRequest(format!(
                    "Chunk {} belongs to document {}, not {}",
                    record.chunk_id, record.document_id, document_id
                )));
            }
            self.check_dimension(embedding)?;
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        for (record, embedding) in &items {
            let blob = Self::serialize_embedding(embedding);
            sqlx::query(
                "INSERT OR REPLACE INTO chunk_vectors
                    (chunk_id, document_id, text, chunk_index, total_chunks, file_name, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(&record.chunk_id)
            .bind(&record.document_id)
            .bind(&record.text)
            .bind(record.chunk_index as i64)
            .bind(record.total_chunks as i64)
            .bind(&record.file_name)
            .bind(&blob)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        }

        tx.commit().await.map_err(ApiError::internal)?;
        tracing::debug!("Indexed {} chunks for document {}", items.len(), document_id);
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        document_id: &str,
        top_k: usize,
    ) -> Result<Vec<ChunkMatch>, ApiError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        self.check_dimension(query)?;

        let rows = sqlx::query(
            "SELECT chunk_id, document_id, text, chunk_index, total_chunks, file_name, embedding
             FROM chunk_vectors
             WHERE document_id = ?1",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let mut scored: Vec<ChunkMatch> = rows
            .iter()
            .filter_map(|row| {
                let embedding_bytes: Vec<u8> = row.get("embedding");
                if embedding_bytes.is_empty() {
                    return None;
                }
                let stored = Self::deserialize_embedding(&embedding_bytes);
                Some(ChunkMatch {
                    score: Self::cosine_similarity(query, &stored),
                    chunk: Self::row_to_record(row),
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
        });
        scored.truncate(top_k);

        Ok(scored)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize, ApiError> {
        let result = sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?1")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(result.rows_affected() as usize)
    }

    async fn count(&self, document_id: &str) -> Result<usize, ApiError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE document_id = ?1")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await
                .map_err(ApiError::internal)?;

        Ok(count as usize)
    }
}
