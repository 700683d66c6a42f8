use std::sync::Arc;

use thiserror::Error;

use crate::cache::QueryCache;
use crate::core::errors::ApiError;
use crate::documents::extract::{extract_text, resolve_content_type, ExtractError};
use crate::documents::{DocumentStatus, DocumentStore};
use crate::llm::Provider;
use crate::rag::{ChunkRecord, Chunker, VectorIndex};
use crate::storage::ObjectStore;

/// Where a document's bytes live and what they claim to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub file_name: String,
    /// Declared content type; may be empty or generic.
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Ready { chunks: usize },
    /// Extraction produced no usable text.
    Empty,
    Failed { reason: String },
}

impl IngestOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, IngestOutcome::Ready { .. })
    }
}

#[derive(Debug, Error)]
enum IngestError {
    #[error("failed to fetch document bytes: {0}")]
    Fetch(ApiError),
    #[error("unsupported document type '{content_type}' for {file_name}")]
    UnsupportedType {
        content_type: String,
        file_name: String,
    },
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("extraction task failed: {0}")]
    Task(String),
    #[error("failed to embed chunks: {0}")]
    Embed(ApiError),
    #[error("provider returned {got} embeddings for {expected} chunks")]
    EmbeddingCount { expected: usize, got: usize },
    #[error("failed to index chunks: {0}")]
    Index(ApiError),
    #[error("failed to read document registry: {0}")]
    Registry(ApiError),
    #[error("document deleted during ingestion")]
    Deleted,
}

/// fetch → extract → chunk → embed → index → status.
pub struct IngestionPipeline {
    objects: Arc<dyn ObjectStore>,
    provider: Arc<dyn Provider>,
    index: Arc<dyn VectorIndex>,
    documents: DocumentStore,
    cache: QueryCache,
    chunker: Chunker,
}

impl IngestionPipeline {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        provider: Arc<dyn Provider>,
        index: Arc<dyn VectorIndex>,
        documents: DocumentStore,
        cache: QueryCache,
        chunker: Chunker,
    ) -> Self {
        Self {
            objects,
            provider,
            index,
            documents,
            cache,
            chunker,
        }
    }

    /// Run the pipeline; true when the document ended up `ready`.
    pub async fn ingest(&self, document_id: &str, object: &ObjectRef) -> bool {
        self.run(document_id, object).await.is_ready()
    }

    /// Run the pipeline and record the resulting status on the document.
    ///
    /// Never returns an error: failures are logged and reported through
    /// the outcome. If the document is deleted while ingesting, whatever
    /// this run indexed or cached is removed again.
    pub async fn run(&self, document_id: &str, object: &ObjectRef) -> IngestOutcome {
        tracing::info!("Processing document {} ({})", document_id, object.file_name);

        let (outcome, chunks) = match self.process(document_id, object).await {
            Ok(chunks) if chunks.is_empty() => {
                tracing::warn!("No text extracted from document {}", document_id);
                (IngestOutcome::Empty, chunks)
            }
            Ok(chunks) => (IngestOutcome::Ready { chunks: chunks.len() }, chunks),
            Err(e) => {
                tracing::error!("Error processing document {}: {}", document_id, e);
                (
                    IngestOutcome::Failed {
                        reason: e.to_string(),
                    },
                    Vec::new(),
                )
            }
        };

        // Must precede the status update.
        if outcome.is_ready() {
            self.cache.store_chunks(document_id, &chunks).await;
        }

        let status = if outcome.is_ready() {
            DocumentStatus::Ready
        } else {
            DocumentStatus::Failed
        };
        match self.documents.set_status(document_id, status).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!("Document {} was deleted during ingestion", document_id);
                self.discard(document_id).await;
                return IngestOutcome::Failed {
                    reason: IngestError::Deleted.to_string(),
                };
            }
            Err(e) => tracing::error!("Failed to record status for {}: {}", document_id, e),
        }

        if outcome.is_ready() {
            tracing::info!("Document {} processed successfully", document_id);
        }
        outcome
    }

    /// Remove vectors and cache entries of a document that no longer exists.
    async fn discard(&self, document_id: &str) {
        if let Err(e) = self.index.delete_by_document(document_id).await {
            tracing::warn!("Failed to discard vectors for {}: {}", document_id, e);
        }
        if let Err(e) = self.cache.purge_document(document_id).await {
            tracing::warn!("Failed to discard cache entries for {}: {}", document_id, e);
        }
    }

    async fn process(&self, document_id: &str, object: &ObjectRef) -> Result<Vec<String>, IngestError> {
        let bytes = self
            .objects
            .fetch(document_id, &object.file_name)
            .await
            .map_err(IngestError::Fetch)?;

        let content_type = resolve_content_type(&object.content_type, &object.file_name).ok_or_else(
            || IngestError::UnsupportedType {
                content_type: object.content_type.clone(),
                file_name: object.file_name.clone(),
            },
        )?;

        let text = tokio::task::spawn_blocking(move || extract_text(&bytes, content_type))
            .await
            .map_err(|e| IngestError::Task(e.to_string()))??;

        let chunks = self.chunker.chunk_document(document_id, &text);
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!("Document {} split into {} chunks", document_id, chunks.len());

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.provider.embed(&texts).await.map_err(IngestError::Embed)?;
        if embeddings.len() != texts.len() {
            return Err(IngestError::EmbeddingCount {
                expected: texts.len(),
                got: embeddings.len(),
            });
        }

        if self
            .documents
            .get(document_id)
            .await
            .map_err(IngestError::Registry)?
            .is_none()
        {
            return Err(IngestError::Deleted);
        }

        // Reprocessing replaces the previous chunk set wholesale.
        let removed = self
            .index
            .delete_by_document(document_id)
            .await
            .map_err(IngestError::Index)?;
        if removed > 0 {
            tracing::debug!("Replaced {} stale chunks for document {}", removed, document_id);
        }

        let items = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                (
                    ChunkRecord {
                        chunk_id: uuid::Uuid::new_v4().to_string(),
                        document_id: chunk.document_id,
                        text: chunk.text,
                        chunk_index: chunk.chunk_index,
                        total_chunks: chunk.total_chunks,
                        file_name: object.file_name.clone(),
                    },
                    embedding,
                )
            })
            .collect();
        self.index
            .upsert(document_id, items)
            .await
            .map_err(IngestError::Index)?;

        Ok(texts)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::documents::Document;
    use crate::rag::{ChunkMatch, ChunkerConfig, SqliteVectorIndex};
    use crate::storage::FsObjectStore;
    use crate::testing::{sqlite_index, sqlite_query_cache, temp_db, FakeProvider};

    struct Fixture {
        pipeline: IngestionPipeline,
        objects: Arc<FsObjectStore>,
        documents: DocumentStore,
        index: Arc<SqliteVectorIndex>,
        cache: QueryCache,
        _dir: tempfile::TempDir,
    }

    async fn fixture(provider: FakeProvider) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let objects = Arc::new(FsObjectStore::new(dir.path().to_path_buf()));
        let documents = DocumentStore::new(temp_db("documents")).await.unwrap();
        let index = sqlite_index().await;
        let cache = sqlite_query_cache().await;
        let pipeline = IngestionPipeline::new(
            objects.clone(),
            Arc::new(provider),
            index.clone(),
            documents.clone(),
            cache.clone(),
            Chunker::new(ChunkerConfig {
                chunk_size: 100,
                chunk_overlap: 20,
            }),
        );
        Fixture {
            pipeline,
            objects,
            documents,
            index,
            cache,
            _dir: dir,
        }
    }

    async fn upload(fx: &Fixture, file_name: &str, content_type: &str, bytes: &[u8]) -> (String, ObjectRef) {
        let doc = Document::new(file_name, bytes.len() as i64, content_type);
        fx.documents.create(&doc).await.unwrap();
        fx.objects.put(&doc.id, file_name, bytes).await.unwrap();
        (
            doc.id,
            ObjectRef {
                file_name: file_name.to_string(),
                content_type: content_type.to_string(),
            },
        )
    }

    async fn status(fx: &Fixture, id: &str) -> DocumentStatus {
        fx.documents.get(id).await.unwrap().unwrap().status
    }

    fn prose() -> String {
        "Each sentence here is short. ".repeat(20)
    }

    #[tokio::test]
    async fn text_document_becomes_ready_with_indexed_chunks() {
        let fx = fixture(FakeProvider::new()).await;
        let (id, object) = upload(&fx, "notes.txt", "text/plain", prose().as_bytes()).await;

        let outcome = fx.pipeline.run(&id, &object).await;

        let IngestOutcome::Ready { chunks } = outcome else {
            panic!("expected ready, got {:?}", outcome);
        };
        assert!(chunks > 1);
        assert_eq!(status(&fx, &id).await, DocumentStatus::Ready);
        assert_eq!(fx.index.count(&id).await.unwrap(), chunks);
        assert_eq!(fx.cache.cached_chunks(&id).await.map(|c| c.len()), Some(chunks));
    }

    #[tokio::test]
    async fn reprocessing_replaces_the_chunk_set() {
        let fx = fixture(FakeProvider::new()).await;
        let (id, object) = upload(&fx, "notes.txt", "text/plain", prose().as_bytes()).await;

        assert!(fx.pipeline.ingest(&id, &object).await);
        let first = fx.index.count(&id).await.unwrap();
        assert!(fx.pipeline.ingest(&id, &object).await);
        assert_eq!(fx.index.count(&id).await.unwrap(), first);
    }

    #[tokio::test]
    async fn blank_text_marks_document_failed() {
        let fx = fixture(FakeProvider::new()).await;
        let (id, object) = upload(&fx, "blank.txt", "text/plain", b"  \n\n \t ").await;

        assert_eq!(fx.pipeline.run(&id, &object).await, IngestOutcome::Empty);
        assert_eq!(status(&fx, &id).await, DocumentStatus::Failed);
        assert_eq!(fx.index.count(&id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unsupported_type_fails_fast() {
        let fx = fixture(FakeProvider::new()).await;
        let (id, object) =
            upload(&fx, "image.png", "image/png", b"\x89PNG").await;

        let outcome = fx.pipeline.run(&id, &object).await;
        assert!(matches!(outcome, IngestOutcome::Failed { ref reason } if reason.contains("unsupported")));
        assert_eq!(status(&fx, &id).await, DocumentStatus::Failed);
    }

    #[tokio::test]
    async fn generic_content_type_is_resolved_from_extension() {
        let fx = fixture(FakeProvider::new()).await;
        let (id, object) =
            upload(&fx, "notes.txt", "application/octet-stream", prose().as_bytes()).await;

        assert!(fx.pipeline.ingest(&id, &object).await);
    }

    #[tokio::test]
    async fn provider_failures_mark_document_failed() {
        let fx = fixture(FakeProvider::new().failing_embed()).await;
        let (id, object) = upload(&fx, "notes.txt", "text/plain", prose().as_bytes()).await;
        assert!(!fx.pipeline.ingest(&id, &object).await);
        assert_eq!(status(&fx, &id).await, DocumentStatus::Failed);

        let fx = fixture(FakeProvider::new().short_embeddings()).await;
        let (id, object) = upload(&fx, "notes.txt", "text/plain", prose().as_bytes()).await;
        let outcome = fx.pipeline.run(&id, &object).await;
        assert!(matches!(outcome, IngestOutcome::Failed { ref reason } if reason.contains("embeddings for")));
        assert_eq!(fx.index.count(&id).await.unwrap(), 0);
        assert!(fx.cache.cached_chunks(&id).await.is_none());
    }

    #[tokio::test]
    async fn delete_during_embedding_leaves_nothing_behind() {
        let fx = fixture(FakeProvider::new().with_embed_delay(Duration::from_millis(300))).await;
        let (id, object) = upload(&fx, "notes.txt", "text/plain", b"Some text to index.").await;

        let (outcome, deleted) = tokio::join!(fx.pipeline.run(&id, &object), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            fx.documents.delete(&id).await.unwrap()
        });

        assert!(deleted);
        assert!(matches!(outcome, IngestOutcome::Failed { ref reason } if reason.contains("deleted")));
        assert!(fx.documents.get(&id).await.unwrap().is_none());
        assert_eq!(fx.index.count(&id).await.unwrap(), 0);
        assert!(fx.cache.cached_chunks(&id).await.is_none());
    }

    /// Index whose upserts land only after a delay.
    struct SlowUpsert(Arc<SqliteVectorIndex>);

    #[async_trait]
    impl VectorIndex for SlowUpsert {
        async fn upsert(
            &self,
            document_id: &str,
            items: Vec<(ChunkRecord, Vec<f32>)>,
        ) -> Result<(), ApiError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            self.0.upsert(document_id, items).await
        }

        async fn search(
            &self,
            query: &[f32],
            document_id: &str,
            top_k: usize,
        ) -> Result<Vec<ChunkMatch>, ApiError> {
            self.0.search(query, document_id, top_k).await
        }

        async fn delete_by_document(&self, document_id: &str) -> Result<usize, ApiError> {
            self.0.delete_by_document(document_id).await
        }

        async fn count(&self, document_id: &str) -> Result<usize, ApiError> {
            self.0.count(document_id).await
        }
    }

    #[tokio::test]
    async fn delete_during_upsert_rolls_back_indexed_chunks() {
        let fx = fixture(FakeProvider::new()).await;
        let pipeline = IngestionPipeline::new(
            fx.objects.clone(),
            Arc::new(FakeProvider::new()),
            Arc::new(SlowUpsert(fx.index.clone())),
            fx.documents.clone(),
            fx.cache.clone(),
            Chunker::default(),
        );
        let (id, object) = upload(&fx, "notes.txt", "text/plain", prose().as_bytes()).await;

        let (outcome, deleted) = tokio::join!(pipeline.run(&id, &object), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            fx.documents.delete(&id).await.unwrap()
        });

        assert!(deleted);
        assert!(matches!(outcome, IngestOutcome::Failed { ref reason } if reason.contains("deleted")));
        assert_eq!(fx.index.count(&id).await.unwrap(), 0);
        assert!(fx.cache.cached_chunks(&id).await.is_none());
    }

    #[tokio::test]
    async fn missing_object_is_a_failure_not_a_panic() {
        let fx = fixture(FakeProvider::new()).await;
        let doc = Document::new("ghost.txt", 0, "text/plain");
        fx.documents.create(&doc).await.unwrap();

        let outcome = fx
            .pipeline
            .run(
                &doc.id,
                &ObjectRef {
                    file_name: "ghost.txt".to_string(),
                    content_type: "text/plain".to_string(),
                },
            )
            .await;
        assert!(matches!(outcome, IngestOutcome::Failed { .. }));
        assert_eq!(status(&fx, &doc.id).await, DocumentStatus::Failed);
    }
}
