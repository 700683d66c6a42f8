use std::sync::Arc;

use crate::cache::QueryCache;
use crate::core::errors::ApiError;
use crate::ingest::{IngestQueue, ObjectRef};
use crate::rag::VectorIndex;
use crate::storage::ObjectStore;

use super::extract::{is_allowed_file_name, ALLOWED_EXTENSIONS};
use super::store::{Document, DocumentStatus, DocumentStore};

/// Upload, listing and deletion of documents, coordinating the registry with
/// object storage, the vector index, the cache and the ingest queue.
#[derive(Clone)]
pub struct DocumentService {
    store: DocumentStore,
    objects: Arc<dyn ObjectStore>,
    index: Arc<dyn VectorIndex>,
    cache: QueryCache,
    queue: IngestQueue,
    max_bytes: u64,
}

impl DocumentService {
    pub fn new(
        store: DocumentStore,
        objects: Arc<dyn ObjectStore>,
        index: Arc<dyn VectorIndex>,
        cache: QueryCache,
        queue: IngestQueue,
        max_bytes: u64,
    ) -> Self {
        Self {
            store,
            objects,
            index,
            cache,
            queue,
            max_bytes,
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Store the bytes, register the document as `processing` and queue
    /// ingestion. Returns before any text is extracted.
    pub async fn upload(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<Document, ApiError> {
        let file_name = file_name.trim();
        if file_name.is_empty() {
            return Err(ApiError::BadRequest("File name is required".to_string()));
        }
        if !is_allowed_file_name(file_name) {
            return Err(ApiError::BadRequest(format!(
                "File type not supported. Allowed types: {}",
                ALLOWED_EXTENSIONS.join(", ")
            )));
        }
        if bytes.len() as u64 > self.max_bytes {
            return Err(ApiError::PayloadTooLarge(format!(
                "File too large. Maximum size: {}MB",
                self.max_bytes / (1024 * 1024)
            )));
        }

        let document = Document::new(file_name, bytes.len() as i64, content_type);
        self.objects.put(&document.id, file_name, bytes).await?;
        self.store.create(&document).await?;
        self.queue.submit(
            &document.id,
            ObjectRef {
                file_name: document.file_name.clone(),
                content_type: document.file_type.clone(),
            },
        )?;

        tracing::info!(
            "Accepted document {} ({}, {} bytes)",
            document.id,
            document.file_name,
            document.file_size
        );
        Ok(document)
    }

    pub async fn list(&self, skip: i64, limit: i64) -> Result<(Vec<Document>, i64), ApiError> {
        self.store.list(skip, limit).await
    }

    pub async fn get(&self, document_id: &str) -> Result<Document, ApiError> {
        self.store
            .get(document_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Document not found".to_string()))
    }

    /// Remove the document everywhere. Only the registry row is mandatory;
    /// failures cleaning up the object, vectors or cache are logged.
    ///
    /// The row must go first; a running ingestion then discards its output.
    pub async fn delete(&self, document_id: &str) -> Result<(), ApiError> {
        let document = self.get(document_id).await?;
        if !self.store.delete(document_id).await? {
            return Err(ApiError::NotFound("Document not found".to_string()));
        }

        if let Err(e) = self.objects.delete(document_id, &document.file_name).await {
            tracing::warn!("Failed to delete stored file for {}: {}", document_id, e);
        }
        match self.index.delete_by_document(document_id).await {
            Ok(removed) => tracing::debug!("Removed {} vectors for {}", removed, document_id),
            Err(e) => tracing::warn!("Failed to delete vectors for {}: {}", document_id, e),
        }
        match self.cache.purge_document(document_id).await {
            Ok(removed) => tracing::debug!("Purged {} cache entries for {}", removed, document_id),
            Err(e) => tracing::warn!("Failed to purge cache for {}: {}", document_id, e),
        }
        tracing::info!("Deleted document {}", document_id);
        Ok(())
    }

    /// Reset to `processing` and queue ingestion again from the stored bytes.
    pub async fn reprocess(&self, document_id: &str) -> Result<Document, ApiError> {
        let mut document = self.get(document_id).await?;
        self.store
            .set_status(document_id, DocumentStatus::Processing)
            .await?;
        document.status = DocumentStatus::Processing;

        self.queue.submit(
            document_id,
            ObjectRef {
                file_name: document.file_name.clone(),
                content_type: document.file_type.clone(),
            },
        )?;
        Ok(document)
    }
}
