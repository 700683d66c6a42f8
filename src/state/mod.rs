use std::sync::Arc;

use crate::cache::{QueryCache, ResultCache, SqliteResultCache};
use crate::core::config::{AppPaths, ConfigService, Settings};
use crate::documents::{DocumentService, DocumentStore};
use crate::history::QueryHistoryStore;
use crate::ingest::{IngestQueue, IngestionPipeline};
use crate::llm::{OpenAiProvider, Provider};
use crate::query::QueryOrchestrator;
use crate::rag::{Chunker, SqliteVectorIndex, VectorIndex};
use crate::storage::{FsObjectStore, ObjectStore};

pub mod error;

use error::InitializationError;

/// The swappable backends behind the core services.
#[derive(Clone)]
pub struct Collaborators {
    pub provider: Arc<dyn Provider>,
    pub index: Arc<dyn VectorIndex>,
    pub cache: Arc<dyn ResultCache>,
    pub objects: Arc<dyn ObjectStore>,
}

/// Global application state shared across all routes and background tasks.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub settings: Settings,
    pub documents: DocumentService,
    pub orchestrator: QueryOrchestrator,
    pub history: QueryHistoryStore,
}

impl AppState {
    /// Loads configuration from `paths` and builds the shipped backends:
    /// the OpenAI-compatible provider plus SQLite index, cache and the local
    /// object tree.
    pub async fn initialize(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        let config = ConfigService::new(paths.clone());
        let merged = config
            .load_config()
            .map_err(|e| InitializationError::Config(e.into()))?;
        let settings = Settings::from_config(&merged);

        let provider = Arc::new(
            OpenAiProvider::new(settings.provider.clone())
                .map_err(|e| InitializationError::Provider(e.into()))?,
        );
        if settings.provider.api_key.is_none() {
            tracing::warn!("No provider API key configured; queries and ingestion will fail");
        }

        let index = Arc::new(
            SqliteVectorIndex::with_path(
                paths.vector_db_path.clone(),
                settings.embedding_dimension,
            )
            .await
            .map_err(|e| InitializationError::VectorIndex(e.into()))?,
        );

        let cache = Arc::new(
            SqliteResultCache::with_path(paths.cache_db_path.clone())
                .await
                .map_err(|e| InitializationError::Cache(e.into()))?,
        );
        spawn_cache_sweeper(cache.clone(), settings.cache_ttl);

        let objects = Arc::new(FsObjectStore::new(paths.objects_dir.clone()));

        Self::from_parts(
            paths,
            config,
            settings,
            Collaborators {
                provider,
                index,
                cache,
                objects,
            },
        )
        .await
    }

    /// Wires the services around the given backends. Must run inside a tokio
    /// runtime since it starts the ingest workers.
    pub async fn from_parts(
        paths: Arc<AppPaths>,
        config: ConfigService,
        settings: Settings,
        parts: Collaborators,
    ) -> Result<Arc<Self>, InitializationError> {
        let store = DocumentStore::new(paths.db_path.clone())
            .await
            .map_err(|e| InitializationError::Documents(e.into()))?;
        let history = QueryHistoryStore::new(paths.db_path.clone())
            .await
            .map_err(|e| InitializationError::History(e.into()))?;

        let query_cache = QueryCache::new(parts.cache.clone(), settings.cache_ttl);

        let pipeline = Arc::new(IngestionPipeline::new(
            parts.objects.clone(),
            parts.provider.clone(),
            parts.index.clone(),
            store.clone(),
            query_cache.clone(),
            Chunker::new(settings.chunking),
        ));
        let queue = IngestQueue::start(pipeline, settings.ingest_concurrency);

        let documents = DocumentService::new(
            store,
            parts.objects,
            parts.index.clone(),
            query_cache.clone(),
            queue,
            settings.max_document_bytes,
        );
        let orchestrator =
            QueryOrchestrator::new(parts.provider, parts.index, query_cache, settings.query);

        tracing::info!(
            "Services ready (chunk_size={}, overlap={}, top_k={}, ingest workers={})",
            settings.chunking.chunk_size,
            settings.chunking.chunk_overlap,
            settings.query.top_k,
            settings.ingest_concurrency
        );

        Ok(Arc::new(AppState {
            paths,
            config,
            settings,
            documents,
            orchestrator,
            history,
        }))
    }
}

/// Expired entries are already invisible to reads; this only reclaims space.
fn spawn_cache_sweeper(cache: Arc<SqliteResultCache>, every: std::time::Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match cache.cleanup_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!("Removed {} expired cache entries", removed),
                Err(e) => tracing::warn!("Cache cleanup failed: {}", e),
            }
        }
    });
}
