use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use super::stream::AnswerStream;
use crate::cache::QueryCache;
use crate::core::errors::ApiError;
use crate::llm::Provider;
use crate::rag::{ChunkMatch, VectorIndex};

/// Returned when retrieval finds nothing for the document.
pub const NO_CONTEXT_ANSWER: &str =
    "I couldn't find any relevant information to answer your question.";

const CONTEXT_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Retrieval width for single-shot answers.
    pub top_k: usize,
    /// Retrieval width for streamed answers.
    pub stream_top_k: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            stream_top_k: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    Cache,
    Generated,
    NoContext,
}

#[derive(Debug, Clone)]
pub struct QueryAnswer {
    pub answer: String,
    pub execution_time: Duration,
    /// Chunk texts used as context; empty for cache hits and the fallback.
    pub context_chunks: Vec<String>,
    pub source: AnswerSource,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("failed to embed question: {0}")]
    Embedding(ApiError),
    #[error("failed to search document chunks: {0}")]
    Retrieval(ApiError),
    #[error("failed to generate answer: {0}")]
    Generation(ApiError),
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        let message = format!("Error processing query: {}", err);
        match err {
            QueryError::Retrieval(_) => ApiError::Internal(message),
            QueryError::Embedding(_) | QueryError::Generation(_) => {
                ApiError::ServiceUnavailable(message)
            }
        }
    }
}

/// Cache-first retrieval-augmented answering over one document.
#[derive(Clone)]
pub struct QueryOrchestrator {
    provider: Arc<dyn Provider>,
    index: Arc<dyn VectorIndex>,
    cache: QueryCache,
    options: QueryOptions,
}

impl QueryOrchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        index: Arc<dyn VectorIndex>,
        cache: QueryCache,
        options: QueryOptions,
    ) -> Self {
        Self {
            provider,
            index,
            cache,
            options,
        }
    }

    pub async fn answer(&self, document_id: &str, question: &str) -> Result<QueryAnswer, QueryError> {
        let started = Instant::now();

        if let Some(answer) = self.cache.cached_answer(document_id, question).await {
            tracing::info!("Cache hit for query on document {}", document_id);
            return Ok(QueryAnswer {
                answer,
                execution_time: started.elapsed(),
                context_chunks: Vec::new(),
                source: AnswerSource::Cache,
            });
        }

        let matches = self.retrieve(document_id, question, self.options.top_k).await?;
        if matches.is_empty() {
            tracing::info!("No relevant chunks for query on document {}", document_id);
            return Ok(QueryAnswer {
                answer: NO_CONTEXT_ANSWER.to_string(),
                execution_time: started.elapsed(),
                context_chunks: Vec::new(),
                source: AnswerSource::NoContext,
            });
        }

        let context_chunks: Vec<String> = matches.into_iter().map(|m| m.chunk.text).collect();
        let answer = self
            .provider
            .generate(question, &context_chunks.join(CONTEXT_SEPARATOR))
            .await
            .map_err(QueryError::Generation)?;

        self.cache.store_answer(document_id, question, &answer).await;

        let execution_time = started.elapsed();
        tracing::info!(
            "Query on document {} answered from {} chunks in {:.3}s",
            document_id,
            context_chunks.len(),
            execution_time.as_secs_f64()
        );
        Ok(QueryAnswer {
            answer,
            execution_time,
            context_chunks,
            source: AnswerSource::Generated,
        })
    }

    /// Answer as a cancellable token stream.
    ///
    /// Setup failures (embedding, search, opening the provider stream) are
    /// returned here; failures after the first token arrive through
    /// `AnswerStream::next`.
    pub async fn stream(&self, document_id: &str, question: &str) -> Result<AnswerStream, QueryError> {
        if let Some(answer) = self.cache.cached_answer(document_id, question).await {
            tracing::info!("Cache hit for streamed query on document {}", document_id);
            return Ok(AnswerStream::cached(answer));
        }

        let matches = self
            .retrieve(document_id, question, self.options.stream_top_k)
            .await?;
        if matches.is_empty() {
            tracing::info!("No relevant chunks for streamed query on document {}", document_id);
            return Ok(AnswerStream::no_context(NO_CONTEXT_ANSWER.to_string()));
        }

        let context_chunks: Vec<String> = matches.into_iter().map(|m| m.chunk.text).collect();
        let tokens = self
            .provider
            .generate_stream(question, &context_chunks.join(CONTEXT_SEPARATOR))
            .await
            .map_err(QueryError::Generation)?;

        Ok(AnswerStream::generating(
            tokens,
            self.cache.clone(),
            document_id,
            question,
            context_chunks,
        ))
    }

    async fn retrieve(
        &self,
        document_id: &str,
        question: &str,
        top_k: usize,
    ) -> Result<Vec<ChunkMatch>, QueryError> {
        let mut vectors = self
            .provider
            .embed(&[question.to_string()])
            .await
            .map_err(QueryError::Embedding)?;
        if vectors.len() != 1 {
            return Err(QueryError::Embedding(ApiError::ServiceUnavailable(format!(
                "expected one question embedding, got {}",
                vectors.len()
            ))));
        }
        let query = vectors.remove(0);

        self.index
            .search(&query, document_id, top_k)
            .await
            .map_err(QueryError::Retrieval)
    }
}
