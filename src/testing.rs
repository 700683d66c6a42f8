//! In-crate fakes shared by unit tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::cache::{QueryCache, ResultCache, SqliteResultCache};
use crate::core::errors::ApiError;
use crate::llm::{Provider, StreamEvent, TokenReceiver};
use crate::rag::{ChunkMatch, ChunkRecord, SqliteVectorIndex, VectorIndex};

pub const FAKE_DIMENSION: usize = 8;

pub fn temp_db(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("docuquery-{}-test-{}.db", label, uuid::Uuid::new_v4()))
}

pub async fn sqlite_query_cache() -> QueryCache {
    let backend = SqliteResultCache::with_path(temp_db("cache")).await.unwrap();
    QueryCache::new(Arc::new(backend), Duration::from_secs(3600))
}

pub async fn sqlite_index() -> Arc<SqliteVectorIndex> {
    Arc::new(
        SqliteVectorIndex::with_path(temp_db("vectors"), Some(FAKE_DIMENSION))
            .await
            .unwrap(),
    )
}

/// Deterministic bag-of-bytes embedding with a constant bias so no vector
/// is ever all zeros.
pub fn fake_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; FAKE_DIMENSION];
    vector[0] = 1.0;
    for byte in text.to_lowercase().bytes() {
        vector[1 + (byte as usize) % (FAKE_DIMENSION - 1)] += 1.0;
    }
    vector
}

/// Scriptable provider that counts calls.
pub struct FakeProvider {
    pub embed_calls: AtomicUsize,
    pub generate_calls: AtomicUsize,
    pub stream_calls: AtomicUsize,
    /// Set once the stream producer saw its receiver go away.
    pub producer_stopped: Arc<AtomicBool>,
    answer: String,
    tokens: Vec<String>,
    fail_embed: bool,
    fail_generate: bool,
    fail_stream_after: Option<usize>,
    abandon_stream_after: Option<usize>,
    embed_delay: Option<Duration>,
    short_embeddings: bool,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            embed_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            producer_stopped: Arc::new(AtomicBool::new(false)),
            answer: "Generated answer.".to_string(),
            tokens: vec!["Generated".to_string(), " answer.".to_string()],
            fail_embed: false,
            fail_generate: false,
            fail_stream_after: None,
            abandon_stream_after: None,
            embed_delay: None,
            short_embeddings: false,
        }
    }

    pub fn with_answer(mut self, answer: &str) -> Self {
        self.answer = answer.to_string();
        self
    }

    pub fn with_tokens(mut self, tokens: &[&str]) -> Self {
        self.tokens = tokens.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn failing_embed(mut self) -> Self {
        self.fail_embed = true;
        self
    }

    pub fn failing_generate(mut self) -> Self {
        self.fail_generate = true;
        self
    }

    pub fn failing_stream_after(mut self, tokens: usize) -> Self {
        self.fail_stream_after = Some(tokens);
        self
    }

    /// Drop the sender after `tokens` tokens without sending `Done`, as a
    /// crashed producer would.
    pub fn abandoning_stream_after(mut self, tokens: usize) -> Self {
        self.abandon_stream_after = Some(tokens);
        self
    }

    pub fn with_embed_delay(mut self, delay: Duration) -> Self {
        self.embed_delay = Some(delay);
        self
    }

    /// Return one embedding fewer than requested.
    pub fn short_embeddings(mut self) -> Self {
        self.short_embeddings = true;
        self
    }

    pub fn calls(&self) -> (usize, usize, usize) {
        (
            self.embed_calls.load(Ordering::SeqCst),
            self.generate_calls.load(Ordering::SeqCst),
            self.stream_calls.load(Ordering::SeqCst),
        )
    }
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.embed_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_embed {
            return Err(ApiError::ServiceUnavailable("embedding backend down".to_string()));
        }
        let mut vectors: Vec<Vec<f32>> = texts.iter().map(|t| fake_embedding(t)).collect();
        if self.short_embeddings {
            vectors.pop();
        }
        Ok(vectors)
    }

    async fn generate(&self, _question: &str, _context: &str) -> Result<String, ApiError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_generate {
            return Err(ApiError::ServiceUnavailable("chat backend down".to_string()));
        }
        Ok(self.answer.clone())
    }

    async fn generate_stream(
        &self,
        _question: &str,
        _context: &str,
    ) -> Result<TokenReceiver, ApiError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_generate {
            return Err(ApiError::ServiceUnavailable("chat backend down".to_string()));
        }

        let (tx, rx) = mpsc::channel(1);
        let tokens = self.tokens.clone();
        let fail_after = self.fail_stream_after;
        let abandon_after = self.abandon_stream_after;
        let stopped = self.producer_stopped.clone();

        tokio::spawn(async move {
            for (i, token) in tokens.into_iter().enumerate() {
                if abandon_after == Some(i) {
                    return;
                }
                if fail_after == Some(i) {
                    let _ = tx
                        .send(Err(ApiError::ServiceUnavailable("stream interrupted".to_string())))
                        .await;
                    return;
                }
                if tx.send(Ok(StreamEvent::Token(token))).await.is_err() {
                    stopped.store(true, Ordering::SeqCst);
                    return;
                }
            }
            if tx.send(Ok(StreamEvent::Done)).await.is_err() {
                stopped.store(true, Ordering::SeqCst);
            }
        });

        Ok(rx)
    }
}

/// Cache whose every operation fails.
pub struct FailingCache;

#[async_trait]
impl ResultCache for FailingCache {
    async fn get(&self, _namespace: &str, _key: &str) -> Result<Option<Value>, ApiError> {
        Err(ApiError::Internal("cache offline".to_string()))
    }

    async fn set(
        &self,
        _namespace: &str,
        _key: &str,
        _value: Value,
        _ttl: Duration,
    ) -> Result<(), ApiError> {
        Err(ApiError::Internal("cache offline".to_string()))
    }

    async fn delete(&self, _namespace: &str, _key: &str) -> Result<bool, ApiError> {
        Err(ApiError::Internal("cache offline".to_string()))
    }

    async fn delete_by_prefix(&self, _namespace: &str, _prefix: &str) -> Result<usize, ApiError> {
        Err(ApiError::Internal("cache offline".to_string()))
    }
}

/// Index whose every operation fails.
pub struct FailingIndex;

#[async_trait]
impl VectorIndex for FailingIndex {
    async fn upsert(
        &self,
        _document_id: &str,
        _items: Vec<(ChunkRecord, Vec<f32>)>,
    ) -> Result<(), ApiError> {
        Err(ApiError::Internal("index offline".to_string()))
    }

    async fn search(
        &self,
        _query: &[f32],
        _document_id: &str,
        _top_k: usize,
    ) -> Result<Vec<ChunkMatch>, ApiError> {
        Err(ApiError::Internal("index offline".to_string()))
    }

    async fn delete_by_document(&self, _document_id: &str) -> Result<usize, ApiError> {
        Err(ApiError::Internal("index offline".to_string()))
    }

    async fn count(&self, _document_id: &str) -> Result<usize, ApiError> {
        Err(ApiError::Internal("index offline".to_string()))
    }
}

/// Index `texts` as the chunks of `document_id` using `fake_embedding`.
pub async fn seed_index(index: &dyn VectorIndex, document_id: &str, texts: &[&str]) {
    let items = texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            (
                ChunkRecord {
                    chunk_id: uuid::Uuid::new_v4().to_string(),
                    document_id: document_id.to_string(),
                    text: text.to_string(),
                    chunk_index: i,
                    total_chunks: texts.len(),
                    file_name: "seed.txt".to_string(),
                },
                fake_embedding(text),
            )
        })
        .collect();
    index.upsert(document_id, items).await.unwrap();
}
