//! Cancellable answer stream.
//!
//! The stream owns the provider's token receiver directly. Tokens are
//! forwarded as they arrive and accumulated; the full answer is written to
//! the cache inside the `next` call that observes the provider's
//! `StreamEvent::Done`. A consumer that stops polling, cancels or drops the
//! stream therefore never caches a partial answer, and dropping the receiver
//! is what tells the provider's producer task to stop. A channel that closes
//! without `Done` means the producer died and the stream fails.

use std::time::{Duration, Instant};

use super::orchestrator::{AnswerSource, QueryError};
use crate::cache::QueryCache;
use crate::core::errors::ApiError;
use crate::llm::{StreamEvent, TokenReceiver};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Incremental token of a generated answer.
    Token(String),
    /// Complete answer delivered in one piece (cache hit or fallback).
    Final(String),
}

impl Fragment {
    pub fn into_text(self) -> String {
        match self {
            Fragment::Token(text) | Fragment::Final(text) => text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

enum Source {
    Ready(String),
    Generating {
        tokens: TokenReceiver,
        cache: QueryCache,
        document_id: String,
        question: String,
    },
    Exhausted,
}

/// Single-consumer answer sequence; see the module docs.
pub struct AnswerStream {
    source: Source,
    state: StreamState,
    answer_source: AnswerSource,
    answer: String,
    context_chunks: Vec<String>,
    started: Instant,
}

impl AnswerStream {
    pub(crate) fn cached(answer: String) -> Self {
        Self::ready(answer, AnswerSource::Cache)
    }

    pub(crate) fn no_context(answer: String) -> Self {
        Self::ready(answer, AnswerSource::NoContext)
    }

    fn ready(answer: String, answer_source: AnswerSource) -> Self {
        Self {
            source: Source::Ready(answer),
            state: StreamState::Streaming,
            answer_source,
            answer: String::new(),
            context_chunks: Vec::new(),
            started: Instant::now(),
        }
    }

    pub(crate) fn generating(
        tokens: TokenReceiver,
        cache: QueryCache,
        document_id: &str,
        question: &str,
        context_chunks: Vec<String>,
    ) -> Self {
        Self {
            source: Source::Generating {
                tokens,
                cache,
                document_id: document_id.to_string(),
                question: question.to_string(),
            },
            state: StreamState::Streaming,
            answer_source: AnswerSource::Generated,
            answer: String::new(),
            context_chunks,
            started: Instant::now(),
        }
    }

    /// Next fragment, or `None` once the stream is no longer `Streaming`.
    ///
    /// A provider error, or the provider going away before `Done`, is
    /// yielded once and moves the stream to `Failed`.
    pub async fn next(&mut self) -> Option<Result<Fragment, QueryError>> {
        if self.state != StreamState::Streaming {
            return None;
        }

        let item = match &mut self.source {
            Source::Ready(answer) => {
                let answer = std::mem::take(answer);
                self.answer.push_str(&answer);
                self.finish(StreamState::Completed);
                return Some(Ok(Fragment::Final(answer)));
            }
            Source::Generating { tokens, .. } => tokens.recv().await,
            Source::Exhausted => return None,
        };

        match item {
            Some(Ok(StreamEvent::Token(token))) => {
                self.answer.push_str(&token);
                Some(Ok(Fragment::Token(token)))
            }
            Some(Err(e)) => self.fail(e),
            None => self.fail(ApiError::ServiceUnavailable(
                "answer stream ended before completion".to_string(),
            )),
            Some(Ok(StreamEvent::Done)) => {
                if let Source::Generating {
                    cache,
                    document_id,
                    question,
                    ..
                } = std::mem::replace(&mut self.source, Source::Exhausted)
                {
                    cache.store_answer(&document_id, &question, &self.answer).await;
                    tracing::info!(
                        "Streamed answer for document {} completed and cached",
                        document_id
                    );
                }
                self.state = StreamState::Completed;
                None
            }
        }
    }

    /// Stop emission now; the provider sees its receiver dropped.
    pub fn cancel(&mut self) {
        if self.state == StreamState::Streaming {
            tracing::info!("Answer stream cancelled after {} bytes", self.answer.len());
            self.finish(StreamState::Cancelled);
        }
    }

    fn fail(&mut self, e: ApiError) -> Option<Result<Fragment, QueryError>> {
        tracing::warn!("Answer stream failed after {} bytes: {}", self.answer.len(), e);
        self.finish(StreamState::Failed);
        Some(Err(QueryError::Generation(e)))
    }

    fn finish(&mut self, state: StreamState) {
        self.source = Source::Exhausted;
        self.state = state;
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn source(&self) -> AnswerSource {
        self.answer_source
    }

    pub fn context_chunks(&self) -> &[String] {
        &self.context_chunks
    }

    /// Complete answer, available once the stream is `Completed`.
    pub fn answer(&self) -> Option<&str> {
        (self.state == StreamState::Completed).then_some(self.answer.as_str())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;
    use crate::query::{QueryOptions, QueryOrchestrator, NO_CONTEXT_ANSWER};
    use crate::testing::{seed_index, sqlite_index, sqlite_query_cache, FakeProvider};

    async fn setup(provider: Arc<FakeProvider>) -> (QueryOrchestrator, QueryCache) {
        let index = sqlite_index().await;
        seed_index(
            index.as_ref(),
            "doc1",
            &["Alpha is the first letter.", "Omega is the last letter."],
        )
        .await;
        let cache = sqlite_query_cache().await;
        let orchestrator =
            QueryOrchestrator::new(provider, index, cache.clone(), QueryOptions::default());
        (orchestrator, cache)
    }

    async fn drain(stream: &mut AnswerStream) -> Vec<Fragment> {
        let mut fragments = Vec::new();
        while let Some(item) = stream.next().await {
            fragments.push(item.unwrap());
        }
        fragments
    }

    #[tokio::test]
    async fn tokens_concatenate_to_the_cached_answer() {
        let provider = Arc::new(FakeProvider::new().with_tokens(&["Alpha", " comes", " first."]));
        let (orchestrator, cache) = setup(provider.clone()).await;

        let mut stream = orchestrator.stream("doc1", "Which letter is first?").await.unwrap();
        assert_eq!(stream.context_chunks().len(), 2);
        let fragments = drain(&mut stream).await;

        let joined: String = fragments.iter().cloned().map(Fragment::into_text).collect();
        assert_eq!(joined, "Alpha comes first.");
        assert!(fragments.iter().all(|f| matches!(f, Fragment::Token(_))));
        assert_eq!(stream.state(), StreamState::Completed);
        assert_eq!(stream.answer(), Some("Alpha comes first."));
        assert_eq!(
            cache.cached_answer("doc1", "which letter is first?").await.as_deref(),
            Some("Alpha comes first.")
        );

        // A later non-streaming query is a cache hit with the same text.
        let again = orchestrator.answer("doc1", "Which letter is first?").await.unwrap();
        assert_eq!(again.answer, joined);
        assert_eq!(provider.calls(), (1, 0, 1));
    }

    #[tokio::test]
    async fn nothing_is_cached_before_the_final_poll() {
        let provider = Arc::new(FakeProvider::new().with_tokens(&["a", "b"]));
        let (orchestrator, cache) = setup(provider).await;

        let mut stream = orchestrator.stream("doc1", "q").await.unwrap();
        assert!(matches!(stream.next().await, Some(Ok(Fragment::Token(_)))));
        assert!(matches!(stream.next().await, Some(Ok(Fragment::Token(_)))));
        assert_eq!(stream.state(), StreamState::Streaming);
        assert_eq!(cache.cached_answer("doc1", "q").await, None);

        assert!(stream.next().await.is_none());
        assert_eq!(cache.cached_answer("doc1", "q").await.as_deref(), Some("ab"));
    }

    #[tokio::test]
    async fn cache_hit_yields_one_final_fragment() {
        let provider = Arc::new(FakeProvider::new());
        let (orchestrator, cache) = setup(provider.clone()).await;
        cache.store_answer("doc1", "Cached?", "Yes.").await;

        let mut stream = orchestrator.stream("doc1", "cached?").await.unwrap();
        assert_eq!(drain(&mut stream).await, vec![Fragment::Final("Yes.".to_string())]);
        assert_eq!(stream.source(), AnswerSource::Cache);
        assert!(stream.context_chunks().is_empty());
        assert_eq!(provider.calls(), (0, 0, 0));
    }

    #[tokio::test]
    async fn no_context_yields_fallback_and_caches_nothing() {
        let provider = Arc::new(FakeProvider::new());
        let (orchestrator, cache) = setup(provider.clone()).await;

        let mut stream = orchestrator.stream("missing", "q").await.unwrap();
        assert_eq!(
            drain(&mut stream).await,
            vec![Fragment::Final(NO_CONTEXT_ANSWER.to_string())]
        );
        assert_eq!(stream.source(), AnswerSource::NoContext);
        assert_eq!(provider.calls(), (1, 0, 0));
        assert_eq!(cache.cached_answer("missing", "q").await, None);
    }

    #[tokio::test]
    async fn cancel_stops_the_producer_and_caches_nothing() {
        let tokens: Vec<String> = (0..100).map(|i| format!("t{} ", i)).collect();
        let tokens: Vec<&str> = tokens.iter().map(String::as_str).collect();
        let provider = Arc::new(FakeProvider::new().with_tokens(&tokens));
        let (orchestrator, cache) = setup(provider.clone()).await;

        let mut stream = orchestrator.stream("doc1", "long question").await.unwrap();
        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_some());
        stream.cancel();

        assert_eq!(stream.state(), StreamState::Cancelled);
        assert!(stream.next().await.is_none());
        assert_eq!(stream.answer(), None);

        for _ in 0..100 {
            if provider.producer_stopped.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(provider.producer_stopped.load(Ordering::SeqCst));
        assert_eq!(cache.cached_answer("doc1", "long question").await, None);
    }

    #[tokio::test]
    async fn dropping_the_stream_acts_as_cancel() {
        let provider = Arc::new(FakeProvider::new().with_tokens(&["x"; 50]));
        let (orchestrator, cache) = setup(provider.clone()).await;

        {
            let mut stream = orchestrator.stream("doc1", "dropped").await.unwrap();
            assert!(stream.next().await.is_some());
        }

        for _ in 0..100 {
            if provider.producer_stopped.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(provider.producer_stopped.load(Ordering::SeqCst));
        assert_eq!(cache.cached_answer("doc1", "dropped").await, None);
    }

    #[tokio::test]
    async fn mid_stream_failure_is_reported_once_and_not_cached() {
        let provider = Arc::new(
            FakeProvider::new()
                .with_tokens(&["partial", " answer", " never"])
                .failing_stream_after(2),
        );
        let (orchestrator, cache) = setup(provider).await;

        let mut stream = orchestrator.stream("doc1", "q").await.unwrap();
        assert!(matches!(stream.next().await, Some(Ok(_))));
        assert!(matches!(stream.next().await, Some(Ok(_))));
        assert!(matches!(stream.next().await, Some(Err(QueryError::Generation(_)))));
        assert!(stream.next().await.is_none());
        assert_eq!(stream.state(), StreamState::Failed);
        assert_eq!(cache.cached_answer("doc1", "q").await, None);
    }

    #[tokio::test]
    async fn producer_vanishing_before_done_fails_and_caches_nothing() {
        let provider = Arc::new(
            FakeProvider::new()
                .with_tokens(&["The refund", " window is", " 30 days."])
                .abandoning_stream_after(2),
        );
        let (orchestrator, cache) = setup(provider).await;

        let mut stream = orchestrator.stream("doc1", "Refund window?").await.unwrap();
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            Fragment::Token("The refund".to_string())
        );
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            Fragment::Token(" window is".to_string())
        );
        assert!(matches!(stream.next().await, Some(Err(QueryError::Generation(_)))));
        assert!(stream.next().await.is_none());

        assert_eq!(stream.state(), StreamState::Failed);
        assert_eq!(stream.answer(), None);
        assert_eq!(cache.cached_answer("doc1", "Refund window?").await, None);
    }

    #[tokio::test]
    async fn setup_failures_surface_before_streaming() {
        let (orchestrator, _) = setup(Arc::new(FakeProvider::new().failing_embed())).await;
        assert!(matches!(
            orchestrator.stream("doc1", "q").await,
            Err(QueryError::Embedding(_))
        ));

        let (orchestrator, _) = setup(Arc::new(FakeProvider::new().failing_generate())).await;
        assert!(matches!(
            orchestrator.stream("doc1", "q").await,
            Err(QueryError::Generation(_))
        ));
    }
}
