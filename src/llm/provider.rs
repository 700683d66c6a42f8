use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::StreamEvent;
use crate::core::errors::ApiError;

/// Receiving end of a streamed answer.
pub type TokenReceiver = mpsc::Receiver<Result<StreamEvent, ApiError>>;

/// Embedding and answer generation backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name (e.g. "openai", "azure").
    fn name(&self) -> &str;

    /// One vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError>;

    /// Complete grounded answer (non-streaming).
    async fn generate(&self, question: &str, context: &str) -> Result<String, ApiError>;

    /// Grounded answer as incremental tokens followed by `StreamEvent::Done`.
    ///
    /// The producer stops once the receiver is dropped. It sends an error
    /// instead of `Done` when the upstream answer is incomplete.
    async fn generate_stream(
        &self,
        question: &str,
        context: &str,
    ) -> Result<TokenReceiver, ApiError>;
}
