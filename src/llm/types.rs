use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const SYSTEM_PROMPT: &str =
    "You are a helpful assistant that answers questions based on the provided document context.";

/// One item of a streamed answer. A producer ends a successful stream with
/// exactly one `Done`; a channel that closes without it was cut short.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Token(String),
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Grounded-answer request: fixed system message plus a user prompt
    /// carrying the retrieved context and the question.
    pub fn for_answer(question: &str, context: &str, config: &ProviderConfig) -> Self {
        let prompt = format!(
            "Answer the following question based on the provided context.\n\
             If the answer cannot be found in the context, say \"I don't have enough information to answer this question.\"\n\n\
             Context:\n{}\n\nQuestion: {}\n\nAnswer:",
            context, question
        );
        Self {
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)],
            temperature: Some(config.temperature),
            max_tokens: Some(config.max_tokens),
        }
    }
}

/// Connection and sampling settings for an OpenAI-compatible endpoint.
///
/// Setting `api_version` switches to Azure OpenAI addressing, where
/// `embedding_model` and `chat_model` name deployments.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_version: Option<String>,
    pub embedding_model: String,
    pub chat_model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            api_version: None,
            embedding_model: "text-embedding-3-small".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: 500,
            timeout: Duration::from_secs(60),
        }
    }
}
