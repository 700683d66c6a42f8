pub mod openai;
pub mod provider;
pub mod types;

pub use openai::OpenAiProvider;
pub use provider::{Provider, TokenReceiver};
pub use types::{ChatMessage, ChatRequest, ProviderConfig, StreamEvent};
