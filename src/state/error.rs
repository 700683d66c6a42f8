use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to load configuration: {0}")]
    Config(#[source] anyhow::Error),

    #[error("Failed to initialize document registry: {0}")]
    Documents(#[source] anyhow::Error),

    #[error("Failed to initialize query history store: {0}")]
    History(#[source] anyhow::Error),

    #[error("Failed to initialize vector index: {0}")]
    VectorIndex(#[source] anyhow::Error),

    #[error("Failed to initialize result cache: {0}")]
    Cache(#[source] anyhow::Error),

    #[error("Failed to initialize LLM provider: {0}")]
    Provider(#[source] anyhow::Error),
}
