//! Typed view over the merged YAML/env configuration.
//!
//! Every value has a default, so an empty config yields the reference
//! deployment (1000/200 chunking, top-5 retrieval, one hour cache TTL).

use std::time::Duration;

use serde_json::Value;

use crate::llm::ProviderConfig;
use crate::query::QueryOptions;
use crate::rag::ChunkerConfig;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_MAX_DOCUMENT_MB: u64 = 10;
pub const DEFAULT_INGEST_CONCURRENCY: usize = 2;
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub chunking: ChunkerConfig,
    pub query: QueryOptions,
    pub cache_ttl: Duration,
    pub max_document_bytes: u64,
    pub ingest_concurrency: usize,
    /// `None` disables the dimension check on upsert.
    pub embedding_dimension: Option<usize>,
    pub provider: ProviderConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&Value::Null)
    }
}

impl Settings {
    pub fn from_config(config: &Value) -> Self {
        let section = |name: &str| config.get(name);
        let u64_at = |name: &str, key: &str| {
            section(name)
                .and_then(|v| v.get(key))
                .and_then(|v| v.as_u64())
        };
        let str_at = |name: &str, key: &str| {
            section(name)
                .and_then(|v| v.get(key))
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let server = ServerSettings {
            host: str_at("server", "host").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: u64_at("server", "port")
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(DEFAULT_PORT),
            cors_allowed_origins: section("server")
                .and_then(|v| v.get("cors_allowed_origins"))
                .and_then(|v| v.as_array())
                .map(|list| {
                    list.iter()
                        .filter_map(|item| item.as_str())
                        .map(str::trim)
                        .filter(|item| !item.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        };

        let chunk_defaults = ChunkerConfig::default();
        let chunk_size = u64_at("chunking", "chunk_size")
            .map(|v| v as usize)
            .unwrap_or(chunk_defaults.chunk_size)
            .max(1);
        let chunk_overlap = u64_at("chunking", "chunk_overlap")
            .map(|v| v as usize)
            .unwrap_or(chunk_defaults.chunk_overlap)
            .min(chunk_size - 1);

        let query_defaults = QueryOptions::default();
        let top_k = u64_at("retrieval", "top_k")
            .map(|v| v as usize)
            .unwrap_or(query_defaults.top_k)
            .clamp(1, 1_000);
        let stream_top_k = u64_at("retrieval", "stream_top_k")
            .map(|v| v as usize)
            .unwrap_or(top_k)
            .clamp(1, 1_000);

        let embedding_dimension = match u64_at("vector_index", "dimension") {
            Some(0) => None,
            Some(dim) => Some(dim as usize),
            None => Some(DEFAULT_EMBEDDING_DIMENSION),
        };

        let provider_defaults = ProviderConfig::default();
        let provider = ProviderConfig {
            base_url: str_at("provider", "base_url").unwrap_or(provider_defaults.base_url),
            api_key: str_at("provider", "api_key"),
            api_version: str_at("provider", "api_version"),
            embedding_model: str_at("provider", "embedding_model")
                .unwrap_or(provider_defaults.embedding_model),
            chat_model: str_at("provider", "chat_model").unwrap_or(provider_defaults.chat_model),
            temperature: section("provider")
                .and_then(|v| v.get("temperature"))
                .and_then(|v| v.as_f64())
                .unwrap_or(provider_defaults.temperature)
                .clamp(0.0, 2.0),
            max_tokens: u64_at("provider", "max_tokens")
                .map(|v| v.min(u32::MAX as u64) as u32)
                .unwrap_or(provider_defaults.max_tokens),
            timeout: u64_at("provider", "timeout_secs")
                .map(Duration::from_secs)
                .unwrap_or(provider_defaults.timeout),
        };

        Self {
            server,
            chunking: ChunkerConfig {
                chunk_size,
                chunk_overlap,
            },
            query: QueryOptions {
                top_k,
                stream_top_k,
            },
            cache_ttl: Duration::from_secs(
                u64_at("cache", "ttl_secs")
                    .unwrap_or(DEFAULT_CACHE_TTL_SECS)
                    .max(1),
            ),
            max_document_bytes: u64_at("documents", "max_size_mb")
                .unwrap_or(DEFAULT_MAX_DOCUMENT_MB)
                .max(1)
                * 1024
                * 1024,
            ingest_concurrency: u64_at("ingest", "concurrency")
                .map(|v| v as usize)
                .unwrap_or(DEFAULT_INGEST_CONCURRENCY)
                .clamp(1, 64),
            embedding_dimension,
            provider,
        }
    }
}
