use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::provider::{Provider, TokenReceiver};
use super::types::{ChatRequest, ProviderConfig, StreamEvent};
use crate::core::errors::ApiError;

/// OpenAI-compatible HTTP provider.
///
/// Speaks the plain OpenAI REST layout (`/chat/completions`, `/embeddings`
/// under `base_url`, bearer auth) or, when `api_version` is configured, the
/// Azure OpenAI deployment layout with an `api-key` header.
#[derive(Clone)]
pub struct OpenAiProvider {
    config: ProviderConfig,
    client: Client,
}

enum Endpoint {
    Chat,
    Embeddings,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ApiError::internal)?;
        Ok(Self { config, client })
    }

    fn is_azure(&self) -> bool {
        self.config.api_version.is_some()
    }

    fn url(&self, endpoint: Endpoint) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let (path, deployment) = match endpoint {
            Endpoint::Chat => ("chat/completions", &self.config.chat_model),
            Endpoint::Embeddings => ("embeddings", &self.config.embedding_model),
        };
        match &self.config.api_version {
            Some(version) => format!(
                "{}/openai/deployments/{}/{}?api-version={}",
                base, deployment, path, version
            ),
            None => format!("{}/{}", base, path),
        }
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) if self.is_azure() => builder.header("api-key", key),
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn chat_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.config.chat_model,
            "messages": request.messages,
            "stream": stream,
        });
        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
            if let Some(t) = request.max_tokens {
                obj.insert("max_tokens".to_string(), json!(t));
            }
        }
        body
    }

    async fn post_chat(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response, ApiError> {
        let res = self
            .authorize(self.client.post(self.url(Endpoint::Chat)))
            .json(&self.chat_body(request, stream))
            .send()
            .await
            .map_err(ApiError::unavailable)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::ServiceUnavailable(format!(
                "{} chat error ({}): {}",
                self.name(),
                status,
                text
            )));
        }
        Ok(res)
    }
}

/// Classify one SSE line; keep-alives, role-only and empty deltas are skipped.
fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    let Ok(json) = serde_json::from_str::<Value>(data) else {
        return SseLine::Skip;
    };
    if let Some(error) = json.get("error").filter(|e| !e.is_null()) {
        let message = error["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return SseLine::Error(message);
    }
    match json["choices"][0]["delta"]["content"].as_str() {
        Some(content) if !content.is_empty() => SseLine::Token(content.to_string()),
        _ => SseLine::Skip,
    }
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Token(String),
    Done,
    Error(String),
    Skip,
}

/// Forward one parsed line; `false` once the producer should stop.
async fn forward_sse_line(
    tx: &mpsc::Sender<Result<StreamEvent, ApiError>>,
    line: SseLine,
    provider: &str,
) -> bool {
    let event = match line {
        SseLine::Skip => return true,
        SseLine::Token(content) => Ok(StreamEvent::Token(content)),
        SseLine::Done => Ok(StreamEvent::Done),
        SseLine::Error(message) => Err(ApiError::ServiceUnavailable(format!(
            "{} stream error: {}",
            provider, message
        ))),
    };
    let keep_going = matches!(event, Ok(StreamEvent::Token(_)));
    if tx.send(event).await.is_err() {
        tracing::debug!("Stream receiver dropped, stopping");
        return false;
    }
    keep_going
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        if self.is_azure() {
            "azure"
        } else {
            "openai"
        }
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!(
            "Generating embeddings for {} texts using '{}'",
            texts.len(),
            self.config.embedding_model
        );

        let body = json!({
            "model": self.config.embedding_model,
            "input": texts,
        });

        let res = self
            .authorize(self.client.post(self.url(Endpoint::Embeddings)))
            .json(&body)
            .send()
            .await
            .map_err(ApiError::unavailable)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::ServiceUnavailable(format!(
                "{} embed error ({}): {}",
                self.name(),
                status,
                text
            )));
        }

        let payload: Value = res.json().await.map_err(ApiError::unavailable)?;

        let mut indexed: Vec<(u64, Vec<f32>)> = Vec::new();
        if let Some(data) = payload["data"].as_array() {
            for (position, item) in data.iter().enumerate() {
                if let Some(vals) = item["embedding"].as_array() {
                    let index = item["index"].as_u64().unwrap_or(position as u64);
                    let vec: Vec<f32> = vals
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect();
                    indexed.push((index, vec));
                }
            }
        }
        indexed.sort_by_key(|(index, _)| *index);

        if indexed.len() != texts.len() {
            return Err(ApiError::ServiceUnavailable(format!(
                "{} returned {} embeddings for {} inputs",
                self.name(),
                indexed.len(),
                texts.len()
            )));
        }

        Ok(indexed.into_iter().map(|(_, vec)| vec).collect())
    }

    async fn generate(&self, question: &str, context: &str) -> Result<String, ApiError> {
        tracing::info!("Generating answer using '{}'", self.config.chat_model);
        let request = ChatRequest::for_answer(question, context, &self.config);
        let res = self.post_chat(&request, false).await?;

        let payload: Value = res.json().await.map_err(ApiError::unavailable)?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .trim()
            .to_string();

        Ok(content)
    }

    async fn generate_stream(
        &self,
        question: &str,
        context: &str,
    ) -> Result<TokenReceiver, ApiError> {
        tracing::info!("Generating streaming answer using '{}'", self.config.chat_model);
        let request = ChatRequest::for_answer(question, context, &self.config);
        let res = self.post_chat(&request, true).await?;

        let (tx, rx) = mpsc::channel(32);
        let mut stream = res.bytes_stream();
        let provider = self.name().to_string();

        tokio::spawn(async move {
            // SSE lines may straddle network chunks.
            let mut pending: Vec<u8> = Vec::new();
            while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) => {
                        pending.extend_from_slice(&bytes);
                        while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
                            let line: Vec<u8> = pending.drain(..=newline).collect();
                            let line = parse_sse_line(&String::from_utf8_lossy(&line));
                            if !forward_sse_line(&tx, line, &provider).await {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(ApiError::unavailable(e))).await;
                        return;
                    }
                }
            }

            let tail = parse_sse_line(&String::from_utf8_lossy(&pending));
            if !forward_sse_line(&tx, tail, &provider).await {
                return;
            }
            tracing::warn!("{} stream ended before [DONE]", provider);
            let _ = tx
                .send(Err(ApiError::ServiceUnavailable(format!(
                    "{} stream ended before completion",
                    provider
                ))))
                .await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};

    fn provider(base_url: &str, api_version: Option<&str>) -> OpenAiProvider {
        OpenAiProvider::new(ProviderConfig {
            base_url: base_url.to_string(),
            api_key: Some("sk-test".to_string()),
            api_version: api_version.map(str::to_string),
            embedding_model: "embed-deploy".to_string(),
            chat_model: "chat-deploy".to_string(),
            ..ProviderConfig::default()
        })
        .unwrap()
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn builds_openai_and_azure_urls() {
        let openai = provider("https://api.openai.com/v1/", None);
        assert_eq!(openai.url(Endpoint::Chat), "https://api.openai.com/v1/chat/completions");
        assert_eq!(openai.name(), "openai");

        let azure = provider("https://acme.openai.azure.com", Some("2024-02-01"));
        assert_eq!(
            azure.url(Endpoint::Embeddings),
            "https://acme.openai.azure.com/openai/deployments/embed-deploy/embeddings?api-version=2024-02-01"
        );
        assert_eq!(azure.name(), "azure");
    }

    #[test]
    fn parses_sse_lines() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#),
            SseLine::Token("Hi".to_string())
        );
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            SseLine::Skip
        );
        assert_eq!(
            parse_sse_line(r#"data: {"error":{"message":"content filtered"}}"#),
            SseLine::Error("content filtered".to_string())
        );
    }

    async fn stream_from(lines: &'static [&'static str]) -> Vec<Result<StreamEvent, ApiError>> {
        let router = Router::new().route(
            "/chat/completions",
            post(move || async move { lines.join("\n\n") }),
        );
        let base = serve(router).await;

        let mut rx = provider(&base, None)
            .generate_stream("Refund window?", "Refunds within 30 days.")
            .await
            .unwrap();
        let mut events = Vec::new();
        while let Some(item) = rx.recv().await {
            events.push(item);
        }
        events
    }

    #[tokio::test]
    async fn embed_restores_input_order() {
        let router = Router::new().route(
            "/embeddings",
            post(|| async {
                Json(json!({
                    "data": [
                        { "index": 1, "embedding": [0.0, 1.0] },
                        { "index": 0, "embedding": [1.0, 0.0] }
                    ]
                }))
            }),
        );
        let base = serve(router).await;

        let vectors = provider(&base, None)
            .embed(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn embed_count_mismatch_is_an_error() {
        let router = Router::new().route(
            "/embeddings",
            post(|| async { Json(json!({ "data": [{ "index": 0, "embedding": [1.0] }] })) }),
        );
        let base = serve(router).await;

        let result = provider(&base, None)
            .embed(&["a".to_string(), "b".to_string()])
            .await;
        assert!(matches!(result, Err(ApiError::ServiceUnavailable(_))));
    }

    #[tokio::test]
    async fn generate_trims_completion_and_sends_sampling() {
        let router = Router::new().route(
            "/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["max_tokens"], json!(500));
                assert_eq!(body["stream"], json!(false));
                Json(json!({
                    "choices": [{ "message": { "content": "  Thirty days.\n" } }]
                }))
            }),
        );
        let base = serve(router).await;

        let answer = provider(&base, None)
            .generate("Refund window?", "Refunds within 30 days.")
            .await
            .unwrap();
        assert_eq!(answer, "Thirty days.");
    }

    #[tokio::test]
    async fn generate_stream_yields_tokens_until_done() {
        let events = stream_from(&[
            r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"Thirty"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":" days."}}]}"#,
            "data: [DONE]",
            r#"data: {"choices":[{"delta":{"content":"ignored"}}]}"#,
        ])
        .await;

        let events: Vec<StreamEvent> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            events,
            vec![
                StreamEvent::Token("Thirty".to_string()),
                StreamEvent::Token(" days.".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn body_ending_without_done_is_an_error() {
        let events = stream_from(&[
            r#"data: {"choices":[{"delta":{"content":"The refund"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":" window is"}}]}"#,
        ])
        .await;

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], Ok(StreamEvent::Token(t)) if t == "The refund"));
        assert!(matches!(&events[1], Ok(StreamEvent::Token(t)) if t == " window is"));
        assert!(matches!(&events[2], Err(ApiError::ServiceUnavailable(msg)) if msg.contains("before completion")));
    }

    #[tokio::test]
    async fn error_payload_ends_the_stream_with_an_error() {
        let events = stream_from(&[
            r#"data: {"choices":[{"delta":{"content":"Partial"}}]}"#,
            r#"data: {"error":{"message":"upstream overloaded"}}"#,
            "data: [DONE]",
        ])
        .await;

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], Err(ApiError::ServiceUnavailable(msg)) if msg.contains("upstream overloaded")));
    }

    #[tokio::test]
    async fn upstream_failure_maps_to_unavailable() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { (axum::http::StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        );
        let base = serve(router).await;

        let err = provider(&base, None).generate("q", "c").await.unwrap_err();
        assert!(matches!(err, ApiError::ServiceUnavailable(msg) if msg.contains("slow down")));
    }
}
