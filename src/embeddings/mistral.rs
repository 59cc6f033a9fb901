//! Mistral embeddings API client.
//!
//! Maps the provider's HTTP surface onto [`EmbedError`]: a 400/413 response
//! is an oversized request (the signal the batcher bisects on), everything
//! else is a generic provider failure.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{EmbedError, EmbeddingProvider};
use crate::config::ConfigError;

pub const DEFAULT_ENDPOINT: &str = "https://api.mistral.ai/v1/embeddings";
pub const DEFAULT_MODEL: &str = "mistral-embed";
/// Dimension of `mistral-embed` vectors.
pub const MISTRAL_EMBED_DIMENSION: usize = 1024;

/// Connection settings for the Mistral embeddings endpoint.
#[derive(Clone, Debug)]
pub struct MistralConfig {
    pub api_key: String,
    pub endpoint: Url,
    pub model: String,
    pub dimension: usize,
}

impl MistralConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            // the default endpoint is a compile-time constant
            endpoint: Url::parse(DEFAULT_ENDPOINT).expect("default endpoint URL"),
            model: DEFAULT_MODEL.to_string(),
            dimension: MISTRAL_EMBED_DIMENSION,
        }
    }

    /// Reads `MISTRAL_API_KEY` (required) and `MISTRAL_EMBED_ENDPOINT`
    /// (optional override), honoring a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let api_key = std::env::var("MISTRAL_API_KEY").map_err(|_| ConfigError::MissingEnv {
            name: "MISTRAL_API_KEY",
        })?;
        let mut config = Self::new(api_key);
        if let Ok(raw) = std::env::var("MISTRAL_EMBED_ENDPOINT") {
            config.endpoint = Url::parse(&raw).map_err(|_| ConfigError::InvalidEnv {
                name: "MISTRAL_EMBED_ENDPOINT",
                expected: "URL",
                value: raw,
            })?;
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = endpoint;
        self
    }
}

/// [`EmbeddingProvider`] backed by the Mistral embeddings API.
pub struct MistralEmbedder {
    client: Client,
    config: MistralConfig,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl MistralEmbedder {
    pub fn new(config: MistralConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Uses a caller-supplied client, e.g. one with custom timeouts.
    pub fn with_client(config: MistralConfig, client: Client) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl EmbeddingProvider for MistralEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let response = self
            .client
            .post(self.config.endpoint.clone())
            .bearer_auth(&self.config.api_key)
            .json(&EmbeddingRequest {
                model: &self.config.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|err| EmbedError::Provider(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::PAYLOAD_TOO_LARGE {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::OversizedRequest(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Provider(format!("{status}: {body}")));
        }

        let payload: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| EmbedError::Provider(err.to_string()))?;
        if payload.data.len() != texts.len() {
            return Err(EmbedError::Provider(format!(
                "requested {} embeddings, got {}",
                texts.len(),
                payload.data.len()
            )));
        }

        // slot vectors by the index field; the API is not obliged to echo
        // input order
        let mut vectors = vec![Vec::new(); texts.len()];
        for item in payload.data {
            let slot = vectors.get_mut(item.index).ok_or_else(|| {
                EmbedError::Provider(format!("embedding index {} out of range", item.index))
            })?;
            *slot = item.embedding;
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn embedder_for(server: &MockServer) -> MistralEmbedder {
        let endpoint = Url::parse(&server.url("/v1/embeddings")).unwrap();
        let mut config = MistralConfig::new("test-key").with_endpoint(endpoint);
        config.dimension = 3;
        MistralEmbedder::new(config)
    }

    #[tokio::test]
    async fn embeds_and_honors_index_order() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/embeddings")
                    .header("authorization", "Bearer test-key")
                    .json_body_partial(r#"{"model": "mistral-embed"}"#);
                then.status(200).json_body(json!({
                    "data": [
                        {"index": 1, "embedding": [0.0, 1.0, 0.0]},
                        {"index": 0, "embedding": [1.0, 0.0, 0.0]}
                    ]
                }));
            })
            .await;

        let embedder = embedder_for(&server);
        let texts = vec!["first".to_string(), "second".to_string()];
        let vectors = embedder.embed(&texts).await.unwrap();

        mock.assert_async().await;
        assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
    }

    #[tokio::test]
    async fn bad_request_maps_to_oversized() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(400).body("too many tokens in request");
            })
            .await;

        let embedder = embedder_for(&server);
        let texts = vec!["huge".to_string()];
        let result = embedder.embed(&texts).await;

        assert!(matches!(
            result,
            Err(EmbedError::OversizedRequest(body)) if body.contains("too many tokens")
        ));
    }

    #[tokio::test]
    async fn server_error_maps_to_provider_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(500).body("internal error");
            })
            .await;

        let embedder = embedder_for(&server);
        let texts = vec!["text".to_string()];
        let result = embedder.embed(&texts).await;

        assert!(matches!(
            result,
            Err(EmbedError::Provider(message)) if message.contains("500")
        ));
    }

    #[tokio::test]
    async fn mismatched_count_is_a_provider_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(200).json_body(json!({
                    "data": [{"index": 0, "embedding": [1.0, 0.0, 0.0]}]
                }));
            })
            .await;

        let embedder = embedder_for(&server);
        let texts = vec!["one".to_string(), "two".to_string()];
        let result = embedder.embed(&texts).await;

        assert!(matches!(result, Err(EmbedError::Provider(_))));
    }
}
