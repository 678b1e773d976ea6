//! HTTP client for the external embedding service

use crate::error::{EmbeddingError, EmbeddingResult, is_auth_error};
use async_trait::async_trait;
use codescout_config::EmbeddingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded retries against transient provider failures
const MAX_RETRIES: u32 = 2;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Trait for embedding backends
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts under the given model.
    ///
    /// The returned vectors are positionally aligned with `inputs` and all
    /// share the model's fixed dimension.
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError::Auth`] on rejected credentials,
    /// [`EmbeddingError::Transient`] after retries are exhausted, and
    /// [`EmbeddingError::Provider`] for everything else.
    async fn embed(&self, model: &str, inputs: &[String]) -> EmbeddingResult<Vec<Vec<f32>>>;
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// Accepts both the OpenAI-style `data[].embedding` envelope and the plain
/// `embeddings` array some providers return.
#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddingsResponse {
    Data { data: Vec<EmbeddingDatum> },
    Plain { embeddings: Vec<Vec<f32>> },
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl EmbeddingsResponse {
    fn into_vectors(self) -> Vec<Vec<f32>> {
        match self {
            Self::Data { data } => data.into_iter().map(|d| d.embedding).collect(),
            Self::Plain { embeddings } => embeddings,
        }
    }
}

/// Embedding client for an OpenAI-compatible `/embeddings` endpoint
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpEmbeddingProvider {
    /// Build the provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError::Provider`] if the HTTP client cannot be
    /// constructed.
    pub fn new(config: &EmbeddingConfig) -> EmbeddingResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EmbeddingError::Provider(format!("Failed to build HTTP client: {e}")))?;

        let endpoint = format!("{}/embeddings", config.api_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
        })
    }

    async fn request_once(&self, model: &str, inputs: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let mut request = self.client.post(&self.endpoint).json(&EmbeddingsRequest {
            model,
            input: inputs,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                EmbeddingError::Transient(e.to_string())
            } else {
                EmbeddingError::Provider(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("{status}: {body}");
            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
                || is_auth_error(&message)
            {
                return Err(EmbeddingError::Auth(message));
            }
            if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(EmbeddingError::Transient(message));
            }
            return Err(EmbeddingError::Provider(message));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Provider(format!("Malformed embeddings response: {e}")))?;
        Ok(parsed.into_vectors())
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    #[tracing::instrument(skip(self, inputs), fields(model, batch = inputs.len()))]
    async fn embed(&self, model: &str, inputs: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut attempt = 0u32;
        loop {
            match self.request_once(model, inputs).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                    let delay = RETRY_BASE_DELAY * 2u32.saturating_pow(attempt);
                    tracing::warn!(attempt, error = %e, "Transient embedding failure, retrying");
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> EmbeddingConfig {
        EmbeddingConfig {
            api_url: server.uri(),
            api_key: Some("sk-test".to_string()),
            model: "test-model".to_string(),
            max_tokens: 8000,
            concurrency: 2,
        }
    }

    #[tokio::test]
    async fn test_embed_parses_openai_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_partial_json(serde_json::json!({"model": "test-model"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"embedding": [0.1, 0.2]},
                    {"embedding": [0.3, 0.4]}
                ]
            })))
            .mount(&server)
            .await;

        let provider = HttpEmbeddingProvider::new(&config_for(&server)).unwrap();
        let vectors = provider
            .embed("test-model", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn test_embed_parses_plain_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[1.0, 0.0]]
            })))
            .mount(&server)
            .await;

        let provider = HttpEmbeddingProvider::new(&config_for(&server)).unwrap();
        let vectors = provider.embed("test-model", &["a".to_string()]).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0]]);
    }

    #[tokio::test]
    async fn test_unauthorized_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let provider = HttpEmbeddingProvider::new(&config_for(&server)).unwrap();
        let err = provider
            .embed("test-model", &["a".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::Auth(_)));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_surface_as_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3) // initial call + 2 retries
            .mount(&server)
            .await;

        let provider = HttpEmbeddingProvider::new(&config_for(&server)).unwrap();
        let err = provider
            .embed("test-model", &["a".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_empty_input_short_circuits() {
        let server = MockServer::start().await;
        // No mock mounted: any request would 404
        let provider = HttpEmbeddingProvider::new(&config_for(&server)).unwrap();
        let vectors = provider.embed("test-model", &[]).await.unwrap();
        assert!(vectors.is_empty());
    }
}
