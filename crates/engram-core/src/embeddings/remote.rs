//! Remote HTTP embedding provider
//!
//! Client for an Ollama-compatible `/api/embeddings` endpoint. Transient
//! failures are retried with bounded exponential backoff before the error
//! surfaces as `BackendUnavailable`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{EmbeddingError, EmbeddingProvider, MAX_TEXT_LENGTH, truncate_normalized};

/// Configuration for the remote embedding client
#[derive(Debug, Clone)]
pub struct RemoteEmbedderConfig {
    /// Endpoint base URL
    pub url: String,
    /// Model name passed to the endpoint
    pub model: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum retries on transient failure
    pub max_retries: usize,
    /// Base retry delay in milliseconds (doubles per attempt)
    pub retry_delay_ms: u64,
}

impl Default for RemoteEmbedderConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("ENGRAM_EMBEDDING_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:11434".to_string()),
            model: std::env::var("ENGRAM_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "nomic-embed-text".to_string()),
            timeout_secs: 30,
            max_retries: 3,
            retry_delay_ms: 250,
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Embedding provider backed by a remote HTTP endpoint
pub struct RemoteEmbedder {
    config: RemoteEmbedderConfig,
    client: reqwest::blocking::Client,
}

impl RemoteEmbedder {
    /// Create a client with the given configuration
    pub fn new(config: RemoteEmbedderConfig) -> Result<Self, EmbeddingError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::BackendUnavailable(e.to_string()))?;

        tracing::info!(
            url = %config.url,
            model = %config.model,
            "remote embedder initialized"
        );

        Ok(Self { config, client })
    }

    /// Create a client from environment defaults
    pub fn from_env() -> Result<Self, EmbeddingError> {
        Self::new(RemoteEmbedderConfig::default())
    }

    fn request_once(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let endpoint = format!("{}/api/embeddings", self.config.url.trim_end_matches('/'));
        let body = EmbeddingRequest {
            model: &self.config.model,
            prompt: text,
        };

        let response = self
            .client
            .post(&endpoint)
            .json(&body)
            .send()
            .map_err(|e| EmbeddingError::BackendUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmbeddingError::BackendUnavailable(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .map_err(|e| EmbeddingError::BackendUnavailable(e.to_string()))?;

        if parsed.embedding.is_empty() {
            return Err(EmbeddingError::BackendUnavailable(
                "endpoint returned an empty embedding".into(),
            ));
        }

        Ok(parsed.embedding)
    }

    fn request_with_retry(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);
        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            match self.request_once(text) {
                Ok(vector) => return Ok(vector),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "remote embedding attempt failed");
                    last_err = Some(e);
                    if attempt < self.config.max_retries {
                        std::thread::sleep(delay);
                        delay *= 2;
                    }
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| EmbeddingError::BackendUnavailable("no attempts made".into())))
    }
}

impl EmbeddingProvider for RemoteEmbedder {
    fn name(&self) -> &str {
        "remote"
    }

    fn embed_one(&self, text: &str, dimension: usize) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("text cannot be empty".into()));
        }

        let text = if text.len() > MAX_TEXT_LENGTH {
            let mut end = MAX_TEXT_LENGTH;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            &text[..end]
        } else {
            text
        };

        let vector = self.request_with_retry(text)?;
        if vector.len() < dimension {
            return Err(EmbeddingError::DimensionMismatch {
                requested: dimension,
                produced: vector.len(),
            });
        }

        Ok(truncate_normalized(vector, dimension))
    }
}
