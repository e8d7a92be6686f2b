//! Embedding client
//!
//! Turns text into a fixed-dimension unit-normalised vector via an external
//! provider, with a small in-process LRU on text -> vector so the same
//! question is never embedded twice in quick succession.

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::time::Duration;
use tracing::debug;

use helpdesk_rag_core::vectors::unit_normalize;
use helpdesk_rag_core::{EmbeddingConfig, EmbeddingError};

/// Produces unit-normalised embeddings of a fixed dimension
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embedding dimension every returned vector has
    fn dimension(&self) -> usize;

    /// Cheap reachability check used by readiness probes
    async fn ping(&self) -> Result<(), EmbeddingError>;
}

const EMBED_CACHE_SIZE: usize = 1000;
const EMBED_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP embedding client against an OpenAI-style `/v1/embeddings` endpoint
pub struct HttpEmbedder {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    dimension: usize,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            client: crate::client::pooled_client(),
            url: config.provider_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimension: config.dim,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(EMBED_CACHE_SIZE).unwrap(),
            )),
        }
    }

    async fn fetch(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(EMBED_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbeddingError::Timeout(EMBED_TIMEOUT.as_millis() as u64)
                } else {
                    EmbeddingError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => EmbeddingError::RateLimited,
                code => EmbeddingError::Api { status: code, message },
            });
        }

        let api_response: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        let raw = api_response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("no embeddings in response".into()))?
            .embedding;

        if raw.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                got: raw.len(),
            });
        }

        unit_normalize(raw)
            .ok_or_else(|| EmbeddingError::InvalidResponse("provider returned a zero vector".into()))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if let Some(vector) = self.cache.lock().get(text) {
            debug!(len = text.len(), "embedding cache hit");
            return Ok(vector.clone());
        }

        let vector = self.fetch(text).await?;
        self.cache.lock().put(text.to_string(), vector.clone());
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn ping(&self) -> Result<(), EmbeddingError> {
        self.fetch("ping").await.map(|_| ())
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
