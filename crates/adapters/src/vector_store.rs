//! Vector store client
//!
//! Thin adapter over an external vector database exposing similarity search
//! and upsert per collection. The HTTP implementation speaks the Qdrant
//! points API; everything above it only sees the [`VectorStore`] trait.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use helpdesk_rag_core::{VectorStoreConfig, VectorStoreError};

/// One scored point returned from a collection search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

/// A point to upsert into a collection
#[derive(Debug, Clone, Serialize)]
pub struct UpsertPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Value,
}

/// Metadata restriction applied to a search
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Restrict hits to documents tagged for this tenant
    pub tenant: Option<String>,
}

impl SearchFilter {
    pub fn for_tenant(tenant: Option<String>) -> Self {
        Self { tenant }
    }

    fn to_qdrant(&self) -> Option<Value> {
        self.tenant.as_ref().map(|tenant| {
            serde_json::json!({
                "must": [
                    { "key": "client", "match": { "value": tenant } }
                ]
            })
        })
    }
}

/// Similarity search and upsert over named collections
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError>;

    async fn upsert(
        &self,
        collection: &str,
        points: Vec<UpsertPoint>,
    ) -> Result<(), VectorStoreError>;

    /// Cheap reachability check used by readiness probes
    async fn ping(&self) -> Result<(), VectorStoreError>;
}

const STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Qdrant-style HTTP vector store
pub struct QdrantStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl QdrantStore {
    pub fn new(config: &VectorStoreConfig) -> Self {
        Self {
            client: crate::client::pooled_client(),
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.timeout(STORE_TIMEOUT);
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    fn map_send_error(e: reqwest::Error) -> VectorStoreError {
        if e.is_timeout() {
            VectorStoreError::Timeout(STORE_TIMEOUT.as_millis() as u64)
        } else {
            VectorStoreError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        let mut body = serde_json::json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
            "with_vector": true,
        });
        if let Some(qdrant_filter) = filter.to_qdrant() {
            body["filter"] = qdrant_filter;
        }

        let url = format!("{}/collections/{}/points/search", self.base_url, collection);
        let response = self
            .request(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                404 => VectorStoreError::UnknownCollection(collection.to_string()),
                429 => VectorStoreError::RateLimited,
                code => VectorStoreError::Api { status: code, message },
            });
        }

        let api_response: SearchResponse = response
            .json()
            .await
            .map_err(|e| VectorStoreError::InvalidResponse(e.to_string()))?;

        Ok(api_response
            .result
            .into_iter()
            .map(|point| ScoredPoint {
                // Qdrant ids are numbers or UUID strings
                id: match point.id {
                    Value::String(s) => s,
                    other => other.to_string(),
                },
                score: point.score,
                payload: point.payload.unwrap_or(Value::Null),
                vector: point.vector,
            })
            .collect())
    }

    async fn upsert(
        &self,
        collection: &str,
        points: Vec<UpsertPoint>,
    ) -> Result<(), VectorStoreError> {
        let url = format!("{}/collections/{}/points", self.base_url, collection);
        let body = serde_json::json!({ "points": points });

        let response = self
            .request(self.client.put(&url))
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                404 => VectorStoreError::UnknownCollection(collection.to_string()),
                429 => VectorStoreError::RateLimited,
                code => VectorStoreError::Api { status: code, message },
            });
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), VectorStoreError> {
        let url = format!("{}/collections", self.base_url);
        let response = self
            .request(self.client.get(&url))
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(VectorStoreError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<RawPoint>,
}

#[derive(Deserialize)]
struct RawPoint {
    id: Value,
    score: f32,
    payload: Option<Value>,
    vector: Option<Vec<f32>>,
}
