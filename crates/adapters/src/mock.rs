//! Mock adapters for deterministic testing
//!
//! Configurable stand-ins for the embedding provider, the vector store and
//! the LLM, enabling reliable unit and integration tests without network
//! access. Each mock counts its calls and supports failure injection.
//!
//! # Example
//!
//! ```rust,ignore
//! use helpdesk_rag_adapters::{MockEmbedder, MockLlm, MockVectorStore};
//!
//! let llm = MockLlm::new().with_text("It depends.");
//! let store = MockVectorStore::new()
//!     .with_point("jira", "TCK-1", 0.93, "VPN drops", "https://jira/TCK-1")
//!     .with_failure("zendesk");
//! let embedder = MockEmbedder::new(1536);
//! ```

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use helpdesk_rag_core::vectors::unit_normalize;
use helpdesk_rag_core::{EmbeddingError, LlmError, VectorStoreError};

use crate::embedding::Embedder;
use crate::llm::{ChatMessage, Completion, CompletionParams, LlmClient};
use crate::vector_store::{ScoredPoint, SearchFilter, UpsertPoint, VectorStore};

/// Deterministic embedder. Unknown texts get a unit vector derived from
/// their hash; tests can pin exact vectors per text to control cosine
/// similarities.
pub struct MockEmbedder {
    dimension: usize,
    canned: RwLock<HashMap<String, Vec<f32>>>,
    calls: AtomicUsize,
    fail: RwLock<bool>,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            canned: RwLock::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            fail: RwLock::new(false),
        }
    }

    /// Pin the vector returned for `text`. Normalised on insertion.
    pub fn with_vector(self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        let normalized = unit_normalize(vector).expect("mock vector must be non-zero");
        self.canned.write().insert(text.into(), normalized);
        self
    }

    /// Make subsequent calls fail with a network error
    pub fn set_failing(&self, failing: bool) {
        *self.fail.write() = failing;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn derive(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let raw: Vec<f32> = (0..self.dimension)
            .map(|i| f32::from(digest[i % digest.len()]) + 1.0)
            .collect();
        unit_normalize(raw).expect("derived vector is non-zero")
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail.read() {
            return Err(EmbeddingError::Network("mock embedder down".into()));
        }
        if let Some(vector) = self.canned.read().get(text) {
            return Ok(vector.clone());
        }
        Ok(self.derive(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn ping(&self) -> Result<(), EmbeddingError> {
        if *self.fail.read() {
            return Err(EmbeddingError::Network("mock embedder down".into()));
        }
        Ok(())
    }
}

/// Behaviour of a mock collection
#[derive(Debug, Clone)]
enum CollectionScript {
    Hits(Vec<ScoredPoint>),
    Fail,
    Delay(Duration, Vec<ScoredPoint>),
}

/// Scripted vector store with per-collection hits, failures and delays
pub struct MockVectorStore {
    collections: RwLock<HashMap<String, CollectionScript>>,
    searches: AtomicUsize,
    reachable: RwLock<bool>,
}

impl MockVectorStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            searches: AtomicUsize::new(0),
            reachable: RwLock::new(true),
        }
    }

    /// Script full hits for a collection
    pub fn with_hits(self, collection: impl Into<String>, hits: Vec<ScoredPoint>) -> Self {
        self.collections
            .write()
            .insert(collection.into(), CollectionScript::Hits(hits));
        self
    }

    /// Convenience: add a single well-formed point to a collection
    pub fn with_point(
        self,
        collection: impl Into<String>,
        id: impl Into<String>,
        score: f32,
        title: &str,
        url: &str,
    ) -> Self {
        let collection = collection.into();
        let point = ScoredPoint {
            id: id.into(),
            score,
            payload: serde_json::json!({
                "title": title,
                "url": url,
                "content": format!("{title} - details and resolution steps."),
            }),
            vector: None,
        };
        let mut collections = self.collections.write();
        match collections.get_mut(&collection) {
            Some(CollectionScript::Hits(hits)) => hits.push(point),
            _ => {
                collections.insert(collection.clone(), CollectionScript::Hits(vec![point]));
            }
        }
        drop(collections);
        self
    }

    /// Make searches on a collection fail with a server error
    pub fn with_failure(self, collection: impl Into<String>) -> Self {
        self.collections
            .write()
            .insert(collection.into(), CollectionScript::Fail);
        self
    }

    /// Delay searches on a collection (to exercise timeouts)
    pub fn with_delay(
        self,
        collection: impl Into<String>,
        delay: Duration,
        hits: Vec<ScoredPoint>,
    ) -> Self {
        self.collections
            .write()
            .insert(collection.into(), CollectionScript::Delay(delay, hits));
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        *self.reachable.write() = reachable;
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

impl Default for MockVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for MockVectorStore {
    async fn search(
        &self,
        collection: &str,
        _vector: &[f32],
        limit: usize,
        _filter: &SearchFilter,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        let script = self.collections.read().get(collection).cloned();
        match script {
            None => Ok(Vec::new()),
            Some(CollectionScript::Hits(hits)) => Ok(hits.into_iter().take(limit).collect()),
            Some(CollectionScript::Fail) => Err(VectorStoreError::Api {
                status: 500,
                message: format!("mock failure for {collection}"),
            }),
            Some(CollectionScript::Delay(delay, hits)) => {
                tokio::time::sleep(delay).await;
                Ok(hits.into_iter().take(limit).collect())
            }
        }
    }

    async fn upsert(
        &self,
        _collection: &str,
        _points: Vec<UpsertPoint>,
    ) -> Result<(), VectorStoreError> {
        Ok(())
    }

    async fn ping(&self) -> Result<(), VectorStoreError> {
        if *self.reachable.read() {
            Ok(())
        } else {
            Err(VectorStoreError::Network("mock store down".into()))
        }
    }
}

/// Failure kinds the mock LLM can be scripted to return
#[derive(Debug, Clone, Copy)]
pub enum MockLlmFailure {
    ServerError,
    RateLimited,
    Network,
    BadRequest,
}

impl MockLlmFailure {
    fn to_error(self) -> LlmError {
        match self {
            MockLlmFailure::ServerError => LlmError::Api {
                status: 503,
                message: "mock overloaded".into(),
            },
            MockLlmFailure::RateLimited => LlmError::RateLimited,
            MockLlmFailure::Network => LlmError::Network("mock connection reset".into()),
            MockLlmFailure::BadRequest => LlmError::Api {
                status: 400,
                message: "mock rejected prompt".into(),
            },
        }
    }
}

enum ScriptedResponse {
    Completion(Completion),
    Failure(MockLlmFailure),
}

/// Scripted LLM. Responses are consumed in order; once the script is
/// empty, a deterministic default completion is produced.
pub struct MockLlm {
    script: Mutex<VecDeque<ScriptedResponse>>,
    default_text: String,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl MockLlm {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_text: "mock answer".to_string(),
            latency: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Text of the default completion once the script runs out
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.default_text = text.into();
        self
    }

    /// Queue a scripted completion
    pub fn with_completion(self, text: impl Into<String>, prompt: u32, completion: u32) -> Self {
        self.script
            .lock()
            .push_back(ScriptedResponse::Completion(Completion {
                text: text.into(),
                prompt_tokens: prompt,
                completion_tokens: completion,
            }));
        self
    }

    /// Queue a scripted failure
    pub fn with_failure(self, failure: MockLlmFailure) -> Self {
        self.script
            .lock()
            .push_back(ScriptedResponse::Failure(failure));
        self
    }

    /// Simulate provider latency on every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _params: &CompletionParams,
    ) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match self.script.lock().pop_front() {
            Some(ScriptedResponse::Completion(completion)) => Ok(completion),
            Some(ScriptedResponse::Failure(failure)) => Err(failure.to_error()),
            None => {
                let prompt_chars: usize = messages.iter().map(|m| m.content.len()).sum();
                Ok(Completion {
                    text: self.default_text.clone(),
                    prompt_tokens: (prompt_chars / 4) as u32,
                    completion_tokens: (self.default_text.len() / 4) as u32,
                })
            }
        }
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn ping(&self) -> Result<(), LlmError> {
        Ok(())
    }
}
