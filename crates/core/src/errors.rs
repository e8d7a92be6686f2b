//! Error types for the gateway

use std::time::Duration;
use thiserror::Error;

/// Classification shared by the retry executor and the circuit breakers.
///
/// Transient failures are retried and count against a breaker at full
/// weight; rate limits count at half weight; everything else neither
/// retries nor trips a breaker.
pub trait Transience {
    /// Whether a retry may succeed
    fn is_transient(&self) -> bool;

    /// Weight this failure contributes to a circuit-breaker window.
    /// 1.0 for timeouts/5xx/unavailable, 0.5 for rate limits, 0.0 for
    /// caller errors.
    fn failure_weight(&self) -> f32 {
        if self.is_transient() {
            1.0
        } else {
            0.0
        }
    }

    /// Provider-suggested wait before retrying, when known
    fn retry_after_hint(&self) -> Option<Duration> {
        None
    }
}

/// Embedding provider errors
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Timeout: request took longer than {0}ms")]
    Timeout(u64),
}

impl Transience for EmbeddingError {
    fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::Network(_) | EmbeddingError::Timeout(_) => true,
            EmbeddingError::RateLimited => true,
            EmbeddingError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    fn failure_weight(&self) -> f32 {
        match self {
            EmbeddingError::RateLimited => 0.5,
            e if e.is_transient() => 1.0,
            _ => 0.0,
        }
    }
}

/// Vector store errors
#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout: search took longer than {0}ms")]
    Timeout(u64),
}

impl Transience for VectorStoreError {
    fn is_transient(&self) -> bool {
        match self {
            VectorStoreError::Network(_) | VectorStoreError::Timeout(_) => true,
            VectorStoreError::RateLimited => true,
            VectorStoreError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    fn failure_weight(&self) -> f32 {
        match self {
            VectorStoreError::RateLimited => 0.5,
            e if e.is_transient() => 1.0,
            _ => 0.0,
        }
    }
}

/// LLM provider errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout: completion took longer than {0}ms")]
    Timeout(u64),
}

impl Transience for LlmError {
    fn is_transient(&self) -> bool {
        match self {
            LlmError::Network(_) | LlmError::Timeout(_) => true,
            LlmError::RateLimited => true,
            LlmError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    fn failure_weight(&self) -> f32 {
        match self {
            LlmError::RateLimited => 0.5,
            e if e.is_transient() => 1.0,
            _ => 0.0,
        }
    }
}

/// Cache errors. The cache recovers locally wherever it can; these surface
/// only from explicit operations like invalidation.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Entry too large: {size} bytes exceeds cache capacity {max}")]
    EntryTooLarge { size: usize, max: usize },
}

/// The error surfaced to the caller of the gateway.
///
/// Everything recoverable is recovered below this level; what remains maps
/// 1:1 onto the wire error object.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {message}")]
    Unavailable {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Deadline exceeded")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable wire code for this error
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::Unavailable { .. } => "unavailable",
            GatewayError::Timeout => "timeout",
            GatewayError::Internal(_) => "internal",
        }
    }
}

/// Wire form of a user-visible failure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl From<&GatewayError> for ErrorObject {
    fn from(err: &GatewayError) -> Self {
        let retry_after_ms = match err {
            GatewayError::Unavailable { retry_after, .. } => {
                retry_after.map(|d| d.as_millis() as u64)
            }
            _ => None,
        };
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            retry_after_ms,
        }
    }
}
