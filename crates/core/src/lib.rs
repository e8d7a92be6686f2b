//! # Helpdesk RAG Core
//!
//! Shared types, errors and configuration for the helpdesk RAG gateway.
//!
//! This crate holds the data model every other member of the workspace
//! speaks: queries, hits, answers, the error taxonomy and the closed
//! configuration record.

pub mod config;
pub mod errors;
pub mod types;
pub mod vectors;

pub use config::{
    BreakerConfig, CacheConfig, ConfigError, EmbeddingConfig, GatewayConfig, LlmConfig,
    LlmProvider, PipelineConfig, SemanticConfig, VectorStoreConfig,
};
pub use errors::{
    CacheError, EmbeddingError, ErrorObject, GatewayError, LlmError, Transience, VectorStoreError,
};
pub use types::{
    Answer, AnswerBlock, AnswerMetrics, AnswerMode, CacheOutcome, Citation, Hit, HitPayload,
    Query, RankedHit, SourceId,
};
