//! Gateway configuration
//!
//! A closed record: every option is enumerated below and unknown fields are
//! rejected at load time. Defaults match the documented operating point of
//! the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::types::SourceId;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    pub embedding: EmbeddingConfig,
    pub vector_store: VectorStoreConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    /// Relative ranking weight per source, 1.0 when absent
    #[serde(default)]
    pub source_weights: HashMap<SourceId, f32>,
    /// Client keyword -> sources configured for that client
    #[serde(default)]
    pub clients: HashMap<String, Vec<SourceId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Embedding dimension, required (e.g. 1536)
    pub dim: usize,
    pub provider_url: String,
    pub api_key: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VectorStoreConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Source -> collection name; the key set is the closed set of sources
    pub collections: HashMap<SourceId, String>,
}

/// Which completion provider to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub api_key: String,
    #[serde(default)]
    pub provider_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub max_bytes: usize,
    pub ttl_base_seconds: u64,
    pub semantic: SemanticConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_bytes: 256 * 1024 * 1024,
            ttl_base_seconds: 3600,
            semantic: SemanticConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn ttl_base(&self) -> Duration {
        Duration::from_secs(self.ttl_base_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SemanticConfig {
    pub enabled: bool,
    pub base_threshold: f32,
    pub min_threshold: f32,
    pub max_threshold: f32,
    /// Threshold relaxation per doubling of an entry's hit count
    pub k_boost: f32,
    /// Size of the recently-touched ring scanned before the full index
    pub recent_window: usize,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_threshold: 0.88,
            min_threshold: 0.78,
            max_threshold: 0.95,
            k_boost: 0.01,
            recent_window: 128,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    pub top_k_per_source: usize,
    pub top_k_global: usize,
    pub deadline_ms: u64,
    pub per_source_timeout_ms: u64,
    pub max_concurrent_sources: usize,
    /// Context token budget for the prompt, estimated at 4 chars/token
    pub context_token_budget: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k_per_source: 10,
            top_k_global: 8,
            deadline_ms: 25_000,
            per_source_timeout_ms: 4_000,
            max_concurrent_sources: 6,
            context_token_budget: 2_000,
        }
    }
}

impl PipelineConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn per_source_timeout(&self) -> Duration {
        Duration::from_millis(self.per_source_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BreakerConfig {
    /// Failure weight that opens the circuit within the window
    pub failure_threshold: f32,
    /// Number of recent calls considered
    pub window: usize,
    /// Failure rate that opens the circuit once the window is full
    pub failure_rate: f64,
    pub cool_down_ms: u64,
    pub cool_down_max_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5.0,
            window: 20,
            failure_rate: 0.5,
            cool_down_ms: 30_000,
            cool_down_max_ms: 300_000,
        }
    }
}

impl BreakerConfig {
    pub fn cool_down(&self) -> Duration {
        Duration::from_millis(self.cool_down_ms)
    }

    pub fn cool_down_max(&self) -> Duration {
        Duration::from_millis(self.cool_down_max_ms)
    }
}

impl GatewayConfig {
    /// Load and validate a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parse and validate a JSON config document
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// The closed set of enabled sources
    pub fn enabled_sources(&self) -> Vec<SourceId> {
        let mut sources: Vec<SourceId> = self.vector_store.collections.keys().cloned().collect();
        sources.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        sources
    }

    pub fn source_weight(&self, source: &SourceId) -> f32 {
        self.source_weights.get(source).copied().unwrap_or(1.0)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding.dim == 0 {
            return Err(ConfigError::Invalid("embedding.dim must be positive".into()));
        }
        if self.vector_store.collections.is_empty() {
            return Err(ConfigError::Invalid(
                "vector_store.collections must declare at least one source".into(),
            ));
        }
        let s = &self.cache.semantic;
        if !(0.0..=1.0).contains(&s.base_threshold)
            || !(0.0..=1.0).contains(&s.min_threshold)
            || !(0.0..=1.0).contains(&s.max_threshold)
        {
            return Err(ConfigError::Invalid(
                "cache.semantic thresholds must be within [0, 1]".into(),
            ));
        }
        if s.min_threshold > s.base_threshold || s.base_threshold > s.max_threshold {
            return Err(ConfigError::Invalid(
                "cache.semantic thresholds must satisfy min <= base <= max".into(),
            ));
        }
        if self.pipeline.max_concurrent_sources == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.max_concurrent_sources must be positive".into(),
            ));
        }
        for (source, weight) in &self.source_weights {
            if !self.vector_store.collections.contains_key(source) {
                return Err(ConfigError::Invalid(format!(
                    "source_weights references unknown source {source}"
                )));
            }
            if *weight < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "source weight for {source} must be non-negative"
                )));
            }
        }
        for (client, sources) in &self.clients {
            for source in sources {
                if !self.vector_store.collections.contains_key(source) {
                    return Err(ConfigError::Invalid(format!(
                        "client {client} references unknown source {source}"
                    )));
                }
            }
        }
        Ok(())
    }
}
