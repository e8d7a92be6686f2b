//! Core type definitions for the helpdesk RAG gateway

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Identifier of a knowledge source (ticket system, wiki, ERP collection).
///
/// The set of valid sources is closed and declared at startup through the
/// `vector_store.collections` configuration map. Each source maps 1:1 to a
/// vector-store collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Answer mode requested by the caller.
///
/// Influences both the prompt template and the completion budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerMode {
    /// Short answer, roughly 120 words
    #[default]
    Concise,
    /// Full answer, roughly 400 words
    Detailed,
}

impl AnswerMode {
    /// Completion token budget for this mode
    pub fn max_tokens(&self) -> u32 {
        match self {
            AnswerMode::Concise => 256,
            AnswerMode::Detailed => 1024,
        }
    }

    /// Approximate word cap communicated to the model
    pub fn word_cap(&self) -> u32 {
        match self {
            AnswerMode::Concise => 120,
            AnswerMode::Detailed => 400,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerMode::Concise => "concise",
            AnswerMode::Detailed => "detailed",
        }
    }
}

/// A user question entering the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// The question, verbatim
    pub text: String,

    /// Per-request tenant tag (no isolation beyond filtering)
    pub tenant: Option<String>,

    /// Answer mode
    #[serde(default)]
    pub mode: AnswerMode,

    /// Caller-provided source restriction, intersected with enabled sources
    #[serde(default)]
    pub sources_hint: Vec<SourceId>,

    /// Whether a semantically similar cached answer may be reused
    #[serde(default = "default_true")]
    pub allow_semantic: bool,

    /// When the request was received
    #[serde(default = "Utc::now")]
    pub requested_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tenant: None,
            mode: AnswerMode::default(),
            sources_hint: Vec::new(),
            allow_semantic: true,
            requested_at: Utc::now(),
        }
    }

    pub fn with_mode(mut self, mode: AnswerMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn with_sources(mut self, sources: Vec<SourceId>) -> Self {
        self.sources_hint = sources;
        self
    }

    pub fn without_semantic_reuse(mut self) -> Self {
        self.allow_semantic = false;
        self
    }

    /// Canonical form of the question used for fingerprinting and embedding:
    /// trimmed, NFKC-normalised, lowercased.
    pub fn normalized_text(&self) -> String {
        self.text.trim().nfkc().collect::<String>().to_lowercase()
    }
}

/// The payload fields the response builder consumes, extracted from the
/// source-specific document shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitPayload {
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A single vector-search result from one source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    pub source: SourceId,
    pub doc_id: String,
    /// Cosine similarity reported by the vector store, in [-1, 1]
    pub score: f32,
    pub payload: HitPayload,
    /// Document embedding, when the store returns it (used for dedup)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

/// A hit after source weighting and deduplication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedHit {
    #[serde(flatten)]
    pub hit: Hit,
    /// `score * source_weight[source]`
    pub final_score: f32,
    /// Group id shared by hits judged to be duplicates of each other
    pub dedup_group: usize,
}

/// Reference to a hit actually included in the LLM context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// 1-based position in the context block
    pub index: usize,
    pub title: String,
    pub url: String,
    pub source: SourceId,
}

/// Structured content suitable for rich chat front-ends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerBlock {
    Section {
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        text: String,
    },
    Divider,
}

/// How the cache participated in producing an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    /// Served from the cache by exact fingerprint
    Exact,
    /// Served from the cache by embedding similarity
    Semantic,
    /// Full pipeline execution
    Miss,
    /// Full pipeline execution with no retrieved context
    MissNoContext,
}

/// Per-answer accounting returned to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerMetrics {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub sources_used: Vec<SourceId>,
    pub cache_result: CacheOutcome,
    /// True when at least one selected source was skipped or timed out
    pub partial: bool,
    /// Similarity of the matched entry, on semantic hits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

/// The synthesized answer returned to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub blocks: Vec<AnswerBlock>,
    pub citations: Vec<Citation>,
    pub metrics: AnswerMetrics,
}
