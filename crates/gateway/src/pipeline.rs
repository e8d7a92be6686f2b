//! Pipeline orchestrator
//!
//! Single entry point tying the stages together: cache short-circuits,
//! single-flight coalescing, the retrieval fan-out, the response builder
//! and the cache write-back. Every invocation runs under a deadline;
//! exceeding it drops the in-flight stages (aborting their spawned
//! children) and returns a timeout immediately.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use helpdesk_rag_adapters::Embedder;
use helpdesk_rag_cache::{fingerprint, CacheEntry, FlightRole, SemanticCache, SingleFlight};
use helpdesk_rag_core::{Answer, CacheOutcome, GatewayConfig, GatewayError, Query, Transience};
use helpdesk_rag_engine::QueryEngine;
use helpdesk_rag_monitoring as monitoring;
use helpdesk_rag_responder::ResponseBuilder;

/// Top-level coordinator for one gateway process
pub struct Pipeline {
    cache: Arc<SemanticCache>,
    flights: SingleFlight,
    embedder: Arc<dyn Embedder>,
    engine: QueryEngine,
    responder: ResponseBuilder,
    semantic_enabled: bool,
    deadline: Duration,
}

impl Pipeline {
    pub fn new(
        cache: Arc<SemanticCache>,
        embedder: Arc<dyn Embedder>,
        engine: QueryEngine,
        responder: ResponseBuilder,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            cache,
            flights: SingleFlight::new(),
            embedder,
            engine,
            responder,
            semantic_enabled: config.cache.semantic.enabled,
            deadline: config.pipeline.deadline(),
        }
    }

    /// Handle one query end to end
    pub async fn handle(&self, query: Query) -> Result<Answer, GatewayError> {
        self.validate(&query)?;
        let started = Instant::now();

        let result = match timeout(self.deadline, self.run(query)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(deadline_ms = self.deadline.as_millis() as u64, "pipeline deadline exceeded");
                Err(GatewayError::Timeout)
            }
        };

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let cache_result = match &result {
            Ok(answer) => cache_result_label(answer.metrics.cache_result),
            Err(e) => e.code(),
        };
        monitoring::record_request(cache_result, latency_ms);
        result
    }

    fn validate(&self, query: &Query) -> Result<(), GatewayError> {
        if query.text.trim().is_empty() {
            return Err(GatewayError::BadRequest("question text is empty".into()));
        }
        for source in &query.sources_hint {
            if !self.engine.selector().is_enabled(source) {
                return Err(GatewayError::BadRequest(format!("unknown source {source}")));
            }
        }
        Ok(())
    }

    async fn run(&self, query: Query) -> Result<Answer, GatewayError> {
        let key = fingerprint(&query);
        let mut rejoined = false;

        loop {
            // 1. Exact lookup. After a single-flight wait this re-read
            //    observes the leader's put and returns its answer as-is.
            if let Some(entry) = self.cache.lookup_exact(&key) {
                let answer = if rejoined {
                    entry.value.clone()
                } else {
                    served_from_entry(&entry, CacheOutcome::Exact, None)
                };
                monitoring::record_cache_result("exact");
                monitoring::record_tokens_saved(entry.tokens_value);
                return Ok(answer);
            }

            // 2. Single-flight: one pipeline execution per fingerprint
            match self.flights.join(&key).await {
                FlightRole::Leader(permit) => {
                    let result = self.execute_miss(&query, &key).await;
                    drop(permit);
                    return result;
                }
                FlightRole::Follower => {
                    debug!(key = %key, "coalesced into an in-flight execution");
                    rejoined = true;
                    continue;
                }
            }
        }
    }

    /// The full pipeline behind the single-flight guard
    async fn execute_miss(&self, query: &Query, key: &str) -> Result<Answer, GatewayError> {
        // Embed exactly once; the vector serves the semantic lookup and
        // every source search
        let q_vec = self
            .embedder
            .embed(&query.normalized_text())
            .await
            .map_err(|e| {
                warn!(error = %e, "embedding failed");
                if e.is_transient() {
                    GatewayError::Unavailable {
                        message: "embedding provider unavailable".into(),
                        retry_after: None,
                    }
                } else {
                    GatewayError::Internal(format!("embedding failed: {e}"))
                }
            })?;

        // 3. Semantic lookup
        if query.allow_semantic && self.semantic_enabled {
            if let Some((entry, similarity)) = self.cache.lookup_semantic(&q_vec).await {
                monitoring::record_cache_result("semantic");
                monitoring::record_tokens_saved(entry.tokens_value);
                info!(
                    source_key = %entry.key,
                    similarity = similarity,
                    "answer served from semantic cache"
                );
                return Ok(served_from_entry(
                    &entry,
                    CacheOutcome::Semantic,
                    Some(similarity),
                ));
            }
        }

        self.cache.record_miss();
        monitoring::record_cache_result("miss");

        // 4. Fan-out. A retrieval with no hits still reaches the LLM,
        //    which answers from general knowledge with a disclaimer.
        let retrieval = self.engine.retrieve(query, &q_vec).await;
        let cache_result = if retrieval.failed_entirely() {
            CacheOutcome::MissNoContext
        } else {
            CacheOutcome::Miss
        };

        // 5. Build the answer
        let answer = self
            .responder
            .build(query, &retrieval.hits, retrieval.partial, cache_result)
            .await?;

        // 6. Cache write. A failed write is logged and recovered; the
        //    answer is returned regardless.
        let tokens_value =
            u64::from(answer.metrics.prompt_tokens) + u64::from(answer.metrics.completion_tokens);
        let embedding = query.allow_semantic.then(|| q_vec.clone());
        if let Err(e) = self.cache.put(
            key,
            answer.clone(),
            tokens_value,
            embedding,
            query.allow_semantic,
        ) {
            warn!(error = %e, "cache write failed, returning answer anyway");
        }

        Ok(answer)
    }
}

/// Serve a cached entry with its outcome annotation
fn served_from_entry(
    entry: &CacheEntry,
    cache_result: CacheOutcome,
    similarity: Option<f32>,
) -> Answer {
    let mut answer = entry.value.clone();
    answer.metrics.cache_result = cache_result;
    answer.metrics.similarity = similarity;
    answer
}

fn cache_result_label(outcome: CacheOutcome) -> &'static str {
    match outcome {
        CacheOutcome::Exact => "exact",
        CacheOutcome::Semantic => "semantic",
        CacheOutcome::Miss => "miss",
        CacheOutcome::MissNoContext => "miss_no_context",
    }
}
