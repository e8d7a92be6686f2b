//! Parallel multi-source fan-out
//!
//! Embedding happens once upstream; the engine fans the query vector out
//! to every selected source under a concurrency bound, a per-task timeout
//! and an overall deadline. Each task is guarded by its source's circuit
//! breaker: an open breaker yields an immediate `Skipped` outcome rather
//! than a failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at};
use tracing::{debug, warn};

use helpdesk_rag_adapters::{ScoredPoint, SearchFilter, VectorStore};
use helpdesk_rag_core::{GatewayConfig, Hit, Query, RankedHit, SourceId, Transience};
use helpdesk_rag_monitoring as monitoring;
use helpdesk_rag_resilience::BreakerRegistry;

use crate::ranking::rank_hits;
use crate::sources::{extract_payload, SourceSelector};

/// Overall deadline for one fan-out, independent of the pipeline deadline
const FANOUT_DEADLINE: Duration = Duration::from_secs(8);

/// Engine tuning, derived from the gateway configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub collections: HashMap<SourceId, String>,
    pub source_weights: HashMap<SourceId, f32>,
    pub top_k_per_source: usize,
    pub top_k_global: usize,
    pub per_source_timeout: Duration,
    pub total_deadline: Duration,
    pub max_concurrent_sources: usize,
}

impl EngineConfig {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            collections: config.vector_store.collections.clone(),
            source_weights: config.source_weights.clone(),
            top_k_per_source: config.pipeline.top_k_per_source,
            top_k_global: config.pipeline.top_k_global,
            per_source_timeout: config.pipeline.per_source_timeout(),
            total_deadline: FANOUT_DEADLINE,
            max_concurrent_sources: config.pipeline.max_concurrent_sources,
        }
    }
}

/// What happened to one selected source
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    /// The source answered with this many validated hits
    Delivered(usize),
    /// Short-circuited by an open circuit breaker
    Skipped,
    /// Per-task or overall deadline hit
    TimedOut,
    Failed(String),
}

impl SourceOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SourceOutcome::Delivered(_))
    }

    fn as_str(&self) -> &'static str {
        match self {
            SourceOutcome::Delivered(_) => "delivered",
            SourceOutcome::Skipped => "skipped",
            SourceOutcome::TimedOut => "timed_out",
            SourceOutcome::Failed(_) => "failed",
        }
    }
}

/// Merged, ranked result of one fan-out
#[derive(Debug)]
pub struct Retrieval {
    pub hits: Vec<RankedHit>,
    /// True when any selected source was skipped, timed out or failed
    pub partial: bool,
    pub outcomes: Vec<(SourceId, SourceOutcome)>,
    pub errors: Vec<String>,
}

impl Retrieval {
    /// All selected sources failed and nothing was retrieved
    pub fn failed_entirely(&self) -> bool {
        self.hits.is_empty() && !self.errors.is_empty()
    }

    /// Sources contributing to the final ranked list
    pub fn sources_used(&self) -> Vec<SourceId> {
        let mut sources: Vec<SourceId> = Vec::new();
        for ranked in &self.hits {
            if !sources.contains(&ranked.hit.source) {
                sources.push(ranked.hit.source.clone());
            }
        }
        sources
    }
}

/// Translates a question into a ranked, source-attributed list of hits
pub struct QueryEngine {
    store: Arc<dyn VectorStore>,
    breakers: Arc<BreakerRegistry>,
    selector: SourceSelector,
    config: EngineConfig,
}

impl QueryEngine {
    pub fn new(
        store: Arc<dyn VectorStore>,
        breakers: Arc<BreakerRegistry>,
        selector: SourceSelector,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            breakers,
            selector,
            config,
        }
    }

    pub fn selector(&self) -> &SourceSelector {
        &self.selector
    }

    /// Fan the query vector out to the selected sources and merge.
    ///
    /// `q_vec` is the embedding of the normalised question, computed once
    /// by the caller and reused across sources.
    pub async fn retrieve(&self, query: &Query, q_vec: &[f32]) -> Retrieval {
        let selected = self.selector.select(query);
        if selected.is_empty() {
            return Retrieval {
                hits: Vec::new(),
                partial: false,
                outcomes: Vec::new(),
                errors: vec!["no sources selected".to_string()],
            };
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_sources));
        let q_vec: Arc<Vec<f32>> = Arc::new(q_vec.to_vec());
        let filter = SearchFilter::for_tenant(query.tenant.clone());

        let mut join_set: JoinSet<(SourceId, SourceOutcome, Vec<Hit>)> = JoinSet::new();
        for source in selected.clone() {
            let Some(collection) = self.config.collections.get(&source).cloned() else {
                continue;
            };
            let store = self.store.clone();
            let breaker = self.breakers.get_or_create(source.as_str());
            let semaphore = semaphore.clone();
            let q_vec = q_vec.clone();
            let filter = filter.clone();
            let per_source_timeout = self.config.per_source_timeout;
            let top_k = self.config.top_k_per_source;

            join_set.spawn(async move {
                if !breaker.try_acquire().is_allowed() {
                    monitoring::record_breaker_open(source.as_str());
                    debug!(source = %source, "source skipped, circuit open");
                    return (source, SourceOutcome::Skipped, Vec::new());
                }

                // Tasks beyond the concurrency bound queue here in FIFO order
                let _permit = semaphore.acquire_owned().await;
                let started = Instant::now();

                match timeout(
                    per_source_timeout,
                    store.search(&collection, &q_vec, top_k, &filter),
                )
                .await
                {
                    Ok(Ok(points)) => {
                        breaker.record_success();
                        let latency = started.elapsed().as_secs_f64() * 1000.0;
                        let hits = validate_points(&source, points);
                        monitoring::record_source_outcome(
                            source.as_str(),
                            "delivered",
                            Some(latency),
                        );
                        let count = hits.len();
                        (source, SourceOutcome::Delivered(count), hits)
                    }
                    Ok(Err(e)) => {
                        breaker.record_outcome(e.failure_weight());
                        warn!(source = %source, error = %e, "source search failed");
                        (source, SourceOutcome::Failed(e.to_string()), Vec::new())
                    }
                    Err(_) => {
                        breaker.record_outcome(1.0);
                        warn!(
                            source = %source,
                            timeout_ms = per_source_timeout.as_millis() as u64,
                            "source search timed out"
                        );
                        (source, SourceOutcome::TimedOut, Vec::new())
                    }
                }
            });
        }

        let deadline = tokio::time::Instant::now() + self.config.total_deadline;
        let mut outcomes: Vec<(SourceId, SourceOutcome)> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut all_hits: Vec<Hit> = Vec::new();

        loop {
            match timeout_at(deadline, join_set.join_next()).await {
                Ok(Some(Ok((source, outcome, hits)))) => {
                    match &outcome {
                        SourceOutcome::Failed(message) => {
                            errors.push(format!("{source}: {message}"));
                        }
                        SourceOutcome::TimedOut => {
                            errors.push(format!("{source}: timed out"));
                        }
                        _ => {}
                    }
                    if !outcome.is_delivered() {
                        monitoring::record_source_outcome(source.as_str(), outcome.as_str(), None);
                    }
                    all_hits.extend(hits);
                    outcomes.push((source, outcome));
                }
                Ok(Some(Err(join_error))) => {
                    errors.push(format!("search task failed: {join_error}"));
                }
                Ok(None) => break,
                Err(_) => {
                    join_set.abort_all();
                    for source in &selected {
                        if !outcomes.iter().any(|(s, _)| s == source) {
                            errors.push(format!("{source}: fan-out deadline exceeded"));
                            monitoring::record_source_outcome(source.as_str(), "timed_out", None);
                            outcomes.push((source.clone(), SourceOutcome::TimedOut));
                        }
                    }
                    break;
                }
            }
        }

        let partial = outcomes.iter().any(|(_, outcome)| !outcome.is_delivered());
        let hits = rank_hits(all_hits, &self.config.source_weights, self.config.top_k_global);

        debug!(
            selected = selected.len(),
            merged = hits.len(),
            partial = partial,
            "fan-out complete"
        );

        Retrieval {
            hits,
            partial,
            outcomes,
            errors,
        }
    }
}

/// Drop hits whose payload fails source validation
fn validate_points(source: &SourceId, points: Vec<ScoredPoint>) -> Vec<Hit> {
    points
        .into_iter()
        .filter_map(|point| {
            let payload = extract_payload(source, &point.payload)?;
            Some(Hit {
                source: source.clone(),
                doc_id: point.id,
                score: point.score,
                payload,
                vector: point.vector,
            })
        })
        .collect()
}
