//! Prometheus metrics for the gateway pipeline
//!
//! # Metrics exposed
//!
//! - `gateway_requests_total` - Counter of handled queries by cache result
//! - `gateway_cache_exact_hits_total` / `gateway_cache_semantic_hits_total` /
//!   `gateway_cache_misses_total`
//! - `gateway_tokens_saved_total` - Tokens avoided through cache hits
//! - `gateway_tokens_spent_total` - Provider-reported tokens spent
//! - `gateway_tokens_estimated_total` - Locally estimated tokens (4 chars
//!   per token), recorded alongside the provider numbers so the two
//!   accountings can be compared
//! - `gateway_source_outcomes_total` - Fan-out outcomes by source and kind
//! - `gateway_breaker_open_total` - Circuit-breaker trips by target
//! - `gateway_pipeline_latency_ms` / `gateway_source_latency_ms` /
//!   `gateway_llm_latency_ms` - Latency histograms
//!
//! # Example
//!
//! ```rust,no_run
//! use helpdesk_rag_monitoring::init_prometheus;
//!
//! // Initialize once at startup
//! let handle = init_prometheus();
//!
//! // Render for a scrape endpoint
//! let body = handle.render();
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Label key for the cache outcome of a request
pub const LABEL_CACHE_RESULT: &str = "cache_result";

/// Label key for a knowledge source
pub const LABEL_SOURCE: &str = "source";

/// Label key for a fan-out outcome kind
pub const LABEL_OUTCOME: &str = "outcome";

/// Label key for a breaker-guarded target
pub const LABEL_TARGET: &str = "target";

/// Install the Prometheus recorder. Call once at startup; the returned
/// handle renders the scrape body.
pub fn init_prometheus() -> PrometheusHandle {
    let builder = PrometheusBuilder::new().idle_timeout(
        metrics_util::MetricKindMask::ALL,
        Some(Duration::from_secs(15 * 60)),
    );

    let handle = builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    describe_metrics();

    handle
}

fn describe_metrics() {
    describe_counter!(
        "gateway_requests_total",
        "Total queries handled, labelled by cache result"
    );
    describe_counter!(
        "gateway_cache_exact_hits_total",
        "Cache hits served by exact fingerprint"
    );
    describe_counter!(
        "gateway_cache_semantic_hits_total",
        "Cache hits served by embedding similarity"
    );
    describe_counter!("gateway_cache_misses_total", "Cache misses");
    describe_counter!(
        "gateway_tokens_saved_total",
        "Tokens avoided by serving cached answers"
    );
    describe_counter!(
        "gateway_tokens_spent_total",
        "Provider-reported tokens spent on completions"
    );
    describe_counter!(
        "gateway_tokens_estimated_total",
        "Locally estimated tokens (4 chars/token) for the same completions"
    );
    describe_counter!(
        "gateway_source_outcomes_total",
        "Fan-out outcomes by source and kind"
    );
    describe_counter!(
        "gateway_breaker_open_total",
        "Calls short-circuited by an open circuit breaker"
    );
    describe_histogram!(
        "gateway_pipeline_latency_ms",
        "End-to-end latency of one query"
    );
    describe_histogram!(
        "gateway_source_latency_ms",
        "Latency of one source search within the fan-out"
    );
    describe_histogram!("gateway_llm_latency_ms", "Latency of one LLM completion");
}

/// Record a handled request and its end-to-end latency
pub fn record_request(cache_result: &str, latency_ms: f64) {
    counter!("gateway_requests_total", LABEL_CACHE_RESULT => cache_result.to_string())
        .increment(1);
    histogram!("gateway_pipeline_latency_ms", LABEL_CACHE_RESULT => cache_result.to_string())
        .record(latency_ms);
}

/// Record one cache lookup outcome
pub fn record_cache_result(cache_result: &str) {
    match cache_result {
        "exact" => counter!("gateway_cache_exact_hits_total").increment(1),
        "semantic" => counter!("gateway_cache_semantic_hits_total").increment(1),
        _ => counter!("gateway_cache_misses_total").increment(1),
    }
}

/// Record tokens avoided by a cache hit
pub fn record_tokens_saved(tokens: u64) {
    counter!("gateway_tokens_saved_total").increment(tokens);
}

/// Record tokens spent on a completion, both as the provider reported
/// them and as locally estimated
pub fn record_tokens_spent(reported: u64, estimated: u64) {
    counter!("gateway_tokens_spent_total").increment(reported);
    counter!("gateway_tokens_estimated_total").increment(estimated);
}

/// Record one fan-out outcome for a source
pub fn record_source_outcome(source: &str, outcome: &str, latency_ms: Option<f64>) {
    counter!(
        "gateway_source_outcomes_total",
        LABEL_SOURCE => source.to_string(),
        LABEL_OUTCOME => outcome.to_string()
    )
    .increment(1);
    if let Some(latency) = latency_ms {
        histogram!("gateway_source_latency_ms", LABEL_SOURCE => source.to_string())
            .record(latency);
    }
}

/// Record a call short-circuited by an open breaker
pub fn record_breaker_open(target: &str) {
    counter!("gateway_breaker_open_total", LABEL_TARGET => target.to_string()).increment(1);
}

/// Record the latency of one LLM completion
pub fn record_llm_latency(latency_ms: f64) {
    histogram!("gateway_llm_latency_ms").record(latency_ms);
}
