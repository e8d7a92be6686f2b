//! # Monitoring for the helpdesk RAG gateway
//!
//! Counters and histograms over the `metrics` facade with a Prometheus
//! exporter. Recording is a no-op until [`init_prometheus`] installs the
//! recorder, so library code can record unconditionally.

pub mod prometheus;

pub use prometheus::{
    init_prometheus, record_breaker_open, record_cache_result, record_llm_latency,
    record_request, record_source_outcome, record_tokens_saved, record_tokens_spent,
};
