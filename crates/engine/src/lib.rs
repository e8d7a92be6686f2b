//! # Query engine for the helpdesk RAG gateway
//!
//! Translates a user question into a ranked, source-attributed list of
//! hits drawn from the permitted sources:
//!
//! - **Source selection**: caller hint, client keyword table, or every
//!   enabled source
//! - **Fan-out**: bounded-concurrency parallel vector searches with
//!   per-task timeouts, an overall deadline and per-source circuit
//!   breakers
//! - **Aggregation**: payload validation, three-rule deduplication,
//!   source-weighted scoring and global truncation

pub mod fanout;
pub mod ranking;
pub mod sources;

pub use fanout::{EngineConfig, QueryEngine, Retrieval, SourceOutcome};
pub use ranking::{normalize_url, rank_hits, DEDUP_COSINE_THRESHOLD};
pub use sources::{extract_payload, SourceSelector};
