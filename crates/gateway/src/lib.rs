//! # Helpdesk RAG gateway
//!
//! Retrieval-augmented question-answering gateway for an IT helpdesk
//! assistant. A question flows through: cache lookup (exact + semantic),
//! parallel multi-source vector search, ranking and deduplication, context
//! assembly, LLM invocation and a cache write-back.
//!
//! The [`pipeline`] module is the transport-agnostic orchestrator; the
//! [`server`] module exposes it over HTTP.

pub mod pipeline;
pub mod server;

pub use pipeline::Pipeline;
pub use server::{build_adapters, build_router, run, AppState};
