//! # Response builder for the helpdesk RAG gateway
//!
//! Turns ranked hits and the original question into the final answer:
//! prompt templates by mode, a token-budgeted context block, the LLM call
//! behind retry and circuit breaking, and the structured answer object
//! with citations.

pub mod builder;
pub mod prompt;

pub use builder::{ResponderConfig, ResponseBuilder};
pub use prompt::{build_context, fallback_prompt, system_prompt, ContextBlock, CHARS_PER_TOKEN};
