//! # Adapters for the helpdesk RAG gateway
//!
//! Thin clients over the three external collaborators:
//!
//! - **Embedding provider**: text -> unit-normalised vector, LRU-cached
//! - **Vector store**: similarity search and upsert per collection
//! - **LLM provider**: chat completion with token accounting
//!
//! Each adapter is a trait so the pipeline can be driven by the scripted
//! mocks in [`mock`] during tests.

mod client;

pub mod embedding;
pub mod llm;
pub mod mock;
pub mod vector_store;

pub use client::MAX_IDLE_CONNECTIONS;

pub use embedding::{Embedder, HttpEmbedder};
pub use llm::{
    AnthropicChat, ChatMessage, ChatRole, Completion, CompletionParams, LlmClient, OpenAiChat,
};
pub use mock::{MockEmbedder, MockLlm, MockLlmFailure, MockVectorStore};
pub use vector_store::{QdrantStore, ScoredPoint, SearchFilter, UpsertPoint, VectorStore};
