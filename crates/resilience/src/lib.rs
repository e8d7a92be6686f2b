//! # Resilience patterns for the helpdesk RAG gateway
//!
//! - **Circuit breaker**: windowed failure tracking per dependency (each
//!   knowledge source, plus the LLM), short-circuiting calls while a
//!   dependency is failing.
//! - **Retry**: exponential backoff with jitter for transient failures,
//!   classified through the core [`Transience`](helpdesk_rag_core::Transience)
//!   trait.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    Admission, BreakerConfig, BreakerError, BreakerRegistry, BreakerState, BreakerStatus,
    CircuitBreaker,
};
pub use retry::{retry, RetryConfig, RetryError};
