//! Shared HTTP client construction

use reqwest::Client;

/// Idle connections kept per target
pub const MAX_IDLE_CONNECTIONS: usize = 32;

/// Client with the connection pool capped per target. All adapters talking
/// to the same collaborator share one of these.
pub(crate) fn pooled_client() -> Client {
    Client::builder()
        .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS)
        .build()
        .expect("HTTP client initialization")
}
