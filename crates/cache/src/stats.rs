//! Cache statistics
//!
//! Cumulative atomic counters. `tokens_saved` is exact: it is only ever
//! bumped with `fetch_add` under the hit paths, so no update is lost.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub(crate) struct CacheCounters {
    pub exact_hits: AtomicU64,
    pub semantic_hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub tokens_saved: AtomicU64,
    pub tokens_spent: AtomicU64,
}

impl CacheCounters {
    pub fn add(&self, counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }
}

/// Hit count of an entry in the recently-touched window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentEntryHits {
    pub key: String,
    pub hit_count: u32,
}

/// Point-in-time view of the cache counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub exact_hits: u64,
    pub semantic_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub tokens_saved: u64,
    pub tokens_spent: u64,
    /// Hit counts over the recently created/accessed window
    pub recent: Vec<RecentEntryHits>,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.exact_hits + self.semantic_hits
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 / total as f64
    }
}
