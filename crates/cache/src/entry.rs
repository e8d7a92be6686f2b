//! Cache entry with popularity-driven freshness and acceptance

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::Duration;

use helpdesk_rag_core::{Answer, CacheError, SemanticConfig};

/// TTL extension per hit, capped at [`ADAPTIVE_TTL_HIT_CAP`] hits
pub const ADAPTIVE_TTL_ALPHA: f64 = 0.1;
pub const ADAPTIVE_TTL_HIT_CAP: u32 = 20;

/// Utility weights for capacity eviction
pub const UTILITY_HIT_WEIGHT: f64 = 1.0;
pub const UTILITY_TOKEN_WEIGHT: f64 = 0.001;
pub const UTILITY_AGE_WEIGHT: f64 = 0.0005;

/// A cached answer with the metadata driving freshness, semantic
/// acceptance and eviction.
///
/// Access metadata is atomic so reads never take the index write lock.
pub struct CacheEntry {
    /// Exact fingerprint
    pub key: String,
    /// Embedding of the normalised question; present iff the entry is
    /// semantic-searchable
    pub embedding: Option<Vec<f32>>,
    /// The stored answer
    pub value: Answer,
    /// Tokens the stored response cost to produce; credited to
    /// `tokens_saved` on every hit
    pub tokens_value: u64,
    pub created_at: DateTime<Utc>,
    last_access_at: AtomicI64,
    hit_count: AtomicU32,
    /// Base TTL before popularity extension
    pub ttl_base: Duration,
    pub semantic_eligible: bool,
    /// Estimated memory footprint counted against the byte bound
    pub size_bytes: usize,
}

impl CacheEntry {
    pub fn new(
        key: String,
        value: Answer,
        tokens_value: u64,
        embedding: Option<Vec<f32>>,
        ttl_base: Duration,
        semantic_eligible: bool,
    ) -> Result<Self, CacheError> {
        let serialized = serde_json::to_vec(&value)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        let size_bytes = serialized.len()
            + embedding.as_ref().map(|v| v.len() * 4).unwrap_or(0)
            + key.len();
        let now = Utc::now();

        Ok(Self {
            key,
            embedding,
            value,
            tokens_value,
            created_at: now,
            last_access_at: AtomicI64::new(now.timestamp()),
            hit_count: AtomicU32::new(0),
            ttl_base,
            semantic_eligible,
            size_bytes,
        })
    }

    pub fn hit_count(&self) -> u32 {
        self.hit_count.load(Ordering::Relaxed)
    }

    pub fn last_access_at(&self) -> i64 {
        self.last_access_at.load(Ordering::Relaxed)
    }

    /// Carry the hit count over from a replaced entry (max wins)
    pub(crate) fn inherit_hits(&self, previous: u32) {
        self.hit_count.fetch_max(previous, Ordering::Relaxed);
    }

    /// Record a hit: bump the counter and refresh the access timestamp
    pub fn mark_access(&self) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
        self.last_access_at
            .fetch_max(Utc::now().timestamp(), Ordering::Relaxed);
    }

    /// TTL after popularity extension:
    /// `ttl_base * (1 + alpha * min(hit_count, cap))`
    pub fn adaptive_ttl(&self) -> Duration {
        let hits = self.hit_count().min(ADAPTIVE_TTL_HIT_CAP);
        self.ttl_base
            .mul_f64(1.0 + ADAPTIVE_TTL_ALPHA * f64::from(hits))
    }

    /// Expiry instant under the current adaptive TTL
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at
            + chrono::Duration::from_std(self.adaptive_ttl())
                .unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 2))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() <= now
    }

    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds().max(0)
    }

    /// Similarity a query must reach to reuse this entry. Popular entries
    /// relax toward `min_threshold`:
    /// `clamp(base - k_boost * log2(1 + hit_count), min, max)`
    pub fn semantic_threshold(&self, config: &SemanticConfig) -> f32 {
        let boost = config.k_boost * (1.0 + self.hit_count() as f32).log2();
        (config.base_threshold - boost).clamp(config.min_threshold, config.max_threshold)
    }

    /// Eviction utility; lowest goes first
    pub fn utility(&self, now: DateTime<Utc>) -> f64 {
        UTILITY_HIT_WEIGHT * f64::from(self.hit_count())
            + UTILITY_TOKEN_WEIGHT * self.tokens_value as f64
            - UTILITY_AGE_WEIGHT * self.age_seconds(now) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helpdesk_rag_core::{AnswerMetrics, CacheOutcome};

    fn answer(text: &str) -> Answer {
        Answer {
            text: text.to_string(),
            blocks: Vec::new(),
            citations: Vec::new(),
            metrics: AnswerMetrics {
                prompt_tokens: 0,
                completion_tokens: 0,
                sources_used: Vec::new(),
                cache_result: CacheOutcome::Miss,
                partial: false,
                similarity: None,
            },
        }
    }

    fn entry_with_hits(hits: u32) -> CacheEntry {
        let entry = CacheEntry::new(
            "k".into(),
            answer("a"),
            500,
            None,
            Duration::from_secs(3600),
            true,
        )
        .unwrap();
        for _ in 0..hits {
            entry.mark_access();
        }
        entry
    }

    #[test]
    fn adaptive_ttl_grows_with_hits_and_caps() {
        let fresh = entry_with_hits(0);
        assert_eq!(fresh.adaptive_ttl(), Duration::from_secs(3600));

        let popular = entry_with_hits(10);
        assert_eq!(popular.adaptive_ttl(), Duration::from_secs(7200));

        let saturated = entry_with_hits(50);
        // capped at 20 hits -> factor 3.0
        assert_eq!(saturated.adaptive_ttl(), Duration::from_secs(10800));
    }

    #[test]
    fn semantic_threshold_relaxes_with_popularity() {
        let config = SemanticConfig::default();

        let fresh = entry_with_hits(0);
        assert!((fresh.semantic_threshold(&config) - 0.88).abs() < 1e-6);

        let popular = entry_with_hits(30);
        // 0.88 - 0.01 * log2(31) ~= 0.8305
        let threshold = popular.semantic_threshold(&config);
        assert!((threshold - 0.8305).abs() < 1e-3);
        assert!(threshold >= config.min_threshold);
    }

    #[test]
    fn semantic_threshold_never_drops_below_min() {
        let config = SemanticConfig {
            k_boost: 0.5,
            ..Default::default()
        };
        let popular = entry_with_hits(1000);
        assert_eq!(popular.semantic_threshold(&config), config.min_threshold);
    }

    #[test]
    fn utility_prefers_popular_and_expensive_entries() {
        let now = Utc::now();
        let popular = entry_with_hits(10);
        let cold = entry_with_hits(0);
        assert!(popular.utility(now) > cold.utility(now));

        let expensive = CacheEntry::new(
            "k2".into(),
            answer("a"),
            10_000,
            None,
            Duration::from_secs(3600),
            true,
        )
        .unwrap();
        assert!(expensive.utility(now) > cold.utility(now));
    }

    #[test]
    fn size_accounts_for_embedding() {
        let without = CacheEntry::new(
            "k".into(),
            answer("a"),
            0,
            None,
            Duration::from_secs(60),
            true,
        )
        .unwrap();
        let with = CacheEntry::new(
            "k".into(),
            answer("a"),
            0,
            Some(vec![0.0; 256]),
            Duration::from_secs(60),
            true,
        )
        .unwrap();
        assert_eq!(with.size_bytes - without.size_bytes, 1024);
    }
}
