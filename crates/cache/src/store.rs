//! Semantic response cache
//!
//! Serves previously computed answers for requests that are identical
//! (exact fingerprint) or semantically equivalent (embedding similarity)
//! to a past request, subject to freshness and capacity policies, and
//! accounts the token cost avoided.
//!
//! Lookup order: the primary map by fingerprint, then a ring of recently
//! touched entries, then a full scan of a snapshot of the index. The scan
//! never holds the index lock across an await and yields to the runtime at
//! coarse boundaries so long scans cannot starve peer tasks.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use helpdesk_rag_core::vectors::cosine_similarity;
use helpdesk_rag_core::{Answer, CacheConfig, CacheError, SemanticConfig};

use crate::entry::CacheEntry;
use crate::stats::{CacheCounters, CacheStats, RecentEntryHits};

/// Comparisons between yields during a similarity scan
const SCAN_YIELD_EVERY: usize = 1024;

/// Configuration of the semantic cache
#[derive(Debug, Clone)]
pub struct SemanticCacheConfig {
    pub max_entries: usize,
    pub max_bytes: usize,
    pub ttl_base: Duration,
    pub semantic: SemanticConfig,
    /// Interval of the background sweep for expired entries
    pub purge_interval: Duration,
}

impl Default for SemanticCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_bytes: 256 * 1024 * 1024,
            ttl_base: Duration::from_secs(3600),
            semantic: SemanticConfig::default(),
            purge_interval: Duration::from_secs(300),
        }
    }
}

impl SemanticCacheConfig {
    pub fn from_settings(settings: &CacheConfig) -> Self {
        Self {
            max_entries: settings.max_entries,
            max_bytes: settings.max_bytes,
            ttl_base: settings.ttl_base(),
            semantic: settings.semantic.clone(),
            ..Default::default()
        }
    }
}

/// Result of a cache lookup
pub enum Lookup {
    Exact(Arc<CacheEntry>),
    Semantic {
        entry: Arc<CacheEntry>,
        similarity: f32,
    },
    Miss,
}

impl Lookup {
    pub fn is_miss(&self) -> bool {
        matches!(self, Lookup::Miss)
    }
}

/// In-memory semantic cache keyed by request fingerprint
pub struct SemanticCache {
    config: SemanticCacheConfig,
    entries: RwLock<HashMap<String, Arc<CacheEntry>>>,
    bytes: AtomicUsize,
    /// Recently created or accessed keys, scanned before the full index
    recent: Mutex<VecDeque<String>>,
    counters: CacheCounters,
}

impl SemanticCache {
    pub fn new(config: SemanticCacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            bytes: AtomicUsize::new(0),
            recent: Mutex::new(VecDeque::new()),
            counters: CacheCounters::default(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SemanticCacheConfig::default())
    }

    /// Look up by fingerprint, then by similarity when `q_vec` is given.
    ///
    /// An expired exact entry is removed and the lookup continues as a
    /// miss; the removed entry can no longer be returned by the semantic
    /// pass, so known-stale content is never served.
    pub async fn get(&self, key: &str, q_vec: Option<&[f32]>) -> Lookup {
        if let Some(entry) = self.lookup_exact(key) {
            return Lookup::Exact(entry);
        }

        if let Some(q_vec) = q_vec {
            if let Some((entry, similarity)) = self.lookup_semantic(q_vec).await {
                return Lookup::Semantic { entry, similarity };
            }
        }

        self.record_miss();
        Lookup::Miss
    }

    /// Exact pass alone. Counts a hit but never a miss, so the
    /// orchestrator can run other steps (single-flight, semantic lookup)
    /// between the passes and report one miss at the end via
    /// [`record_miss`](Self::record_miss).
    pub fn lookup_exact(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let entry = self.entries.read().get(key).cloned()?;
        if entry.is_expired(Utc::now()) {
            self.remove_expired(key);
            return None;
        }
        entry.mark_access();
        self.counters.add(&self.counters.exact_hits, 1);
        self.counters
            .add(&self.counters.tokens_saved, entry.tokens_value);
        self.touch_recent(key);
        debug!(key = %key, hits = entry.hit_count(), "cache hit (exact)");
        Some(entry)
    }

    /// Semantic pass alone. Counts a hit but never a miss.
    pub async fn lookup_semantic(&self, q_vec: &[f32]) -> Option<(Arc<CacheEntry>, f32)> {
        if !self.config.semantic.enabled {
            return None;
        }
        let (entry, similarity) = self.find_similar(q_vec).await?;
        entry.mark_access();
        self.counters.add(&self.counters.semantic_hits, 1);
        self.counters
            .add(&self.counters.tokens_saved, entry.tokens_value);
        self.touch_recent(&entry.key);
        debug!(key = %entry.key, similarity = similarity, "cache hit (semantic)");
        Some((entry, similarity))
    }

    /// Count one miss. Called once per request that found nothing.
    pub fn record_miss(&self) {
        self.counters.add(&self.counters.misses, 1);
    }

    /// Store an answer. Last write wins on the value; the hit count of a
    /// replaced entry is carried over. Capacity is restored before this
    /// returns.
    pub fn put(
        &self,
        key: &str,
        value: Answer,
        tokens_value: u64,
        embedding: Option<Vec<f32>>,
        semantic_eligible: bool,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry::new(
            key.to_string(),
            value,
            tokens_value,
            embedding,
            self.config.ttl_base,
            semantic_eligible,
        )?;
        if entry.size_bytes > self.config.max_bytes {
            return Err(CacheError::EntryTooLarge {
                size: entry.size_bytes,
                max: self.config.max_bytes,
            });
        }
        let entry = Arc::new(entry);

        {
            let mut entries = self.entries.write();
            if let Some(old) = entries.get(key) {
                entry.inherit_hits(old.hit_count());
                self.bytes.fetch_sub(old.size_bytes, Ordering::Relaxed);
            }
            self.bytes.fetch_add(entry.size_bytes, Ordering::Relaxed);
            entries.insert(key.to_string(), entry);
            self.enforce_capacity(&mut entries);
        }

        self.counters.add(&self.counters.tokens_spent, tokens_value);
        self.touch_recent(key);
        Ok(())
    }

    /// Remove one entry by fingerprint
    pub fn invalidate_key(&self, key: &str) -> bool {
        let mut entries = self.entries.write();
        match entries.remove(key) {
            Some(entry) => {
                self.bytes.fetch_sub(entry.size_bytes, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Remove every entry matching the predicate, returning the count
    pub fn invalidate_where(&self, predicate: impl Fn(&CacheEntry) -> bool) -> usize {
        let mut entries = self.entries.write();
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| predicate(entry))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            if let Some(entry) = entries.remove(key) {
                self.bytes.fetch_sub(entry.size_bytes, Ordering::Relaxed);
            }
        }
        if !doomed.is_empty() {
            info!(removed = doomed.len(), "cache invalidation");
        }
        doomed.len()
    }

    /// Drop expired entries now; the background sweep calls this on an
    /// interval so expired content does not linger until touched.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let now = Utc::now();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            if let Some(entry) = entries.remove(key) {
                self.bytes.fetch_sub(entry.size_bytes, Ordering::Relaxed);
                self.counters.add(&self.counters.evictions, 1);
            }
        }
        expired.len()
    }

    /// Spawn the periodic expiry sweep
    pub fn spawn_purge_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        let interval = cache.config.purge_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let removed = cache.purge_expired();
                if removed > 0 {
                    debug!(removed, "expiry sweep");
                }
            }
        })
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read();
        let recent = self
            .recent
            .lock()
            .iter()
            .filter_map(|key| {
                entries.get(key).map(|entry| RecentEntryHits {
                    key: key.clone(),
                    hit_count: entry.hit_count(),
                })
            })
            .collect();

        CacheStats {
            entries: entries.len(),
            bytes: self.bytes.load(Ordering::Relaxed),
            exact_hits: self.counters.exact_hits.load(Ordering::Relaxed),
            semantic_hits: self.counters.semantic_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            tokens_saved: self.counters.tokens_saved.load(Ordering::Relaxed),
            tokens_spent: self.counters.tokens_spent.load(Ordering::Relaxed),
            recent,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Best semantically equivalent entry for `q_vec`, if any clears its
    /// own adaptive threshold.
    ///
    /// Two passes: the recent ring first (an accepted candidate there
    /// short-circuits the scan), then a snapshot of the full population.
    async fn find_similar(&self, q_vec: &[f32]) -> Option<(Arc<CacheEntry>, f32)> {
        let now = Utc::now();

        let ring_keys: Vec<String> = {
            let recent = self.recent.lock();
            recent.iter().cloned().collect()
        };
        if !ring_keys.is_empty() {
            let ring: Vec<Arc<CacheEntry>> = {
                let entries = self.entries.read();
                ring_keys
                    .iter()
                    .filter_map(|key| entries.get(key).cloned())
                    .collect()
            };
            if let Some((entry, similarity)) = Self::best_candidate(&ring, q_vec, now) {
                if similarity >= entry.semantic_threshold(&self.config.semantic) {
                    return Some((entry, similarity));
                }
            }
        }

        let snapshot: Vec<Arc<CacheEntry>> = {
            let entries = self.entries.read();
            entries.values().cloned().collect()
        };

        let mut best: Option<(Arc<CacheEntry>, f32)> = None;
        for (i, entry) in snapshot.iter().enumerate() {
            if i % SCAN_YIELD_EVERY == SCAN_YIELD_EVERY - 1 {
                tokio::task::yield_now().await;
            }
            let Some(embedding) = entry.embedding.as_ref() else {
                continue;
            };
            if !entry.semantic_eligible || entry.is_expired(now) {
                continue;
            }
            let similarity = cosine_similarity(q_vec, embedding);
            if best.as_ref().map(|(_, s)| similarity > *s).unwrap_or(true) {
                best = Some((entry.clone(), similarity));
            }
        }

        let (entry, similarity) = best?;
        if similarity >= entry.semantic_threshold(&self.config.semantic) {
            Some((entry, similarity))
        } else {
            None
        }
    }

    fn best_candidate(
        candidates: &[Arc<CacheEntry>],
        q_vec: &[f32],
        now: chrono::DateTime<Utc>,
    ) -> Option<(Arc<CacheEntry>, f32)> {
        let mut best: Option<(Arc<CacheEntry>, f32)> = None;
        for entry in candidates {
            let Some(embedding) = entry.embedding.as_ref() else {
                continue;
            };
            if !entry.semantic_eligible || entry.is_expired(now) {
                continue;
            }
            let similarity = cosine_similarity(q_vec, embedding);
            if best.as_ref().map(|(_, s)| similarity > *s).unwrap_or(true) {
                best = Some((entry.clone(), similarity));
            }
        }
        best
    }

    fn remove_expired(&self, key: &str) {
        let mut entries = self.entries.write();
        let expired = entries
            .get(key)
            .map(|entry| entry.is_expired(Utc::now()))
            .unwrap_or(false);
        if expired {
            if let Some(entry) = entries.remove(key) {
                self.bytes.fetch_sub(entry.size_bytes, Ordering::Relaxed);
                self.counters.add(&self.counters.evictions, 1);
                debug!(key = %key, "expired entry removed on access");
            }
        }
    }

    /// Restore both capacity bounds. Expired entries go first; if the
    /// cache is still over, the lowest-utility survivors are evicted.
    /// Called with the write lock held.
    fn enforce_capacity(&self, entries: &mut HashMap<String, Arc<CacheEntry>>) {
        let now = Utc::now();

        let over = |entries: &HashMap<String, Arc<CacheEntry>>, bytes: &AtomicUsize| {
            entries.len() > self.config.max_entries
                || bytes.load(Ordering::Relaxed) > self.config.max_bytes
        };

        if !over(entries, &self.bytes) {
            return;
        }

        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            if let Some(entry) = entries.remove(key) {
                self.bytes.fetch_sub(entry.size_bytes, Ordering::Relaxed);
                self.counters.add(&self.counters.evictions, 1);
            }
        }

        if !over(entries, &self.bytes) {
            return;
        }

        let mut ranked: Vec<(String, f64)> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.utility(now)))
            .collect();
        ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        for (key, utility) in ranked {
            if !over(entries, &self.bytes) {
                break;
            }
            if let Some(entry) = entries.remove(&key) {
                self.bytes.fetch_sub(entry.size_bytes, Ordering::Relaxed);
                self.counters.add(&self.counters.evictions, 1);
                warn!(key = %key, utility = utility, "capacity eviction");
            }
        }
    }

    fn touch_recent(&self, key: &str) {
        let mut recent = self.recent.lock();
        if let Some(pos) = recent.iter().position(|k| k == key) {
            recent.remove(pos);
        }
        recent.push_back(key.to_string());
        while recent.len() > self.config.semantic.recent_window {
            recent.pop_front();
        }
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

    /// Unit vector at the given cosine to [1, 0]
    fn vec_at_cosine(cos: f32) -> Vec<f32> {
        vec![cos, (1.0 - cos * cos).sqrt()]
    }

    fn small_cache() -> SemanticCache {
        SemanticCache::new(SemanticCacheConfig {
            max_entries: 100,
            max_bytes: 1024 * 1024,
            ttl_base: Duration::from_secs(3600),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn exact_hit_credits_tokens_exactly_once_per_get() {
        let cache = small_cache();
        cache.put("k1", answer("A"), 500, None, true).unwrap();

        match cache.get("k1", None).await {
            Lookup::Exact(entry) => assert_eq!(entry.value.text, "A"),
            _ => panic!("expected exact hit"),
        }

        let stats = cache.stats();
        assert_eq!(stats.exact_hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.tokens_saved, 500);
        assert_eq!(stats.tokens_spent, 500);

        cache.get("k1", None).await;
        assert_eq!(cache.stats().tokens_saved, 1000);
    }

    #[tokio::test]
    async fn unknown_key_is_a_miss() {
        let cache = small_cache();
        assert!(cache.get("nope", None).await.is_miss());
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn expired_entry_is_removed_and_missed() {
        let cache = SemanticCache::new(SemanticCacheConfig {
            ttl_base: Duration::from_millis(10),
            ..Default::default()
        });
        cache.put("k1", answer("A"), 100, None, true).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cache.get("k1", None).await.is_miss());
        assert_eq!(cache.len(), 0);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
        // No savings credited for stale content
        assert_eq!(stats.tokens_saved, 0);
    }

    #[tokio::test]
    async fn expired_exact_entry_never_resurfaces_via_semantic() {
        let cache = SemanticCache::new(SemanticCacheConfig {
            ttl_base: Duration::from_millis(10),
            ..Default::default()
        });
        let embedding = vec_at_cosine(1.0);
        cache
            .put("k1", answer("A"), 100, Some(embedding.clone()), true)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Same fingerprint AND an identical query vector: still a miss
        assert!(cache.get("k1", Some(&embedding)).await.is_miss());
    }

    #[tokio::test]
    async fn semantic_hit_above_threshold() {
        let cache = small_cache();
        cache
            .put("k1", answer("A"), 300, Some(vec_at_cosine(1.0)), true)
            .unwrap();

        let q = vec_at_cosine(0.91);
        match cache.get("other-key", Some(&q)).await {
            Lookup::Semantic { entry, similarity } => {
                assert_eq!(entry.key, "k1");
                assert!((similarity - 0.91).abs() < 1e-3);
            }
            _ => panic!("expected semantic hit"),
        }
        let stats = cache.stats();
        assert_eq!(stats.semantic_hits, 1);
        assert_eq!(stats.tokens_saved, 300);
    }

    #[tokio::test]
    async fn semantic_miss_below_threshold() {
        let cache = small_cache();
        cache
            .put("k1", answer("A"), 300, Some(vec_at_cosine(1.0)), true)
            .unwrap();

        let q = vec_at_cosine(0.85);
        assert!(cache.get("other-key", Some(&q)).await.is_miss());
        assert_eq!(cache.stats().semantic_hits, 0);
    }

    #[tokio::test]
    async fn popular_entries_accept_looser_matches() {
        let cache = small_cache();
        cache
            .put("k1", answer("A"), 300, Some(vec_at_cosine(1.0)), true)
            .unwrap();

        // 0.84 is below the base threshold of 0.88: rejected while cold
        assert!(cache.get("other", Some(&vec_at_cosine(0.84))).await.is_miss());

        // 30 exact hits relax the threshold to about 0.83
        for _ in 0..30 {
            cache.get("k1", None).await;
        }

        match cache.get("other", Some(&vec_at_cosine(0.84))).await {
            Lookup::Semantic { .. } => {}
            _ => panic!("0.84 should clear the relaxed threshold"),
        }

        // 0.82 stays below even the relaxed threshold
        assert!(cache.get("other", Some(&vec_at_cosine(0.82))).await.is_miss());
    }

    #[tokio::test]
    async fn non_eligible_entries_are_invisible_to_semantic_lookup() {
        let cache = small_cache();
        cache
            .put("k1", answer("A"), 300, Some(vec_at_cosine(1.0)), false)
            .unwrap();

        assert!(cache.get("other", Some(&vec_at_cosine(0.99))).await.is_miss());
    }

    #[tokio::test]
    async fn put_overwrites_value_and_keeps_hit_count() {
        let cache = small_cache();
        cache.put("k1", answer("old"), 100, None, true).unwrap();
        for _ in 0..5 {
            cache.get("k1", None).await;
        }

        cache.put("k1", answer("new"), 200, None, true).unwrap();
        match cache.get("k1", None).await {
            Lookup::Exact(entry) => {
                assert_eq!(entry.value.text, "new");
                // 5 carried over + this access
                assert_eq!(entry.hit_count(), 6);
            }
            _ => panic!("expected exact hit"),
        }
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn entry_count_bound_evicts_lowest_utility() {
        let cache = SemanticCache::new(SemanticCacheConfig {
            max_entries: 3,
            ..Default::default()
        });

        cache.put("e1", answer("popular"), 1000, None, true).unwrap();
        for _ in 0..10 {
            cache.get("e1", None).await;
        }
        cache.put("e2", answer("cold"), 100, None, true).unwrap();
        cache.put("e3", answer("cold"), 100, None, true).unwrap();
        cache.put("e4", answer("new"), 100, None, true).unwrap();

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 1);
        // The popular, expensive entry survives
        assert!(matches!(cache.get("e1", None).await, Lookup::Exact(_)));
    }

    #[tokio::test]
    async fn byte_bound_holds_after_puts() {
        let cache = SemanticCache::new(SemanticCacheConfig {
            max_entries: 1000,
            max_bytes: 4096,
            ..Default::default()
        });

        for i in 0..50 {
            let text = "x".repeat(200);
            cache
                .put(&format!("k{i}"), answer(&text), 10, None, true)
                .unwrap();
            assert!(cache.size_bytes() <= 4096, "byte bound violated");
        }
        assert!(cache.stats().evictions > 0);
    }

    #[tokio::test]
    async fn oversized_entry_is_rejected() {
        let cache = SemanticCache::new(SemanticCacheConfig {
            max_bytes: 128,
            ..Default::default()
        });
        let err = cache
            .put("k", answer(&"x".repeat(1024)), 10, None, true)
            .unwrap_err();
        assert!(matches!(err, CacheError::EntryTooLarge { .. }));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn invalidate_key_and_predicate() {
        let cache = small_cache();
        cache.put("k1", answer("a"), 1, None, true).unwrap();
        cache.put("k2", answer("b"), 1, None, true).unwrap();
        cache.put("k3", answer("bb"), 1, None, true).unwrap();

        assert!(cache.invalidate_key("k1"));
        assert!(!cache.invalidate_key("k1"));

        let removed = cache.invalidate_where(|entry| entry.value.text.starts_with('b'));
        assert_eq!(removed, 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn purge_sweeps_expired_entries() {
        let cache = SemanticCache::new(SemanticCacheConfig {
            ttl_base: Duration::from_millis(10),
            ..Default::default()
        });
        cache.put("k1", answer("a"), 1, None, true).unwrap();
        cache.put("k2", answer("b"), 1, None, true).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.purge_expired(), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn stats_track_recent_window() {
        let cache = small_cache();
        cache.put("k1", answer("a"), 1, None, true).unwrap();
        cache.get("k1", None).await;

        let stats = cache.stats();
        assert_eq!(stats.recent.len(), 1);
        assert_eq!(stats.recent[0].key, "k1");
        assert_eq!(stats.recent[0].hit_count, 1);
        assert!((stats.hit_rate() - 1.0).abs() < f64::EPSILON);
    }
}
