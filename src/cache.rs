//! Semantic cache: embedding-similarity lookup with metadata gating and
//! LRU/TTL eviction. Grounded on the freshness-tracking shape
//! of `examples/other_examples/000a7db4_..._venue-cache.rs.rs`
//! (`_at`-suffixed methods taking an injected clock for deterministic
//! tests), adapted to cosine-similarity lookup instead of key equality.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/* ============================= METADATA ============================= */

/// Gating fields a cache lookup or store carries alongside the embedding
///.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub organization_id: Option<String>,
}

/// All gating fields must hold for a hit.
fn metadata_matches(query: &CacheMetadata, entry: &CacheMetadata) -> bool {
    if query.provider != entry.provider || query.model != entry.model {
        return false;
    }
    if let (Some(qt), Some(et)) = (query.temperature, entry.temperature) {
        if (qt - et).abs() > 0.1 {
            return false;
        }
    }
    if let (Some(qo), Some(eo)) = (&query.organization_id, &entry.organization_id) {
        if qo != eo {
            return false;
        }
    }
    true
}

/* ============================= ENTRY ============================= */

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub id: Uuid,
    pub embedding: Vec<f64>,
    pub prompt: String,
    pub response: String,
    pub metadata: CacheMetadata,
    pub hits: u64,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
    pub expires_at: Instant,
}

/// `dot(a,b) / (|a|*|b|)`, `0` when either norm is `0`.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[derive(Debug, Clone)]
pub struct CacheHit {
    pub entry_id: Uuid,
    pub response: String,
    pub similarity: f64,
    pub saved_latency_estimate_ms: f64,
}

/* ============================= CACHE ============================= */

/// Bounded prompt/response store keyed by embedding similarity rather than
/// exact key. Single-writer, multi-reader: lookups take the
/// reader lock, stores take the writer lock for the full
/// eviction-then-insert sequence.
pub struct SemanticCache {
    similarity_threshold: f64,
    max_entries: usize,
    ttl: Duration,
    entries: RwLock<HashMap<Uuid, CacheEntry>>,
    /// Rolling average of recent upstream latency, used to back
    /// `saved_latency_estimate_ms` with a real number instead of a
    /// constant.
    avg_upstream_latency_ms: RwLock<f64>,
}

impl SemanticCache {
    pub fn new(similarity_threshold: f64, max_entries: usize, ttl: Duration) -> Self {
        Self {
            similarity_threshold,
            max_entries,
            ttl,
            entries: RwLock::new(HashMap::new()),
            avg_upstream_latency_ms: RwLock::new(200.0),
        }
    }

    /// Feeds one observed upstream latency into the rolling estimate so
    /// `saved_latency_estimate_ms` stays representative (EWMA, mirroring
    /// the load balancer's latency tracking in ).
    pub async fn record_upstream_latency(&self, sample_ms: f64) {
        let mut avg = self.avg_upstream_latency_ms.write().await;
        *avg = 0.9 * *avg + 0.1 * sample_ms;
    }

    /// Scans non-expired entries whose metadata matches, returning the
    /// maximum-similarity hit when it clears the threshold.
    pub async fn lookup_at(&self, embedding: &[f64], metadata: &CacheMetadata, now: Instant) -> Option<CacheHit> {
        let best = {
            let entries = self.entries.read().await;
            entries
                .values()
                .filter(|e| now < e.expires_at)
                .filter(|e| metadata_matches(metadata, &e.metadata))
                .map(|e| (e.id, cosine_similarity(embedding, &e.embedding)))
                .filter(|(_, sim)| *sim >= self.similarity_threshold)
                .max_by(|a, b| a.1.total_cmp(&b.1))
        };
        let Some((id, similarity)) = best else {
            crate::metrics::CACHE_MISSES.inc();
            return None;
        };

        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&id)?;
        entry.hits += 1;
        entry.last_accessed_at = now;
        let response = entry.response.clone();
        drop(entries);

        crate::metrics::CACHE_HITS.inc();
        let saved = *self.avg_upstream_latency_ms.read().await;
        Some(CacheHit { entry_id: id, response, similarity, saved_latency_estimate_ms: saved })
    }

    pub async fn lookup(&self, embedding: &[f64], metadata: &CacheMetadata) -> Option<CacheHit> {
        self.lookup_at(embedding, metadata, Instant::now()).await
    }

    /// Evicts the minimum-`last_accessed_at` entry while at capacity, then
    /// inserts.
    pub async fn store_at(&self, embedding: Vec<f64>, prompt: String, response: String, metadata: CacheMetadata, now: Instant) -> Uuid {
        let mut entries = self.entries.write().await;
        while entries.len() >= self.max_entries {
            let Some(lru_id) = entries.values().min_by_key(|e| e.last_accessed_at).map(|e| e.id) else { break };
            entries.remove(&lru_id);
        }
        let id = Uuid::new_v4();
        entries.insert(
            id,
            CacheEntry {
                id,
                embedding,
                prompt,
                response,
                metadata,
                hits: 0,
                created_at: now,
                last_accessed_at: now,
                expires_at: now + self.ttl,
            },
        );
        id
    }

    pub async fn store(&self, embedding: Vec<f64>, prompt: String, response: String, metadata: CacheMetadata) -> Uuid {
        self.store_at(embedding, prompt, response, metadata, Instant::now()).await
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Background reaper tick: removes entries whose `expires_at` has
    /// passed. Intended to be called
    /// periodically from a single background task.
    pub async fn reap_expired_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| now < e.expires_at);
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(provider: &str, model: &str, temp: Option<f64>) -> CacheMetadata {
        CacheMetadata { provider: provider.into(), model: model.into(), temperature: temp, organization_id: None }
    }

    #[tokio::test]
    async fn store_then_lookup_same_embedding_hits_with_similarity_one() {
        let cache = SemanticCache::new(0.9, 10, Duration::from_secs(60));
        let embedding = vec![1.0, 0.0, 0.0];
        cache.store(embedding.clone(), "prompt".into(), "A".into(), meta("openai", "gpt-4", Some(0.7))).await;
        let hit = cache.lookup(&embedding, &meta("openai", "gpt-4", Some(0.7))).await.unwrap();
        assert!((hit.similarity - 1.0).abs() < 1e-9);
        assert_eq!(hit.response, "A");
        assert!(hit.saved_latency_estimate_ms > 0.0);
    }

    #[tokio::test]
    async fn mismatched_model_never_hits() {
        let cache = SemanticCache::new(0.9, 10, Duration::from_secs(60));
        let embedding = vec![1.0, 0.0, 0.0];
        cache.store(embedding.clone(), "p".into(), "A".into(), meta("openai", "gpt-4", None)).await;
        assert!(cache.lookup(&embedding, &meta("openai", "gpt-3.5", None)).await.is_none());
    }

    #[tokio::test]
    async fn temperature_gate_rejects_beyond_tolerance() {
        let cache = SemanticCache::new(0.9, 10, Duration::from_secs(60));
        let embedding = vec![1.0, 0.0, 0.0];
        cache.store(embedding.clone(), "p".into(), "A".into(), meta("openai", "gpt-4", Some(0.2))).await;
        assert!(cache.lookup(&embedding, &meta("openai", "gpt-4", Some(0.9))).await.is_none());
    }

    #[tokio::test]
    async fn expired_entry_never_returned() {
        let cache = SemanticCache::new(0.9, 10, Duration::from_millis(10));
        let embedding = vec![1.0, 0.0];
        let t0 = Instant::now();
        cache.store_at(embedding.clone(), "p".into(), "A".into(), meta("openai", "gpt-4", None), t0).await;
        let later = t0 + Duration::from_secs(1);
        assert!(cache.lookup_at(&embedding, &meta("openai", "gpt-4", None), later).await.is_none());
    }

    #[tokio::test]
    async fn capacity_evicts_lru_before_insert() {
        let cache = SemanticCache::new(0.0, 2, Duration::from_secs(60));
        let t0 = Instant::now();
        cache.store_at(vec![1.0, 0.0], "p1".into(), "A".into(), meta("openai", "gpt-4", None), t0).await;
        cache.store_at(vec![0.0, 1.0], "p2".into(), "B".into(), meta("openai", "gpt-4", None), t0 + Duration::from_millis(1)).await;
        assert_eq!(cache.len().await, 2);
        // third store should evict the oldest (p1) since capacity is 2
        cache.store_at(vec![1.0, 1.0], "p3".into(), "C".into(), meta("openai", "gpt-4", None), t0 + Duration::from_millis(2)).await;
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn reaper_removes_only_expired_entries() {
        let cache = SemanticCache::new(0.0, 10, Duration::from_millis(5));
        let t0 = Instant::now();
        cache.store_at(vec![1.0], "p".into(), "A".into(), meta("openai", "gpt-4", None), t0).await;
        let removed = cache.reap_expired_at(t0 + Duration::from_secs(1)).await;
        assert_eq!(removed, 1);
        assert!(cache.is_empty().await);
    }

    #[test]
    fn cosine_similarity_zero_norm_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
