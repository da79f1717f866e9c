//! Response caching keyed by prompt and model.
//!
//! Identical (prompt, model) pairs are served from cache without touching
//! a provider. Entries carry a base TTL scaled by a runtime multiplier so
//! the cost optimizer can stretch cache lifetimes under budget pressure
//! without rewriting stored entries.
//!
//! # Keying
//!
//! Keys are the SHA-256 hash of the prompt and model, hex-encoded, so the
//! map never retains full prompt text as its key material.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::provider::CallResponse;

/// Hash key for a cached response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Computes the key for a (prompt, model) pair.
    pub fn from_parts(prompt: &str, model: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(prompt.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Get the hash string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cache entry with metadata for LRU eviction.
#[derive(Debug, Clone)]
struct CacheEntry {
    response: CallResponse,
    created_at: Instant,
    last_accessed: Instant,
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Total cache hits.
    pub hits: u64,
    /// Total cache misses.
    pub misses: u64,
    /// Total entries added.
    pub insertions: u64,
    /// Total entries evicted (LRU or expiry).
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate as a value between 0.0 and 1.0, or 0.0 if no accesses.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Thread-safe response cache with LRU eviction and a scalable TTL.
pub struct ResponseCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    capacity: usize,
    base_ttl: Duration,
    /// Runtime TTL scale, adjusted only by the cost optimizer.
    ttl_multiplier: RwLock<f64>,
    stats: RwLock<CacheStats>,
}

impl ResponseCache {
    /// Creates a cache with the given capacity and base TTL.
    pub fn new(capacity: usize, base_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            base_ttl,
            ttl_multiplier: RwLock::new(1.0),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Effective TTL after applying the current multiplier.
    ///
    /// Evaluated at read time, so raising the multiplier revives entries
    /// that were stale under the old TTL but not yet evicted.
    fn effective_ttl(&self) -> Duration {
        let multiplier = *self
            .ttl_multiplier
            .read()
            .expect("ttl multiplier lock poisoned");
        self.base_ttl.mul_f64(multiplier)
    }

    /// Looks up a cached response for the (prompt, model) pair.
    ///
    /// An entry found expired is removed on the spot, counted as both a
    /// miss and an eviction.
    pub fn get(&self, prompt: &str, model: &str) -> Option<CallResponse> {
        let key = CacheKey::from_parts(prompt, model);
        let ttl = self.effective_ttl();

        let mut entries = self.entries.write().expect("cache write lock poisoned");
        match entries.get_mut(&key) {
            Some(entry) if entry.created_at.elapsed() < ttl => {
                entry.last_accessed = Instant::now();
                let response = entry.response.clone();
                drop(entries);

                let mut stats = self.stats.write().expect("stats write lock poisoned");
                stats.hits += 1;
                Some(response)
            }
            Some(_) => {
                entries.remove(&key);
                drop(entries);
                let mut stats = self.stats.write().expect("stats write lock poisoned");
                stats.misses += 1;
                stats.evictions += 1;
                None
            }
            None => {
                drop(entries);
                let mut stats = self.stats.write().expect("stats write lock poisoned");
                stats.misses += 1;
                None
            }
        }
    }

    /// Stores a response for the (prompt, model) pair.
    ///
    /// At capacity, expired entries are dropped first and the LRU entry
    /// is evicted if the cache is still full.
    pub fn insert(&self, prompt: &str, model: &str, response: CallResponse) {
        let key = CacheKey::from_parts(prompt, model);
        let ttl = self.effective_ttl();

        let mut entries = self.entries.write().expect("cache write lock poisoned");
        let mut evicted = 0u64;

        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            let expired: Vec<CacheKey> = entries
                .iter()
                .filter(|(_, entry)| entry.created_at.elapsed() >= ttl)
                .map(|(k, _)| k.clone())
                .collect();
            evicted += expired.len() as u64;
            for k in expired {
                entries.remove(&k);
            }

            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_accessed)
                    .map(|(k, _)| k.clone());
                if let Some(k) = oldest {
                    entries.remove(&k);
                    evicted += 1;
                }
            }
        }

        let now = Instant::now();
        entries.insert(
            key,
            CacheEntry {
                response,
                created_at: now,
                last_accessed: now,
            },
        );
        drop(entries);

        let mut stats = self.stats.write().expect("stats write lock poisoned");
        stats.insertions += 1;
        stats.evictions += evicted;
    }

    /// Current TTL multiplier.
    pub fn ttl_multiplier(&self) -> f64 {
        *self
            .ttl_multiplier
            .read()
            .expect("ttl multiplier lock poisoned")
    }

    /// Sets the TTL multiplier directly.
    pub fn set_ttl_multiplier(&self, multiplier: f64) {
        let mut current = self
            .ttl_multiplier
            .write()
            .expect("ttl multiplier lock poisoned");
        *current = multiplier.max(0.0);
    }

    /// Multiplies the current TTL multiplier by `factor`.
    pub fn raise_ttl(&self, factor: f64) {
        let mut current = self
            .ttl_multiplier
            .write()
            .expect("ttl multiplier lock poisoned");
        *current *= factor.max(1.0);
    }

    /// Current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.read().expect("stats read lock poisoned").clone()
    }

    /// Number of cached entries, including not-yet-evicted expired ones.
    pub fn len(&self) -> usize {
        self.entries.read().expect("cache read lock poisoned").len()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes all entries. Statistics are preserved.
    pub fn clear(&self) {
        let mut entries = self.entries.write().expect("cache write lock poisoned");
        entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(content: &str) -> CallResponse {
        CallResponse {
            content: content.to_string(),
            tokens_used: 10,
        }
    }

    #[test]
    fn test_cache_key_deterministic() {
        let key1 = CacheKey::from_parts("hello", "gpt-4");
        let key2 = CacheKey::from_parts("hello", "gpt-4");
        let key3 = CacheKey::from_parts("hello", "claude-3");

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
        assert_eq!(key1.as_str().len(), 64); // SHA-256 produces 64 hex chars
    }

    #[test]
    fn test_same_prompt_different_model_is_distinct() {
        let cache = ResponseCache::new(100, Duration::from_secs(60));
        cache.insert("prompt", "gpt-4", response("from gpt"));

        assert!(cache.get("prompt", "gpt-4").is_some());
        assert!(cache.get("prompt", "claude-3").is_none());
    }

    #[test]
    fn test_hit_miss_accounting() {
        let cache = ResponseCache::new(100, Duration::from_secs(60));

        assert!(cache.get("prompt", "gpt-4").is_none());
        cache.insert("prompt", "gpt-4", response("cached"));
        let hit = cache.get("prompt", "gpt-4").expect("should hit");
        assert_eq!(hit.content, "cached");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.insertions, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));

        cache.insert("one", "m", response("1"));
        cache.insert("two", "m", response("2"));
        // Touch "one" so "two" becomes the LRU entry.
        assert!(cache.get("one", "m").is_some());

        cache.insert("three", "m", response("3"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("one", "m").is_some());
        assert!(cache.get("two", "m").is_none());
        assert!(cache.get("three", "m").is_some());

        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_expired_entry_misses() {
        let cache = ResponseCache::new(100, Duration::from_secs(0));
        cache.insert("prompt", "m", response("stale"));

        assert!(cache.get("prompt", "m").is_none());
    }

    #[test]
    fn test_expired_read_drops_entry() {
        let cache = ResponseCache::new(100, Duration::from_secs(0));
        cache.insert("prompt", "m", response("stale"));
        assert_eq!(cache.len(), 1);

        assert!(cache.get("prompt", "m").is_none());
        assert!(cache.is_empty(), "an expired read must reap the entry");

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
    }

    #[test]
    fn test_raising_ttl_revives_stale_entries() {
        let cache = ResponseCache::new(100, Duration::from_nanos(1));
        cache.insert("prompt", "m", response("nearly stale"));

        // A much larger TTL makes the unread entry fresh again.
        cache.set_ttl_multiplier(1e12);
        assert!(cache.get("prompt", "m").is_some());
    }

    #[test]
    fn test_raise_ttl_compounds() {
        let cache = ResponseCache::new(100, Duration::from_secs(60));
        assert_eq!(cache.ttl_multiplier(), 1.0);

        cache.raise_ttl(2.0);
        cache.raise_ttl(2.0);
        assert_eq!(cache.ttl_multiplier(), 4.0);
    }

    #[test]
    fn test_clear_preserves_stats() {
        let cache = ResponseCache::new(100, Duration::from_secs(60));
        cache.insert("one", "m", response("1"));
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.stats().insertions, 1);
    }
}
