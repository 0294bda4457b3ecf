//! # Transcription Cache
//!
//! Content-addressed store of prior transcription results, keyed by a sha256
//! hash of the audio bytes. An entry older than the TTL is logically absent
//! even before the next sweep touches it; capacity overruns evict the
//! least-recently-accessed entry.
//!
//! ## Why content addressing:
//! Hashing the bytes rather than the path means a re-downloaded copy of the
//! same video still hits the cache, which is the whole point of the layer.

use crate::config::CacheConfig;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A cached transcription result. `timestamp` is when the transcription was
/// originally produced, not when it was cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedTranscription {
    pub text: String,
    pub language: String,
    pub cost: f64,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CachedTranscription,
    cached_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    access_count: u64,
}

/// Cache statistics, mostly useful for verifying the layer is earning its
/// keep: `total_cost_avoided` is the sum of cached cost × access count.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub ttl_seconds: i64,
    pub total_accesses: u64,
    pub total_cost_avoided: f64,
}

/// Concurrent transcription-result cache. Clones share the same store.
#[derive(Clone)]
pub struct TranscriptionCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    ttl: Duration,
    max_entries: usize,
}

impl TranscriptionCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::days(config.ttl_days),
            max_entries: config.max_entries,
        }
    }

    /// Look up a result. Expired entries are evicted and reported as a miss;
    /// a hit bumps last-access time and access count.
    pub async fn get(&self, audio_hash: &str) -> Option<CachedTranscription> {
        let mut entries = self.entries.write().await;
        let entry = match entries.get_mut(audio_hash) {
            Some(entry) => entry,
            None => {
                debug!(audio_hash, "Cache miss");
                return None;
            }
        };

        let now = Utc::now();
        if now - entry.cached_at > self.ttl {
            debug!(audio_hash, "Cache entry expired");
            entries.remove(audio_hash);
            return None;
        }

        entry.last_accessed = now;
        entry.access_count += 1;
        info!(
            audio_hash,
            age_seconds = (now - entry.cached_at).num_seconds(),
            "Cache hit"
        );
        Some(entry.value.clone())
    }

    /// Insert or overwrite a result, evicting the least-recently-accessed
    /// entry first if the store is at capacity.
    pub async fn put(&self, audio_hash: String, value: CachedTranscription) {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(&audio_hash) && entries.len() >= self.max_entries {
            Self::evict_lru(&mut entries);
        }

        let now = Utc::now();
        entries.insert(
            audio_hash.clone(),
            CacheEntry {
                value,
                cached_at: now,
                last_accessed: now,
                access_count: 0,
            },
        );
        info!(audio_hash, cache_size = entries.len(), "Transcription cached");
    }

    fn evict_lru(entries: &mut HashMap<String, CacheEntry>) {
        let victim = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            entries.remove(&key);
            debug!(removed_key = %key, "Cache entry evicted (LRU)");
        }
    }

    /// Remove one entry explicitly.
    pub async fn remove(&self, audio_hash: &str) -> bool {
        let removed = self.entries.write().await.remove(audio_hash).is_some();
        if removed {
            info!(audio_hash, "Cache entry cleared");
        }
        removed
    }

    /// Drop everything.
    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let previous = entries.len();
        entries.clear();
        info!(previous_size = previous, "All cache entries cleared");
        previous
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        let mut total_accesses = 0u64;
        let mut total_cost_avoided = 0.0f64;
        for entry in entries.values() {
            total_accesses += entry.access_count;
            total_cost_avoided += entry.value.cost * entry.access_count as f64;
        }
        CacheStats {
            size: entries.len(),
            max_size: self.max_entries,
            ttl_seconds: self.ttl.num_seconds(),
            total_accesses,
            total_cost_avoided,
        }
    }

    /// Test hook: insert an entry with explicit bookkeeping timestamps, so
    /// TTL and LRU behavior can be exercised without sleeping.
    #[cfg(test)]
    async fn insert_raw(
        &self,
        audio_hash: &str,
        value: CachedTranscription,
        cached_at: DateTime<Utc>,
        last_accessed: DateTime<Utc>,
    ) {
        self.entries.write().await.insert(
            audio_hash.to_string(),
            CacheEntry {
                value,
                cached_at,
                last_accessed,
                access_count: 0,
            },
        );
    }
}

/// Compute the audio identity hash: sha256 over the file's contents, hex
/// encoded. Reads in chunks so large files do not land in memory whole.
pub fn audio_hash(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample(cost: f64) -> CachedTranscription {
        CachedTranscription {
            text: "chop the onions".to_string(),
            language: "en".to_string(),
            cost,
            confidence: 0.85,
            timestamp: Utc::now(),
        }
    }

    fn cache(max_entries: usize) -> TranscriptionCache {
        TranscriptionCache::new(&CacheConfig {
            ttl_days: 30,
            max_entries,
        })
    }

    #[tokio::test]
    async fn test_put_then_get_returns_same_result() {
        let cache = cache(10);
        cache.put("abc".to_string(), sample(0.5)).await;

        let hit = cache.get("abc").await.expect("should hit");
        assert_eq!(hit.text, "chop the onions");
        assert_eq!(hit.language, "en");

        // Each get bumps the access count by exactly one.
        cache.get("abc").await.unwrap();
        let stats = cache.stats().await;
        assert_eq!(stats.total_accesses, 2);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss_and_removed() {
        let cache = cache(10);
        let stale = Utc::now() - Duration::days(31);
        cache.insert_raw("old", sample(1.0), stale, stale).await;

        assert!(cache.get("old").await.is_none());
        assert_eq!(cache.stats().await.size, 0);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_accessed() {
        let cache = cache(2);
        let now = Utc::now();
        cache
            .insert_raw("colder", sample(1.0), now, now - Duration::hours(2))
            .await;
        cache
            .insert_raw("warmer", sample(1.0), now, now - Duration::hours(1))
            .await;

        cache.put("newest".to_string(), sample(1.0)).await;

        assert!(cache.get("colder").await.is_none(), "LRU entry must go");
        assert!(cache.get("warmer").await.is_some());
        assert!(cache.get("newest").await.is_some());
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let cache = cache(2);
        cache.put("a".to_string(), sample(1.0)).await;
        cache.put("b".to_string(), sample(1.0)).await;
        // Same key again: store is full but nothing should be evicted.
        cache.put("a".to_string(), sample(2.0)).await;
        assert_eq!(cache.stats().await.size, 2);
        assert!(cache.get("b").await.is_some());
    }

    #[tokio::test]
    async fn test_cost_avoided_accounting() {
        let cache = cache(10);
        cache.put("x".to_string(), sample(0.25)).await;
        cache.get("x").await.unwrap();
        cache.get("x").await.unwrap();
        cache.get("x").await.unwrap();
        let stats = cache.stats().await;
        assert!((stats.total_cost_avoided - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_clear_operations() {
        let cache = cache(10);
        cache.put("a".to_string(), sample(1.0)).await;
        cache.put("b".to_string(), sample(1.0)).await;

        assert!(cache.remove("a").await);
        assert!(!cache.remove("a").await);
        assert_eq!(cache.clear().await, 1);
        assert_eq!(cache.stats().await.size, 0);
    }

    #[test]
    fn test_audio_hash_is_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let path_a = dir.path().join("a.wav");
        let path_b = dir.path().join("b.wav");
        let mut fa = std::fs::File::create(&path_a).unwrap();
        let mut fb = std::fs::File::create(&path_b).unwrap();
        fa.write_all(b"identical audio bytes").unwrap();
        fb.write_all(b"identical audio bytes").unwrap();

        // Same bytes, different paths: same identity.
        assert_eq!(audio_hash(&path_a).unwrap(), audio_hash(&path_b).unwrap());

        let path_c = dir.path().join("c.wav");
        std::fs::write(&path_c, b"different bytes").unwrap();
        assert_ne!(audio_hash(&path_a).unwrap(), audio_hash(&path_c).unwrap());
    }
}
