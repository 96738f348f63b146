//! In-process TTL + LRU cache for hot Catalog reads.
//!
//! Values are stored as JSON so callers get copies, never aliases into
//! the cache. Reads take the shared lock and do not refresh recency;
//! writes serialize on the exclusive lock and refresh LRU position.
//! Expired entries are removed on lookup and report a miss.

use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::debug;

/// Default per-entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
/// Entity listings change rarely and are expensive to refetch.
pub const ENTITY_TTL: Duration = Duration::from_secs(3600);
const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct EntityCache {
    inner: RwLock<LruCache<String, CacheEntry>>,
    default_ttl: Duration,
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl EntityCache {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: RwLock::new(LruCache::new(capacity)),
            default_ttl,
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        {
            let cache = self.inner.read().ok()?;
            match cache.peek(key) {
                None => {
                    debug!("cache MISS: {key}");
                    return None;
                }
                Some(entry) if entry.expires_at > Instant::now() => {
                    debug!("cache HIT: {key}");
                    return serde_json::from_value(entry.value.clone()).ok();
                }
                Some(_) => {}
            }
        }

        // Entry exists but is expired; drop it under the write lock.
        if let Ok(mut cache) = self.inner.write() {
            cache.pop(key);
        }
        debug!("cache EXPIRED: {key}");
        None
    }

    pub fn set<T: Serialize>(&self, key: impl Into<String>, value: &T, ttl: Option<Duration>) {
        let key = key.into();
        let Ok(value) = serde_json::to_value(value) else {
            return;
        };
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl.unwrap_or(self.default_ttl),
        };
        if let Ok(mut cache) = self.inner.write() {
            cache.put(key, entry);
        }
    }

    pub fn delete(&self, key: &str) {
        if let Ok(mut cache) = self.inner.write() {
            cache.pop(key);
        }
    }

    /// Remove every entry whose key starts with `prefix`. Called whenever
    /// the client mutates an entity set.
    pub fn invalidate(&self, prefix: &str) {
        let Ok(mut cache) = self.inner.write() else {
            return;
        };
        let keys: Vec<String> = cache
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        if !keys.is_empty() {
            debug!("invalidating {} cache entries under {prefix}", keys.len());
        }
        for key in keys {
            cache.pop(&key);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.inner.write() {
            cache.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Key construction for the cache namespaces.
#[derive(Debug, Clone, Copy)]
pub struct CacheKeys;

impl CacheKeys {
    pub fn scene(id: &str) -> String {
        format!("scene:{id}")
    }

    pub fn entities_all(kind: &str) -> String {
        format!("entities:{kind}:all")
    }

    pub fn entity_name(kind: &str, name: &str) -> String {
        format!("entities:{kind}:name:{}", name.to_lowercase())
    }

    pub fn entity_prefix(kind: &str) -> String {
        format!("entities:{kind}:")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_entries_report_miss_and_are_removed() {
        let cache = EntityCache::new(10, Duration::from_millis(0));
        cache.set("k", &"v", None);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get::<String>("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn lru_evicts_oldest_when_full() {
        let cache = EntityCache::new(2, DEFAULT_TTL);
        cache.set("a", &1, None);
        cache.set("b", &2, None);
        cache.set("c", &3, None);
        assert_eq!(cache.get::<i32>("a"), None);
        assert_eq!(cache.get::<i32>("b"), Some(2));
        assert_eq!(cache.get::<i32>("c"), Some(3));
    }

    #[test]
    fn prefix_invalidation_is_scoped() {
        let cache = EntityCache::default();
        cache.set("entities:tags:all", &vec!["a"], None);
        cache.set("entities:tags:name:a", &"a", None);
        cache.set("entities:performers:all", &vec!["p"], None);

        cache.invalidate(&CacheKeys::entity_prefix("tags"));

        assert_eq!(cache.get::<Vec<String>>("entities:tags:all"), None);
        assert_eq!(cache.get::<String>("entities:tags:name:a"), None);
        assert_eq!(
            cache.get::<Vec<String>>("entities:performers:all"),
            Some(vec!["p".to_string()])
        );
    }

    #[test]
    fn values_are_copies_not_aliases() {
        let cache = EntityCache::default();
        cache.set("list", &vec![1, 2, 3], None);
        let mut first: Vec<i32> = cache.get("list").unwrap();
        first.push(4);
        let second: Vec<i32> = cache.get("list").unwrap();
        assert_eq!(second, vec![1, 2, 3]);
    }
}
