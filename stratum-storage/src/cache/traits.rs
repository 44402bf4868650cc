//! Cache contract shared by every cache layer.

use std::time::Duration;

use super::entry::{CacheStats, CacheValue};
use super::lru::LruCache;

/// The get/set/delete contract callers program against.
///
/// Implementations are synchronous and thread-safe; none of them perform
/// network I/O.
pub trait Cache<V>: Send + Sync {
    fn get(&self, key: &str) -> Option<V>;

    /// `ttl = None` uses the implementation's default ttl, if any.
    fn set(&self, key: &str, value: V, ttl: Option<Duration>);

    /// Returns whether the key was present.
    fn delete(&self, key: &str) -> bool;

    fn clear(&self);

    fn stats(&self) -> CacheStats;
}

impl<V: CacheValue> Cache<V> for LruCache<V> {
    fn get(&self, key: &str) -> Option<V> {
        LruCache::get(self, key)
    }

    fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        LruCache::set(self, key, value, ttl)
    }

    fn delete(&self, key: &str) -> bool {
        LruCache::delete(self, key)
    }

    fn clear(&self) {
        LruCache::clear(self)
    }

    fn stats(&self) -> CacheStats {
        LruCache::stats(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_through_trait_object() {
        let cache: Box<dyn Cache<String>> = Box::new(LruCache::new(2, usize::MAX));
        cache.set("a", "1".to_string(), None);
        assert_eq!(cache.get("a").as_deref(), Some("1"));
        assert!(cache.delete("a"));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.stats().total_sets, 1);
    }
}
