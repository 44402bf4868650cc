//! Size- and memory-bounded LRU cache with per-entry TTL.
//!
//! One mutex guards the recency order, the memory gauge and the counters.
//! Reads take the same lock because they reorder entries. Entries are only
//! ever inserted or removed whole while the lock is held, so any observer
//! (including the background sweeper) sees a consistent cache.

use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use stratum_core::CacheSettings;
use tracing::debug;

use super::entry::{CacheEntry, CacheStats, CacheValue};

struct LruState<V> {
    entries: lru::LruCache<String, CacheEntry<V>>,
    memory_bytes: usize,
    stats: CacheStats,
}

impl<V> LruState<V> {
    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.pop(key)?;
        self.memory_bytes = self.memory_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn pop_lru(&mut self) -> Option<CacheEntry<V>> {
        let (_, entry) = self.entries.pop_lru()?;
        self.memory_bytes = self.memory_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    /// Remove every expired entry. Returns how many were removed.
    fn sweep_expired(&mut self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        self.stats.expirations += expired.len() as u64;
        expired.len()
    }
}

/// In-process LRU cache.
pub struct LruCache<V> {
    max_size: usize,
    max_memory_bytes: usize,
    default_ttl: Option<Duration>,
    state: Mutex<LruState<V>>,
}

impl<V: CacheValue> LruCache<V> {
    /// Create a cache holding at most `max_size` entries and roughly
    /// `max_memory_bytes` of estimated data.
    pub fn new(max_size: usize, max_memory_bytes: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            max_memory_bytes,
            default_ttl: None,
            state: Mutex::new(LruState {
                entries: lru::LruCache::unbounded(),
                memory_bytes: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.max_entries, settings.max_memory_bytes)
            .with_default_ttl(settings.default_ttl())
    }

    /// Ttl applied by [`set`](Self::set) when the caller passes none.
    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn max_memory_bytes(&self) -> usize {
        self.max_memory_bytes
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    /// Look up `key`, marking it most recently used.
    ///
    /// An expired entry is evicted and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.stats.total_gets += 1;

        let now = Utc::now();
        let expired = match state.entries.peek(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                state.stats.cache_misses += 1;
                return None;
            }
        };

        if expired {
            state.remove(key);
            state.stats.cache_misses += 1;
            state.stats.expirations += 1;
            debug!(key, "Cache entry expired on read");
            return None;
        }

        let entry = state.entries.get_mut(key)?;
        entry.touch(now);
        let value = entry.value.clone();
        state.stats.cache_hits += 1;
        Some(value)
    }

    /// Insert or replace `key`. `ttl` falls back to the default ttl.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let entry = CacheEntry::new(key, value, ttl.or(self.default_ttl));
        self.set_entry(entry);
    }

    /// Insert a prepared entry as is, keeping its creation time, ttl and
    /// access history.
    pub fn set_entry(&self, entry: CacheEntry<V>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let key = entry.key.clone();
        state.memory_bytes += entry.size_bytes;
        if let Some(old) = state.entries.put(key.clone(), entry) {
            state.memory_bytes = state.memory_bytes.saturating_sub(old.size_bytes);
        }
        state.stats.total_sets += 1;

        self.enforce_limits(state, &key);
    }

    /// Expired first, then count, then memory. The newest entry survives
    /// even when it alone exceeds the memory budget.
    fn enforce_limits(&self, state: &mut LruState<V>, newest: &str) {
        let expired = state.sweep_expired();

        let mut evicted = 0u64;
        while state.entries.len() > self.max_size && state.entries.len() > 1 {
            if state.pop_lru().is_none() {
                break;
            }
            evicted += 1;
        }
        while state.memory_bytes > self.max_memory_bytes && state.entries.len() > 1 {
            if state.pop_lru().is_none() {
                break;
            }
            evicted += 1;
        }
        state.stats.evictions += evicted;

        if expired > 0 || evicted > 0 {
            debug!(
                key = newest,
                expired,
                evicted,
                entries = state.entries.len(),
                memory_bytes = state.memory_bytes,
                "Enforced cache limits"
            );
        }
    }

    /// Returns whether the key was present.
    pub fn delete(&self, key: &str) -> bool {
        self.state.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.memory_bytes = 0;
    }

    /// Whether a live entry exists. Does not affect recency.
    pub fn contains(&self, key: &str) -> bool {
        let now = Utc::now();
        self.state
            .lock()
            .entries
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<String> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Copy of an entry and its metadata, without touching it.
    pub fn peek_entry(&self, key: &str) -> Option<CacheEntry<V>> {
        self.state.lock().entries.peek(key).cloned()
    }

    /// Drop every expired entry now. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        self.state.lock().sweep_expired()
    }

    /// Drop every entry whose key starts with `prefix`.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut state = self.state.lock();
        let keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            state.remove(key);
        }
        keys.len()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            current_entries: state.entries.len() as u64,
            memory_usage_bytes: state.memory_bytes as u64,
            ..state.stats.clone()
        }
    }
}

impl<V> std::fmt::Debug for LruCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("max_size", &self.max_size)
            .field("max_memory_bytes", &self.max_memory_bytes)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_lru_key_evicted_after_n_plus_one(n in 1usize..20) {
            let cache: LruCache<u64> = LruCache::new(n, usize::MAX);
            for i in 0..=n {
                cache.set(format!("k{i}"), i as u64, None);
            }
            prop_assert!(!cache.contains("k0"));
            for i in 1..=n {
                let key = format!("k{i}");
                prop_assert!(cache.contains(&key));
            }
            prop_assert_eq!(cache.len(), n);
        }

        #[test]
        fn prop_never_exceeds_max_size(
            max in 1usize..16,
            keys in proptest::collection::vec("[a-e]{1,2}", 1..60),
        ) {
            let cache: LruCache<u64> = LruCache::new(max, usize::MAX);
            for (i, key) in keys.iter().enumerate() {
                cache.set(key.clone(), i as u64, None);
                prop_assert!(cache.len() <= max);
            }
            let last = keys.last().expect("non-empty");
            prop_assert!(cache.contains(last));
        }
    }
}
