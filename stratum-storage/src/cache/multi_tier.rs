//! Two-tier cache: in-memory LRU in front of the transactional store.
//!
//! Tier 1 is authoritative for reads that hit it. Tier 2 survives restarts
//! and lets cold entries leave memory without being lost. Tier 2 is
//! best-effort: its failures are logged, counted and otherwise ignored.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use stratum_core::{CacheSettings, StorageError, WorkspaceKey, WorkspaceName};
use tracing::{debug, warn};

use super::entry::{CacheEntry, CacheStats, CacheValue};
use super::lru::LruCache;
use super::scoped::WorkspaceCache;
use super::sweeper::{spawn_expiry_sweeper, SweeperHandle};
use super::traits::Cache;
use crate::serializer::{EntitySerializer, JsonSerializer};
use crate::store::TransactionalStore;

/// Namespace for cache records inside the persistent sub-database.
const TIER2_NAMESPACE: &str = "cache:";

fn tier2_id(key: &str) -> String {
    format!("{TIER2_NAMESPACE}{key}")
}

/// Per-tier counters on top of the combined cache stats.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TierStats {
    pub combined: CacheStats,
    pub tier1_hits: u64,
    pub tier2_hits: u64,
    pub tier2_errors: u64,
    pub promotions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total_gets: u64,
    hits: u64,
    misses: u64,
    total_sets: u64,
    tier1_hits: u64,
    tier2_hits: u64,
    tier2_errors: u64,
    tier2_expirations: u64,
    promotions: u64,
}

/// Read-through / write-through cache over an [`LruCache`] and an optional
/// persistent tier.
pub struct MultiTierCache<V, S = JsonSerializer> {
    memory: Arc<LruCache<V>>,
    persistent: Option<Arc<TransactionalStore<S>>>,
    database: String,
    counters: Mutex<Counters>,
}

impl<V: CacheValue> MultiTierCache<V, JsonSerializer> {
    /// A cache with no persistent tier.
    pub fn memory_only(memory: LruCache<V>) -> Self {
        Self {
            memory: Arc::new(memory),
            persistent: None,
            database: String::new(),
            counters: Mutex::new(Counters::default()),
        }
    }
}

impl<V, S> MultiTierCache<V, S>
where
    V: CacheValue + Serialize + DeserializeOwned,
    S: EntitySerializer,
{
    /// Build a cache whose tier 2 lives in sub-database `database` of `store`.
    pub fn new(
        memory: LruCache<V>,
        store: Arc<TransactionalStore<S>>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            memory: Arc::new(memory),
            persistent: Some(store),
            database: database.into(),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Build from settings. The store is only used when the persistent tier
    /// is enabled.
    pub fn from_settings(
        settings: &CacheSettings,
        store: Option<Arc<TransactionalStore<S>>>,
    ) -> Self {
        let persistent = if settings.persistent_tier { store } else { None };
        Self {
            memory: Arc::new(LruCache::from_settings(settings)),
            persistent,
            database: settings.persistent_database.clone(),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// The in-memory tier.
    pub fn memory(&self) -> &Arc<LruCache<V>> {
        &self.memory
    }

    pub fn has_persistent_tier(&self) -> bool {
        self.persistent.is_some()
    }

    /// Start the background expiry sweep of tier 1.
    pub fn spawn_sweeper(&self, every: Duration) -> SweeperHandle {
        spawn_expiry_sweeper(Arc::clone(&self.memory), every)
    }

    /// A view of this cache whose keys are confined to `workspace`.
    pub fn scoped(self: &Arc<Self>, workspace: WorkspaceName) -> WorkspaceCache<V, S> {
        WorkspaceCache::new(Arc::clone(self), workspace)
    }

    fn tier2_failed(&self, operation: &str, key: &str, error: &StorageError) {
        self.counters.lock().tier2_errors += 1;
        warn!(
            operation,
            key,
            error = %error,
            "Persistent cache tier failed, continuing with memory tier"
        );
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.counters.lock().total_gets += 1;

        if let Some(value) = self.memory.get(key) {
            let mut counters = self.counters.lock();
            counters.hits += 1;
            counters.tier1_hits += 1;
            return Some(value);
        }

        let value = self.get_persistent(key);
        let mut counters = self.counters.lock();
        if value.is_some() {
            counters.hits += 1;
            counters.tier2_hits += 1;
            counters.promotions += 1;
        } else {
            counters.misses += 1;
        }
        value
    }

    fn get_persistent(&self, key: &str) -> Option<V> {
        let store = self.persistent.as_ref()?;
        let id = tier2_id(key);
        let entry = match store.load_entity::<CacheEntry<V>>(&id, &self.database) {
            Ok(entry) => entry?,
            Err(e) => {
                self.tier2_failed("get", key, &e);
                return None;
            }
        };

        if entry.is_expired(Utc::now()) {
            self.counters.lock().tier2_expirations += 1;
            if let Err(e) = store.delete_entity(&id, &self.database) {
                self.tier2_failed("expire", key, &e);
            }
            return None;
        }

        // Promotion keeps creation time and ttl, so the entry dies on schedule.
        let value = entry.value.clone();
        self.memory.set_entry(entry);
        debug!(key, "Promoted cache entry from persistent tier");
        Some(value)
    }

    /// Write to tier 1, and to tier 2 when enabled.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        self.counters.lock().total_sets += 1;
        let entry = CacheEntry::new(key, value, ttl.or(self.memory.default_ttl()));

        if let Some(store) = &self.persistent {
            if let Err(e) = store.store_entity(&entry, &tier2_id(key), &self.database) {
                self.tier2_failed("set", key, &e);
            }
        }
        self.memory.set_entry(entry);
    }

    /// Remove from both tiers. True if either tier had the key.
    pub fn delete(&self, key: &str) -> bool {
        let in_memory = self.memory.delete(key);
        let persisted = match &self.persistent {
            Some(store) => match store.delete_entity(&tier2_id(key), &self.database) {
                Ok(found) => found,
                Err(e) => {
                    self.tier2_failed("delete", key, &e);
                    false
                }
            },
            None => false,
        };
        in_memory || persisted
    }

    pub fn clear(&self) {
        self.memory.clear();
        if let Some(store) = &self.persistent {
            if let Err(e) = store.clear_database(&self.database) {
                self.tier2_failed("clear", "*", &e);
            }
        }
    }

    /// Drop every entry whose key belongs to `workspace`, in both tiers.
    /// Returns the number of entries removed.
    pub fn invalidate_workspace(&self, workspace: &WorkspaceName) -> u64 {
        let prefix = workspace.key_prefix();
        let mut removed = self.memory.remove_prefix(&prefix) as u64;

        if let Some(store) = &self.persistent {
            let scan = WorkspaceKey::prefix(store.workspace(), &tier2_id(&prefix));
            match store.transaction(&self.database, true, |txn| txn.delete_prefix(&scan)) {
                Ok(count) => removed += count,
                Err(e) => self.tier2_failed("invalidate_workspace", &prefix, &e),
            }
        }

        debug!(workspace = %workspace, removed, "Invalidated workspace cache entries");
        removed
    }

    /// Combined counters plus tier-1 gauges.
    pub fn stats(&self) -> CacheStats {
        self.tier_stats().combined
    }

    pub fn tier_stats(&self) -> TierStats {
        let memory = self.memory.stats();
        let counters = self.counters.lock();
        TierStats {
            combined: CacheStats {
                total_gets: counters.total_gets,
                cache_hits: counters.hits,
                cache_misses: counters.misses,
                total_sets: counters.total_sets,
                evictions: memory.evictions,
                expirations: memory.expirations + counters.tier2_expirations,
                current_entries: memory.current_entries,
                memory_usage_bytes: memory.memory_usage_bytes,
            },
            tier1_hits: counters.tier1_hits,
            tier2_hits: counters.tier2_hits,
            tier2_errors: counters.tier2_errors,
            promotions: counters.promotions,
        }
    }
}

impl<V, S> Cache<V> for MultiTierCache<V, S>
where
    V: CacheValue + Serialize + DeserializeOwned,
    S: EntitySerializer,
{
    fn get(&self, key: &str) -> Option<V> {
        MultiTierCache::get(self, key)
    }

    fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        MultiTierCache::set(self, key, value, ttl)
    }

    fn delete(&self, key: &str) -> bool {
        MultiTierCache::delete(self, key)
    }

    fn clear(&self) {
        MultiTierCache::clear(self)
    }

    fn stats(&self) -> CacheStats {
        MultiTierCache::stats(self)
    }
}

impl<V, S> std::fmt::Debug for MultiTierCache<V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiTierCache")
            .field("memory", &self.memory)
            .field("persistent", &self.persistent.is_some())
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ConnectionPool;
    use stratum_core::StorageConfig;

    fn create_test_store() -> (Arc<TransactionalStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = StorageConfig::default()
            .with_map_size_mb(10)
            .with_durable_sync(false);
        let pool = Arc::new(ConnectionPool::new(dir.path(), config));
        let ws = WorkspaceName::new("_cache").expect("workspace");
        let store = TransactionalStore::new(pool, ws, "cache").expect("store");
        (Arc::new(store), dir)
    }

    fn two_tier(store: &Arc<TransactionalStore>) -> MultiTierCache<String> {
        MultiTierCache::new(LruCache::new(16, usize::MAX), Arc::clone(store), "entries")
    }

    #[test]
    fn test_memory_hit_counts_tier1() {
        let (store, _dir) = create_test_store();
        let cache = two_tier(&store);
        cache.set("k", "v".to_string(), None);
        assert_eq!(cache.get("k").as_deref(), Some("v"));

        let stats = cache.tier_stats();
        assert_eq!(stats.tier1_hits, 1);
        assert_eq!(stats.tier2_hits, 0);
        assert_eq!(stats.combined.cache_hits, 1);
        assert_eq!(stats.combined.total_gets, 1);
    }

    #[test]
    fn test_persistent_hit_promotes_with_original_ttl() {
        let (store, _dir) = create_test_store();
        let writer = two_tier(&store);
        writer.set("k", "v".to_string(), Some(Duration::from_secs(600)));
        let original = writer.memory().peek_entry("k").expect("entry");

        // Fresh memory tier, same persistent tier: a process restart.
        let reader = two_tier(&store);
        assert_eq!(reader.get("k").as_deref(), Some("v"));
        let promoted = reader.memory().peek_entry("k").expect("promoted");
        assert_eq!(promoted.ttl, Some(Duration::from_secs(600)));
        assert_eq!(promoted.created_at, original.created_at);

        assert_eq!(reader.get("k").as_deref(), Some("v"));
        let stats = reader.tier_stats();
        assert_eq!(stats.tier2_hits, 1);
        assert_eq!(stats.promotions, 1);
        assert_eq!(stats.tier1_hits, 1);
    }

    #[test]
    fn test_expired_persistent_entry_is_deleted() {
        let (store, _dir) = create_test_store();
        let writer = two_tier(&store);
        writer.set("k", "v".to_string(), Some(Duration::from_millis(20)));
        std::thread::sleep(Duration::from_millis(60));

        let reader = two_tier(&store);
        assert_eq!(reader.get("k"), None);
        assert!(!store.entity_exists("cache:k", "entries").expect("exists"));
        assert_eq!(reader.stats().expirations, 1);
        assert_eq!(reader.stats().cache_misses, 1);
    }

    #[test]
    fn test_delete_reports_either_tier() {
        let (store, _dir) = create_test_store();
        let writer = two_tier(&store);
        writer.set("k", "v".to_string(), None);

        let other = two_tier(&store);
        assert!(other.delete("k"));
        assert!(!other.delete("k"));
        assert!(writer.delete("k"));
        assert_eq!(two_tier(&store).get("k"), None);
    }

    #[test]
    fn test_clear_empties_both_tiers() {
        let (store, _dir) = create_test_store();
        let cache = two_tier(&store);
        cache.set("a", "1".to_string(), None);
        cache.set("b", "2".to_string(), None);
        cache.clear();

        assert!(cache.memory().is_empty());
        assert_eq!(cache.get("a"), None);
        assert_eq!(store.count("", "entries").expect("count"), 0);
    }

    #[test]
    fn test_invalidate_workspace_is_scoped() {
        let (store, _dir) = create_test_store();
        let cache = two_tier(&store);
        let alpha = WorkspaceName::new("alpha").expect("ws");
        cache.set("alpha:one", "1".to_string(), None);
        cache.set("alpha:two", "2".to_string(), None);
        cache.set("beta:one", "3".to_string(), None);

        // Both tiers hold two alpha entries.
        assert_eq!(cache.invalidate_workspace(&alpha), 4);
        assert_eq!(cache.get("alpha:one"), None);
        assert_eq!(cache.get("beta:one").as_deref(), Some("3"));
        assert_eq!(two_tier(&store).get("alpha:two"), None);
    }

    #[test]
    fn test_persistent_failures_are_absorbed() {
        let (store, _dir) = create_test_store();
        store.pool().close_all();
        let cache = two_tier(&store);

        cache.set("k", "v".to_string(), None);
        assert_eq!(cache.get("k").as_deref(), Some("v"));
        assert_eq!(cache.get("missing"), None);

        let stats = cache.tier_stats();
        assert_eq!(stats.tier2_errors, 2);
        assert_eq!(stats.combined.cache_misses, 1);
    }

    #[test]
    fn test_memory_only_cache() {
        let cache = MultiTierCache::memory_only(LruCache::<u64>::new(2, usize::MAX));
        assert!(!cache.has_persistent_tier());
        cache.set("a", 1, None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
        assert!(cache.delete("a"));
        assert_eq!(cache.tier_stats().tier2_errors, 0);
    }

    #[test]
    fn test_settings_disable_persistent_tier() {
        let (store, _dir) = create_test_store();
        let settings = CacheSettings::default().with_persistent_tier(false);
        let cache: MultiTierCache<String> = MultiTierCache::from_settings(&settings, Some(store));
        assert!(!cache.has_persistent_tier());
    }
}
