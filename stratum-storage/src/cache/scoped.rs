//! Workspace-confined view of a shared cache.

use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use stratum_core::{WorkspaceKey, WorkspaceName};

use super::entry::{CacheStats, CacheValue};
use super::multi_tier::MultiTierCache;
use super::traits::Cache;
use crate::serializer::{EntitySerializer, JsonSerializer};

/// Every key passed through this view is rewritten to `"<workspace>:<key>"`,
/// so two views over the same cache can never read each other's entries.
pub struct WorkspaceCache<V, S = JsonSerializer> {
    inner: Arc<MultiTierCache<V, S>>,
    workspace: WorkspaceName,
}

impl<V, S> Clone for WorkspaceCache<V, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            workspace: self.workspace.clone(),
        }
    }
}

impl<V, S> WorkspaceCache<V, S>
where
    V: CacheValue + Serialize + DeserializeOwned,
    S: EntitySerializer,
{
    pub fn new(inner: Arc<MultiTierCache<V, S>>, workspace: WorkspaceName) -> Self {
        Self { inner, workspace }
    }

    pub fn workspace(&self) -> &WorkspaceName {
        &self.workspace
    }

    /// The shared cache behind this view.
    pub fn shared(&self) -> &Arc<MultiTierCache<V, S>> {
        &self.inner
    }

    fn scoped_key(&self, key: &str) -> String {
        WorkspaceKey::new(&self.workspace, key).encode()
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.get(&self.scoped_key(key))
    }

    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        self.inner.set(&self.scoped_key(key), value, ttl)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.delete(&self.scoped_key(key))
    }

    /// Drop this workspace's entries only.
    pub fn clear(&self) -> u64 {
        self.inner.invalidate_workspace(&self.workspace)
    }
}

impl<V, S> Cache<V> for WorkspaceCache<V, S>
where
    V: CacheValue + Serialize + DeserializeOwned,
    S: EntitySerializer,
{
    fn get(&self, key: &str) -> Option<V> {
        WorkspaceCache::get(self, key)
    }

    fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        WorkspaceCache::set(self, key, value, ttl)
    }

    fn delete(&self, key: &str) -> bool {
        WorkspaceCache::delete(self, key)
    }

    fn clear(&self) {
        WorkspaceCache::clear(self);
    }

    /// Stats of the shared cache; they are not split per workspace.
    fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

impl<V, S> std::fmt::Debug for WorkspaceCache<V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceCache")
            .field("workspace", &self.workspace)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::lru::LruCache;

    fn shared() -> Arc<MultiTierCache<String>> {
        Arc::new(MultiTierCache::memory_only(LruCache::new(32, usize::MAX)))
    }

    fn ws(name: &str) -> WorkspaceName {
        WorkspaceName::new(name).expect("workspace")
    }

    #[test]
    fn test_views_are_isolated() {
        let cache = shared();
        let alpha = cache.scoped(ws("alpha"));
        let beta = cache.scoped(ws("beta"));

        alpha.set("config", "alpha-config".to_string(), None);
        assert_eq!(alpha.get("config").as_deref(), Some("alpha-config"));
        assert_eq!(beta.get("config"), None);
        assert!(!beta.delete("config"));
        assert!(cache.memory().contains("alpha:config"));
    }

    #[test]
    fn test_clear_only_drops_own_workspace() {
        let cache = shared();
        let alpha = cache.scoped(ws("alpha"));
        let beta = cache.scoped(ws("beta"));
        alpha.set("a", "1".to_string(), None);
        alpha.set("b", "2".to_string(), None);
        beta.set("a", "3".to_string(), None);

        assert_eq!(alpha.clear(), 2);
        assert_eq!(alpha.get("a"), None);
        assert_eq!(beta.get("a").as_deref(), Some("3"));
    }

    #[test]
    fn test_view_as_cache_trait() {
        let cache = shared();
        let view: Box<dyn Cache<String>> = Box::new(cache.scoped(ws("alpha")));
        view.set("k", "v".to_string(), None);
        assert_eq!(view.get("k").as_deref(), Some("v"));
        view.clear();
        assert_eq!(view.get("k"), None);
    }
}
