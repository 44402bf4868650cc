//! Composition root: one pool, one governance manager, one shared cache.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use stratum_core::{StorageError, StratumConfig, StratumResult, WorkspaceName};
use stratum_governance::{AccessControlManager, SecurityMonitor};
use stratum_storage::{ConnectionPool, MultiTierCache, SweeperHandle, TransactionalStore};
use tracing::{debug, info, warn};

use crate::handle::WorkspaceHandle;

/// Value type of the shared cache.
pub type SharedValue = serde_json::Value;

pub type SharedCache = MultiTierCache<SharedValue>;

/// Workspace holding tier-2 cache entries. Not openable through [`Stratum::workspace`].
pub const CACHE_WORKSPACE: &str = "_cache";

/// Environment (per workspace directory) entity stores live in.
pub const DEFAULT_ENVIRONMENT: &str = "main";

const CACHE_ENVIRONMENT: &str = "cache";

pub struct Stratum {
    config: StratumConfig,
    pool: Arc<ConnectionPool>,
    governance: Arc<AccessControlManager>,
    cache: Arc<SharedCache>,
    stores: Mutex<HashMap<WorkspaceName, Arc<TransactionalStore>>>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl Stratum {
    /// Validate `config` and wire everything up. Nothing is opened on disk
    /// until the first operation.
    ///
    /// When called inside a tokio runtime the cache expiry sweeper is started
    /// as well; otherwise see [`start_sweeper`](Self::start_sweeper).
    pub fn open(config: StratumConfig) -> StratumResult<Self> {
        config.validate()?;

        let pool = Arc::new(ConnectionPool::new(
            config.database_root.clone(),
            config.storage.clone(),
        ));
        let governance = Arc::new(AccessControlManager::from_config(&config.governance));

        let cache_store = if config.cache.persistent_tier {
            Some(Arc::new(TransactionalStore::new(
                Arc::clone(&pool),
                WorkspaceName::new(CACHE_WORKSPACE)?,
                CACHE_ENVIRONMENT,
            )?))
        } else {
            None
        };
        let cache = Arc::new(SharedCache::from_settings(&config.cache, cache_store));

        info!(
            root = %config.database_root.display(),
            persistent_cache = cache.has_persistent_tier(),
            monitor = governance.monitor().is_some(),
            "Stratum opened"
        );

        let stratum = Self {
            config,
            pool,
            governance,
            cache,
            stores: Mutex::new(HashMap::new()),
            sweeper: Mutex::new(None),
        };
        if tokio::runtime::Handle::try_current().is_ok() {
            stratum.start_sweeper();
        } else {
            debug!("No tokio runtime, cache sweeper not started");
        }
        Ok(stratum)
    }

    /// Start the cache expiry sweeper if it is not running. Must be called
    /// from within a tokio runtime. Returns whether a sweeper was started.
    pub fn start_sweeper(&self) -> bool {
        let mut sweeper = self.sweeper.lock();
        if sweeper.as_ref().is_some_and(|s| !s.is_finished()) {
            return false;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("Cannot start cache sweeper outside a tokio runtime");
            return false;
        }
        *sweeper = Some(self.cache.spawn_sweeper(self.config.cache.sweep_interval()));
        true
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|s| !s.is_finished())
    }

    /// Governed handle on workspace `name`.
    pub fn workspace(&self, name: &str) -> StratumResult<WorkspaceHandle> {
        let name = WorkspaceName::new(name)?;
        if name.as_str() == CACHE_WORKSPACE {
            return Err(StorageError::InvalidName {
                name: name.to_string(),
                reason: "reserved for the persistent cache".to_string(),
            }
            .into());
        }

        let store = {
            let mut stores = self.stores.lock();
            match stores.get(&name) {
                Some(store) => Arc::clone(store),
                None => {
                    let store = Arc::new(TransactionalStore::new(
                        Arc::clone(&self.pool),
                        name.clone(),
                        DEFAULT_ENVIRONMENT,
                    )?);
                    stores.insert(name.clone(), Arc::clone(&store));
                    debug!(workspace = %name, "Workspace store created");
                    store
                }
            }
        };

        let cache = self.cache.scoped(name.clone());
        Ok(WorkspaceHandle::new(
            name,
            store,
            Arc::clone(&self.governance),
            cache,
        ))
    }

    pub fn config(&self) -> &StratumConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn governance(&self) -> &Arc<AccessControlManager> {
        &self.governance
    }

    pub fn monitor(&self) -> Option<&Arc<SecurityMonitor>> {
        self.governance.monitor()
    }

    pub fn cache(&self) -> &Arc<SharedCache> {
        &self.cache
    }

    /// Cancel the sweeper and close the pool. Later operations fail with
    /// `PoolClosed`.
    pub fn close(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.cancel();
        }
        self.pool.close_all();
        info!(root = %self.config.database_root.display(), "Stratum closed");
    }

    /// Like [`close`](Self::close), but waits for the sweeper to exit.
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }
        self.close();
    }
}

impl Drop for Stratum {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.cancel();
        }
    }
}

impl std::fmt::Debug for Stratum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stratum")
            .field("root", &self.config.database_root)
            .field("workspaces", &self.stores.lock().len())
            .field("pool", &self.pool.stats())
            .finish()
    }
}
