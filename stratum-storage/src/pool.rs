//! Connection pool for LMDB environments.
//!
//! The pool owns every environment handle it creates. A handle is checked out
//! as an [`EnvLease`], which removes it from the idle set for as long as the
//! lease lives and hands it back on drop. A handle that is mid-transaction is
//! therefore never visible to another caller.
//!
//! # Advisory capacity
//!
//! `max_connections` bounds the number of *pooled* handles per
//! workspace/database pair. When all of them are checked out, `acquire`
//! opens a temporary over-limit handle instead of blocking, and closes it on
//! release. Callers are never deadlocked by pool exhaustion; the number of
//! over-limit handles is reported in [`PoolStats::over_limit_created`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use heed::{Env, EnvFlags, EnvOpenOptions};
use parking_lot::Mutex;
use stratum_core::{validate_component, StorageConfig, StorageError, WorkspaceName};
use tracing::{debug, warn};

/// Longest accepted database (environment directory) name.
pub const MAX_DATABASE_NAME_LEN: usize = 128;

/// LMDB reader slots per environment.
const MAX_READERS: u32 = 126;

/// Identity of a pooled environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub workspace: WorkspaceName,
    pub database: String,
    pub readonly: bool,
}

impl PoolKey {
    pub fn new(workspace: WorkspaceName, database: impl Into<String>, readonly: bool) -> Self {
        Self {
            workspace,
            database: database.into(),
            readonly,
        }
    }
}

/// An opened environment handle, owned by the pool.
///
/// Not `Clone`: a handle is either idle inside the pool or held by exactly
/// one lease.
pub struct PooledEnvironment {
    id: u64,
    key: PoolKey,
    env: Env,
    over_limit: bool,
    opened_at: Instant,
    uses: u64,
}

impl PooledEnvironment {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn is_readonly(&self) -> bool {
        self.key.readonly
    }

    pub fn is_over_limit(&self) -> bool {
        self.over_limit
    }

    /// How many times this handle has been checked out.
    pub fn uses(&self) -> u64 {
        self.uses
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }
}

impl fmt::Debug for PooledEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledEnvironment")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("over_limit", &self.over_limit)
            .field("uses", &self.uses)
            .finish_non_exhaustive()
    }
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Pooled handles currently open (idle or checked out), excluding over-limit ones.
    pub created: usize,
    pub idle: usize,
    pub in_use: usize,
    /// Temporary handles opened because the pool was exhausted.
    pub over_limit_created: u64,
    pub acquisitions: u64,
    pub reuses: u64,
}

#[derive(Debug, Default)]
struct PoolState {
    idle: HashMap<PoolKey, Vec<PooledEnvironment>>,
    in_use: HashMap<u64, PoolKey>,
    created: HashMap<PoolKey, usize>,
    next_id: u64,
    closed: bool,
    over_limit_created: u64,
    acquisitions: u64,
    reuses: u64,
}

impl PoolState {
    fn forget_created(&mut self, key: &PoolKey) {
        if let Some(count) = self.created.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.created.remove(key);
            }
        }
    }
}

/// Pool of LMDB environment handles, one set per workspace/database pair.
///
/// Environments live at `<root>/<workspace>/<database>/`.
#[derive(Debug)]
pub struct ConnectionPool {
    root: PathBuf,
    config: StorageConfig,
    state: Mutex<PoolState>,
}

impl ConnectionPool {
    /// Create an empty pool. No environment is opened until first acquired.
    pub fn new(root: impl Into<PathBuf>, config: StorageConfig) -> Self {
        Self {
            root: root.into(),
            config,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Directory of the environment for a workspace/database pair.
    pub fn environment_path(&self, workspace: &WorkspaceName, database: &str) -> PathBuf {
        self.root.join(workspace.as_str()).join(database)
    }

    /// Check out a handle for `workspace`/`database`.
    ///
    /// Reuses an idle handle when one exists, otherwise opens a new one. Never
    /// blocks waiting for another caller to release.
    pub fn acquire(
        &self,
        workspace: &WorkspaceName,
        database: &str,
        readonly: bool,
    ) -> Result<EnvLease<'_>, StorageError> {
        validate_component(database, MAX_DATABASE_NAME_LEN)?;
        let key = PoolKey::new(
            workspace.clone(),
            database,
            readonly || self.config.readonly,
        );

        let (id, over_limit) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.closed {
                return Err(StorageError::PoolClosed);
            }
            state.acquisitions += 1;

            if let Some(mut handle) = state.idle.get_mut(&key).and_then(Vec::pop) {
                handle.uses += 1;
                state.in_use.insert(handle.id, key.clone());
                state.reuses += 1;
                debug!(
                    workspace = %key.workspace,
                    database = %key.database,
                    handle = handle.id,
                    "Reusing pooled environment"
                );
                return Ok(EnvLease::new(self, handle));
            }

            let created = state.created.entry(key.clone()).or_insert(0);
            let over_limit = *created >= self.config.max_connections;
            if !over_limit {
                *created += 1;
            }
            let id = state.next_id;
            state.next_id += 1;
            (id, over_limit)
        };

        if over_limit {
            warn!(
                workspace = %key.workspace,
                database = %key.database,
                max_connections = self.config.max_connections,
                "Connection pool exhausted, opening temporary over-limit environment"
            );
        }

        // Opening may block on the filesystem; the pool lock is not held here.
        let env = match self.open_environment(&key) {
            Ok(env) => env,
            Err(e) => {
                let mut state = self.state.lock();
                if !over_limit {
                    state.forget_created(&key);
                }
                return Err(e);
            }
        };

        let handle = PooledEnvironment {
            id,
            key: key.clone(),
            env,
            over_limit,
            opened_at: Instant::now(),
            uses: 1,
        };

        {
            let mut state = self.state.lock();
            if over_limit {
                state.over_limit_created += 1;
            }
            state.in_use.insert(id, key.clone());
        }
        debug!(
            workspace = %key.workspace,
            database = %key.database,
            handle = id,
            over_limit,
            "Opened environment"
        );
        Ok(EnvLease::new(self, handle))
    }

    /// Return a handle. Kept idle if the pool has room for it, closed otherwise.
    pub fn release(&self, handle: PooledEnvironment) {
        let mut state = self.state.lock();
        state.in_use.remove(&handle.id);

        if handle.over_limit {
            debug!(handle = handle.id, "Closing over-limit environment");
            return;
        }
        if state.closed {
            state.forget_created(&handle.key);
            return;
        }

        let max = self.config.max_connections;
        let idle = state.idle.entry(handle.key.clone()).or_default();
        if idle.len() < max {
            idle.push(handle);
        } else {
            let key = handle.key.clone();
            drop(handle);
            state.forget_created(&key);
        }
    }

    /// Close every idle handle and refuse further acquisitions. Handles still
    /// checked out are closed when their leases end.
    pub fn close_all(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        let idle: Vec<PooledEnvironment> = state.idle.drain().flat_map(|(_, v)| v).collect();
        for handle in &idle {
            state.forget_created(&handle.key);
        }
        debug!(closed = idle.len(), "Connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            created: state.created.values().sum(),
            idle: state.idle.values().map(Vec::len).sum(),
            in_use: state.in_use.len(),
            over_limit_created: state.over_limit_created,
            acquisitions: state.acquisitions,
            reuses: state.reuses,
        }
    }

    fn open_environment(&self, key: &PoolKey) -> Result<Env, StorageError> {
        let path = self.environment_path(&key.workspace, &key.database);
        let connection_failed = |reason: String| StorageError::ConnectionFailed {
            workspace: key.workspace.to_string(),
            database: key.database.clone(),
            reason,
        };

        if self.config.readonly {
            if !path.join("data.mdb").exists() {
                return Err(connection_failed(format!(
                    "environment {} does not exist",
                    path.display()
                )));
            }
        } else {
            std::fs::create_dir_all(&path).map_err(|e| connection_failed(e.to_string()))?;
        }

        // Every handle on the same path is opened with identical options, so
        // heed hands back the already-open environment instead of failing.
        let mut flags = EnvFlags::empty();
        if !self.config.durable_sync {
            flags |= EnvFlags::NO_SYNC;
        }
        if self.config.readonly {
            flags |= EnvFlags::READ_ONLY;
        }

        let mut options = EnvOpenOptions::new();
        options
            .map_size(self.config.effective_map_size())
            .max_dbs(self.config.max_named_databases)
            .max_readers(MAX_READERS);

        unsafe {
            options.flags(flags);
            options.open(&path)
        }
        .map_err(|e| connection_failed(e.to_string()))
    }
}

/// A checked-out environment. Returns itself to the pool exactly once, when
/// dropped or explicitly released.
#[derive(Debug)]
pub struct EnvLease<'p> {
    pool: &'p ConnectionPool,
    handle: Option<PooledEnvironment>,
}

impl<'p> EnvLease<'p> {
    fn new(pool: &'p ConnectionPool, handle: PooledEnvironment) -> Self {
        Self {
            pool,
            handle: Some(handle),
        }
    }

    fn handle(&self) -> &PooledEnvironment {
        match &self.handle {
            Some(handle) => handle,
            // Only taken inside Drop.
            None => unreachable!("environment lease used after release"),
        }
    }

    pub fn env(&self) -> &Env {
        &self.handle().env
    }

    pub fn key(&self) -> &PoolKey {
        &self.handle().key
    }

    pub fn id(&self) -> u64 {
        self.handle().id
    }

    pub fn is_readonly(&self) -> bool {
        self.handle().is_readonly()
    }

    pub fn is_over_limit(&self) -> bool {
        self.handle().over_limit
    }

    /// Return the handle to the pool now.
    pub fn release(self) {}
}

impl Drop for EnvLease<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace(name: &str) -> WorkspaceName {
        WorkspaceName::new(name).expect("valid workspace")
    }

    fn create_test_pool(max_connections: usize) -> (ConnectionPool, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = StorageConfig::default()
            .with_map_size_mb(10)
            .with_max_connections(max_connections)
            .with_durable_sync(false);
        (ConnectionPool::new(dir.path(), config), dir)
    }

    #[test]
    fn test_acquire_creates_environment_directory() {
        let (pool, dir) = create_test_pool(2);
        let ws = workspace("alpha");
        let lease = pool.acquire(&ws, "main", false).expect("acquire should succeed");
        assert!(dir.path().join("alpha").join("main").is_dir());
        assert!(!lease.is_over_limit());
        assert_eq!(pool.stats().in_use, 1);
    }

    #[test]
    fn test_release_returns_handle_to_idle_set() {
        let (pool, _dir) = create_test_pool(2);
        let ws = workspace("alpha");

        let first_id = {
            let lease = pool.acquire(&ws, "main", false).expect("acquire should succeed");
            lease.id()
        };
        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.in_use, 0);

        let lease = pool.acquire(&ws, "main", false).expect("acquire should succeed");
        assert_eq!(lease.id(), first_id, "idle handle should be reused");
        assert_eq!(pool.stats().reuses, 1);
    }

    #[test]
    fn test_checked_out_handle_is_never_shared() {
        let (pool, _dir) = create_test_pool(4);
        let ws = workspace("alpha");
        let a = pool.acquire(&ws, "main", false).expect("acquire should succeed");
        let b = pool.acquire(&ws, "main", false).expect("acquire should succeed");
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.stats().in_use, 2);
    }

    #[test]
    fn test_exhaustion_opens_over_limit_handle() {
        let (pool, _dir) = create_test_pool(1);
        let ws = workspace("alpha");

        let pooled = pool.acquire(&ws, "main", false).expect("acquire should succeed");
        let extra = pool.acquire(&ws, "main", false).expect("over-limit acquire should succeed");
        assert!(!pooled.is_over_limit());
        assert!(extra.is_over_limit());

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.over_limit_created, 1);
        assert_eq!(stats.in_use, 2);

        drop(extra);
        drop(pooled);
        let stats = pool.stats();
        assert_eq!(stats.idle, 1, "over-limit handle must be closed, not pooled");
        assert_eq!(stats.in_use, 0);
    }

    #[test]
    fn test_keys_are_pooled_separately() {
        let (pool, _dir) = create_test_pool(1);
        let alpha = pool.acquire(&workspace("alpha"), "main", false).expect("acquire");
        let beta = pool.acquire(&workspace("beta"), "main", false).expect("acquire");
        let other_db = pool.acquire(&workspace("alpha"), "other", false).expect("acquire");
        assert!(!alpha.is_over_limit());
        assert!(!beta.is_over_limit());
        assert!(!other_db.is_over_limit());
        assert_eq!(pool.stats().created, 3);
    }

    #[test]
    fn test_invalid_database_name_rejected() {
        let (pool, _dir) = create_test_pool(1);
        let err = pool
            .acquire(&workspace("alpha"), "../escape", false)
            .expect_err("path escape must be rejected");
        assert!(matches!(err, StorageError::InvalidName { .. }));
        assert_eq!(pool.stats().created, 0);
    }

    #[test]
    fn test_close_all_refuses_acquire() {
        let (pool, _dir) = create_test_pool(2);
        let ws = workspace("alpha");
        let held = pool.acquire(&ws, "main", false).expect("acquire should succeed");
        drop(pool.acquire(&ws, "main", false).expect("acquire should succeed"));

        pool.close_all();
        assert!(pool.is_closed());
        assert!(matches!(
            pool.acquire(&ws, "main", false),
            Err(StorageError::PoolClosed)
        ));

        drop(held);
        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.created, 0);
    }

    #[test]
    fn test_readonly_config_requires_existing_environment() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = StorageConfig::default()
            .with_map_size_mb(10)
            .with_readonly(true);
        let pool = ConnectionPool::new(dir.path(), config);
        let err = pool
            .acquire(&workspace("alpha"), "main", false)
            .expect_err("missing environment");
        assert!(matches!(err, StorageError::ConnectionFailed { .. }));
        assert_eq!(pool.stats().created, 0);
    }

    #[test]
    fn test_failed_over_limit_open_is_not_counted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = StorageConfig::default()
            .with_map_size_mb(10)
            .with_max_connections(0)
            .with_readonly(true);
        let pool = ConnectionPool::new(dir.path(), config);
        assert!(pool.acquire(&workspace("alpha"), "main", false).is_err());

        let stats = pool.stats();
        assert_eq!(stats.over_limit_created, 0);
        assert_eq!(stats.in_use, 0);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        use std::sync::Arc;

        let (pool, _dir) = create_test_pool(2);
        let pool = Arc::new(pool);
        let ws = workspace("alpha");

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let ws = ws.clone();
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        let lease = pool.acquire(&ws, "main", false).expect("acquire");
                        assert!(lease.env().read_txn().is_ok());
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().expect("thread should not panic");
        }

        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert!(stats.idle <= 2);
        assert_eq!(stats.acquisitions, 160);
    }
}
