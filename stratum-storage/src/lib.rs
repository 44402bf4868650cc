//! Stratum Storage - Pooled Transactional Store and Caches
//!
//! Workspace-isolated persistence on top of LMDB (via `heed`):
//!
//! - [`ConnectionPool`]: bounded, per workspace/database pools of environment
//!   handles, checked out as RAII leases.
//! - [`TransactionalStore`]: closure-scoped read/write transactions, schema
//!   versioning and the typed entity operations behind [`EntityStore`].
//! - [`cache`]: in-memory LRU, the two-tier cache and workspace-scoped views.

pub mod cache;
pub mod pool;
pub mod serializer;
pub mod store;
pub mod txn;

pub use cache::{
    spawn_expiry_sweeper, Cache, CacheEntry, CacheStats, CacheValue, LruCache, MultiTierCache,
    SweeperHandle, TierStats, WorkspaceCache,
};
pub use pool::{ConnectionPool, EnvLease, PoolKey, PoolStats, PooledEnvironment};
pub use serializer::{EntitySerializer, JsonSerializer, StorableEntity};
pub use store::{EntityStore, SchemaStatus, TransactionalStore, META_DATABASE};
pub use txn::{TransactionStats, TxnScope, MAX_KEY_LEN};
