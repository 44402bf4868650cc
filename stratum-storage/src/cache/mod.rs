//! Caching layers in front of the transactional store.
//!
//! - [`LruCache`]: single-process cache bounded by entry count and estimated
//!   memory, with per-entry ttl.
//! - [`MultiTierCache`]: `LruCache` as tier 1, the transactional store as a
//!   best-effort tier 2, with promotion on tier-2 hits.
//! - [`WorkspaceCache`]: a view of a shared cache confined to one workspace.
//!
//! All of them implement the [`Cache`] contract.
//!
//! # Example
//!
//! ```ignore
//! let cache = Arc::new(MultiTierCache::from_settings(&settings, Some(store)));
//! let sweeper = cache.spawn_sweeper(settings.sweep_interval());
//!
//! let alpha = cache.scoped(WorkspaceName::new("alpha")?);
//! alpha.set("manifest", manifest, Some(Duration::from_secs(300)));
//! let hit = alpha.get("manifest");
//!
//! sweeper.shutdown().await;
//! ```

pub mod entry;
pub mod lru;
pub mod multi_tier;
pub mod scoped;
pub mod sweeper;
pub mod traits;

pub use entry::{CacheEntry, CacheStats, CacheValue, ENTRY_OVERHEAD};
pub use lru::LruCache;
pub use multi_tier::{MultiTierCache, TierStats};
pub use scoped::WorkspaceCache;
pub use sweeper::{spawn_expiry_sweeper, SweeperHandle, MIN_SWEEP_INTERVAL};
pub use traits::Cache;
