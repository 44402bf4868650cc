//! Stratum
//!
//! Workspace-isolated persistence for embedding applications. [`Stratum`]
//! wires one configuration into a connection pool, a governance manager
//! with its security monitor, and a shared two-tier cache. Callers work
//! through [`WorkspaceHandle`]s, whose operations are admitted by governance
//! before they reach the store.
//!
//! ```no_run
//! use stratum::{Stratum, StratumConfig};
//!
//! # fn main() -> stratum::StratumResult<()> {
//! let stratum = Stratum::open(StratumConfig::new("/var/lib/stratum"))?;
//! let alpha = stratum.workspace("alpha")?;
//! alpha.store_entity(&serde_json::json!({"stage": "build"}), "pipeline-1", "pipelines")?;
//! let loaded: Option<serde_json::Value> = alpha.load_entity("pipeline-1", "pipelines")?;
//! # let _ = loaded;
//! # Ok(())
//! # }
//! ```

pub mod handle;
pub mod runtime;

pub use handle::WorkspaceHandle;
pub use runtime::{SharedCache, SharedValue, Stratum, CACHE_WORKSPACE, DEFAULT_ENVIRONMENT};

pub use stratum_core::{
    AccessError, AccessLevel, ConfigError, ResourceType, StorageError, StratumConfig,
    StratumError, StratumResult, WorkspaceKey, WorkspaceName,
};
pub use stratum_governance::{AccessRequest, AccessResult, AlertSeverity, SecurityAlert};
pub use stratum_storage::{Cache, EntityStore, StorableEntity};
