//! Stratum Core - Shared Types
//!
//! Error taxonomy, configuration, workspace names and access enums shared by
//! the storage, cache and governance crates. No I/O lives here apart from
//! reading configuration files.

pub mod access;
pub mod config;
pub mod error;
pub mod workspace;

pub use access::{AccessLevel, ParseEnumError, ResourceType};
pub use config::{
    CacheSettings, GovernanceConfig, MonitorSettings, ResourceLimit, StorageConfig,
    StratumConfig, WorkspacePolicy,
};
pub use error::{AccessError, ConfigError, StorageError, StratumError, StratumResult};
pub use workspace::{validate_component, WorkspaceKey, WorkspaceName, KEY_SEPARATOR};

/// Schema version written by this build into every environment it creates.
pub const SCHEMA_VERSION: u32 = 1;

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
