//! Configuration types
//!
//! Configuration is consumed, never produced, by the storage core. It can be
//! built from defaults, from `STRATUM_*` environment variables, or from a TOML
//! document. Durations are expressed in whole seconds in both sources.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{AccessLevel, ConfigError, ResourceType};

/// LMDB page size the map size is rounded up to.
pub const PAGE_SIZE: usize = 4096;

const MB: usize = 1024 * 1024;

// ============================================================================
// STORAGE
// ============================================================================

/// Settings for opened database environments.
///
/// Immutable once an environment is opened; a different map size only takes
/// effect after the pool is closed and environments are reopened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Maximum size of the memory map, in bytes.
    pub map_size_bytes: usize,
    /// Maximum number of named sub-databases per environment.
    pub max_named_databases: u32,
    /// Pooled handles per workspace/database pair. Advisory: see `ConnectionPool`.
    pub max_connections: usize,
    /// Flush to disk on every commit.
    pub durable_sync: bool,
    /// Open environments read-only; write transactions are refused.
    pub readonly: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            map_size_bytes: 100 * MB,
            max_named_databases: 32,
            max_connections: 8,
            durable_sync: true,
            readonly: false,
        }
    }
}

impl StorageConfig {
    /// Map size rounded up to a whole number of pages.
    pub fn effective_map_size(&self) -> usize {
        self.map_size_bytes
            .div_ceil(PAGE_SIZE)
            .max(1)
            .checked_mul(PAGE_SIZE)
            .unwrap_or(usize::MAX / PAGE_SIZE * PAGE_SIZE)
    }

    /// Saturates at `usize::MAX` bytes.
    pub fn with_map_size_mb(mut self, mb: usize) -> Self {
        self.map_size_bytes = mb.saturating_mul(MB);
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    pub fn with_durable_sync(mut self, durable: bool) -> Self {
        self.durable_sync = durable;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.map_size_bytes == 0 {
            return Err(invalid("storage.map_size_bytes", "0", "must be positive"));
        }
        if self.max_named_databases == 0 {
            return Err(invalid("storage.max_named_databases", "0", "must be positive"));
        }
        if self.max_connections == 0 {
            return Err(invalid("storage.max_connections", "0", "must be positive"));
        }
        Ok(())
    }
}

// ============================================================================
// CACHE
// ============================================================================

/// Settings for the multi-tier cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Maximum number of in-memory entries.
    pub max_entries: usize,
    /// Maximum estimated in-memory footprint, in bytes.
    pub max_memory_bytes: usize,
    /// TTL applied when `set` is called without one. `None` means no expiry.
    pub default_ttl_secs: Option<u64>,
    /// Interval between background expiry sweeps.
    pub sweep_interval_secs: u64,
    /// Whether the persistent (tier 2) layer is enabled.
    pub persistent_tier: bool,
    /// Named sub-database holding tier-2 entries.
    pub persistent_database: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_memory_bytes: 100 * MB,
            default_ttl_secs: None,
            sweep_interval_secs: 30 * 60,
            persistent_tier: true,
            persistent_database: "cache".to_string(),
        }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    pub fn with_max_memory_bytes(mut self, bytes: usize) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    pub fn with_persistent_tier(mut self, enabled: bool) -> Self {
        self.persistent_tier = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(invalid("cache.max_entries", "0", "must be positive"));
        }
        if self.max_memory_bytes == 0 {
            return Err(invalid("cache.max_memory_bytes", "0", "must be positive"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(invalid("cache.sweep_interval_secs", "0", "must be positive"));
        }
        if self.persistent_database.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "cache.persistent_database".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// GOVERNANCE
// ============================================================================

/// Per-workspace access policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspacePolicy {
    /// Directory every path-based resource must resolve under.
    pub root: Option<PathBuf>,
    /// Highest access level a request may ask for.
    pub max_access_level: AccessLevel,
    /// Structurally allowed writes are refused while set.
    pub read_only: bool,
}

impl Default for WorkspacePolicy {
    fn default() -> Self {
        Self {
            root: None,
            max_access_level: AccessLevel::Full,
            read_only: false,
        }
    }
}

impl WorkspacePolicy {
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    pub fn with_max_access_level(mut self, level: AccessLevel) -> Self {
        self.max_access_level = level;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// A limit on one resource type, for one workspace or (when `workspace` is
/// `None`) for every workspace that has no specific rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimit {
    #[serde(default)]
    pub workspace: Option<String>,
    pub resource_type: ResourceType,
    pub max_value: u64,
    #[serde(default)]
    pub window_seconds: Option<u64>,
    #[serde(default)]
    pub burst_limit: Option<u64>,
}

impl ResourceLimit {
    pub fn new(resource_type: ResourceType, max_value: u64) -> Self {
        Self {
            workspace: None,
            resource_type,
            max_value,
            window_seconds: None,
            burst_limit: None,
        }
    }

    pub fn for_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn with_window(mut self, seconds: u64) -> Self {
        self.window_seconds = Some(seconds);
        self
    }

    pub fn with_burst(mut self, burst: u64) -> Self {
        self.burst_limit = Some(burst);
        self
    }

    pub fn window(&self) -> Option<Duration> {
        self.window_seconds.map(Duration::from_secs)
    }
}

/// Settings for the security monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub enabled: bool,
    /// Trailing window violations are counted in.
    pub window_secs: u64,
    /// Violations inside the window that raise an alert.
    pub violation_threshold: u32,
    /// Alerts retained in history.
    pub max_alerts: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 300,
            violation_threshold: 5,
            max_alerts: 1000,
        }
    }
}

/// Governance configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// When set, only these workspaces may be accessed.
    pub allowed_workspaces: Option<Vec<String>>,
    pub workspaces: HashMap<String, WorkspacePolicy>,
    pub rate_limits: Vec<ResourceLimit>,
    pub resource_limits: Vec<ResourceLimit>,
    pub monitor: MonitorSettings,
}

impl GovernanceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for limit in self.rate_limits.iter() {
            if limit.window_seconds.unwrap_or(0) == 0 {
                return Err(ConfigError::MissingRequired {
                    field: format!("rate_limits[{}].window_seconds", limit.resource_type),
                });
            }
        }
        if self.monitor.enabled && self.monitor.violation_threshold == 0 {
            return Err(invalid(
                "governance.monitor.violation_threshold",
                "0",
                "must be positive",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StratumConfig {
    /// Directory holding one subdirectory per workspace.
    pub database_root: PathBuf,
    pub storage: StorageConfig,
    pub cache: CacheSettings,
    pub governance: GovernanceConfig,
}

impl Default for StratumConfig {
    fn default() -> Self {
        Self {
            database_root: PathBuf::from("data"),
            storage: StorageConfig::default(),
            cache: CacheSettings::default(),
            governance: GovernanceConfig::default(),
        }
    }
}

impl StratumConfig {
    /// Create a config rooted at `database_root` with default settings.
    pub fn new(database_root: impl Into<PathBuf>) -> Self {
        Self {
            database_root: database_root.into(),
            ..Self::default()
        }
    }

    /// Create StratumConfig from environment variables.
    ///
    /// Environment variables:
    /// - `STRATUM_DB_ROOT`: Database directory root (default: `data`)
    /// - `STRATUM_MAP_SIZE_MB`: LMDB map size in megabytes (default: 100)
    /// - `STRATUM_MAX_DBS`: Max named databases per environment (default: 32)
    /// - `STRATUM_MAX_CONNECTIONS`: Pooled handles per workspace/database (default: 8)
    /// - `STRATUM_DURABLE_SYNC`: "true" or "false" (default: true)
    /// - `STRATUM_READONLY`: "true" or "false" (default: false)
    /// - `STRATUM_CACHE_MAX_ENTRIES`: In-memory cache entries (default: 1000)
    /// - `STRATUM_CACHE_MAX_MEMORY_MB`: In-memory cache budget (default: 100)
    /// - `STRATUM_CACHE_DEFAULT_TTL_SECS`: Default TTL (default: none)
    /// - `STRATUM_CACHE_SWEEP_INTERVAL_SECS`: Expiry sweep interval (default: 1800)
    ///
    /// Governance rules are not expressible as flat variables; load them from
    /// a TOML file with [`StratumConfig::from_file`].
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse = |name: &str| lookup(name).and_then(|s| s.trim().parse::<usize>().ok());
        // Sizes that overflow in bytes fall back to the default.
        let megabytes = |name: &str| parse(name).and_then(|mb| mb.checked_mul(MB));
        let flag = |name: &str, default: bool| {
            lookup(name)
                .map(|s| match s.trim().to_lowercase().as_str() {
                    "true" | "1" | "yes" => true,
                    "false" | "0" | "no" => false,
                    _ => default,
                })
                .unwrap_or(default)
        };

        let storage = StorageConfig {
            map_size_bytes: megabytes("STRATUM_MAP_SIZE_MB")
                .unwrap_or(defaults.storage.map_size_bytes),
            max_named_databases: lookup("STRATUM_MAX_DBS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.storage.max_named_databases),
            max_connections: parse("STRATUM_MAX_CONNECTIONS")
                .unwrap_or(defaults.storage.max_connections),
            durable_sync: flag("STRATUM_DURABLE_SYNC", defaults.storage.durable_sync),
            readonly: flag("STRATUM_READONLY", defaults.storage.readonly),
        };

        let cache = CacheSettings {
            max_entries: parse("STRATUM_CACHE_MAX_ENTRIES").unwrap_or(defaults.cache.max_entries),
            max_memory_bytes: megabytes("STRATUM_CACHE_MAX_MEMORY_MB")
                .unwrap_or(defaults.cache.max_memory_bytes),
            default_ttl_secs: lookup("STRATUM_CACHE_DEFAULT_TTL_SECS")
                .and_then(|s| s.trim().parse().ok())
                .or(defaults.cache.default_ttl_secs),
            sweep_interval_secs: lookup("STRATUM_CACHE_SWEEP_INTERVAL_SECS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.cache.sweep_interval_secs),
            ..defaults.cache
        };

        Self {
            database_root: lookup("STRATUM_DB_ROOT")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.database_root),
            storage,
            cache,
            governance: defaults.governance,
        }
    }

    /// Parse a TOML document. Missing sections take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_root.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "database_root".to_string(),
            });
        }
        self.storage.validate()?;
        self.cache.validate()?;
        self.governance.validate()?;
        Ok(())
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = StratumConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.max_connections, 8);
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.cache.sweep_interval(), Duration::from_secs(1800));
        assert!(config.cache.default_ttl().is_none());
    }

    #[test]
    fn test_map_size_rounds_to_page() {
        let config = StorageConfig {
            map_size_bytes: 10_000,
            ..StorageConfig::default()
        };
        assert_eq!(config.effective_map_size(), 3 * PAGE_SIZE);
        assert_eq!(
            StorageConfig::default().effective_map_size(),
            100 * 1024 * 1024
        );
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("STRATUM_DB_ROOT", "/var/lib/stratum"),
            ("STRATUM_MAP_SIZE_MB", "16"),
            ("STRATUM_MAX_CONNECTIONS", "2"),
            ("STRATUM_DURABLE_SYNC", "false"),
            ("STRATUM_CACHE_MAX_ENTRIES", "50"),
            ("STRATUM_CACHE_DEFAULT_TTL_SECS", "120"),
        ]
        .into_iter()
        .collect();

        let config = StratumConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.database_root, PathBuf::from("/var/lib/stratum"));
        assert_eq!(config.storage.map_size_bytes, 16 * MB);
        assert_eq!(config.storage.max_connections, 2);
        assert!(!config.storage.durable_sync);
        assert!(!config.storage.readonly);
        assert_eq!(config.cache.max_entries, 50);
        assert_eq!(config.cache.default_ttl(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_from_lookup_ignores_garbage() {
        let config = StratumConfig::from_lookup(|k| match k {
            "STRATUM_MAX_CONNECTIONS" => Some("lots".to_string()),
            "STRATUM_READONLY" => Some("maybe".to_string()),
            _ => None,
        });
        assert_eq!(config.storage.max_connections, 8);
        assert!(!config.storage.readonly);
    }

    #[test]
    fn test_from_lookup_overflowing_sizes_fall_back() {
        let huge = usize::MAX.to_string();
        let config = StratumConfig::from_lookup(|k| match k {
            "STRATUM_MAP_SIZE_MB" | "STRATUM_CACHE_MAX_MEMORY_MB" => Some(huge.clone()),
            _ => None,
        });
        assert_eq!(config.storage.map_size_bytes, 100 * MB);
        assert_eq!(config.cache.max_memory_bytes, 100 * MB);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_huge_map_size_saturates() {
        let config = StorageConfig::default().with_map_size_mb(usize::MAX);
        assert_eq!(config.map_size_bytes, usize::MAX);
        let effective = config.effective_map_size();
        assert_eq!(effective % PAGE_SIZE, 0);
        assert!(effective > usize::MAX - PAGE_SIZE);
    }

    #[test]
    fn test_from_toml() {
        let source = r#"
            database_root = "/tmp/stratum"

            [storage]
            max_connections = 4

            [cache]
            max_entries = 10
            default_ttl_secs = 60

            [governance]
            allowed_workspaces = ["alpha", "beta"]

            [governance.workspaces.alpha]
            root = "/srv/alpha"
            read_only = true

            [governance.workspaces.beta]
            max_access_level = "read"

            [[governance.rate_limits]]
            resource_type = "file"
            max_value = 100
            window_seconds = 60

            [[governance.resource_limits]]
            workspace = "alpha"
            resource_type = "memory"
            max_value = 1024
        "#;

        let config = StratumConfig::from_toml_str(source).expect("config should parse");
        assert_eq!(config.storage.max_connections, 4);
        assert_eq!(config.storage.map_size_bytes, 100 * MB);
        assert_eq!(config.cache.max_entries, 10);
        assert_eq!(
            config.governance.allowed_workspaces,
            Some(vec!["alpha".to_string(), "beta".to_string()])
        );
        let alpha = &config.governance.workspaces["alpha"];
        assert!(alpha.read_only);
        assert_eq!(alpha.root, Some(PathBuf::from("/srv/alpha")));
        assert_eq!(alpha.max_access_level, AccessLevel::Full);
        assert_eq!(
            config.governance.workspaces["beta"].max_access_level,
            AccessLevel::Read
        );
        assert_eq!(config.governance.rate_limits[0].resource_type, ResourceType::File);
        assert_eq!(
            config.governance.resource_limits[0].workspace.as_deref(),
            Some("alpha")
        );
    }

    #[test]
    fn test_rate_limit_requires_window() {
        let source = r#"
            [[governance.rate_limits]]
            resource_type = "api"
            max_value = 10
        "#;
        let err = StratumConfig::from_toml_str(source).expect_err("window is required");
        assert!(matches!(err, ConfigError::MissingRequired { .. }));
    }

    #[test]
    fn test_invalid_toml() {
        let err = StratumConfig::from_toml_str("storage = 3").expect_err("should fail");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = StratumConfig::default();
        config.cache.max_entries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stratum.toml");
        std::fs::write(&path, "[storage]\nreadonly = true\n").expect("write config");
        let config = StratumConfig::from_file(&path).expect("config should load");
        assert!(config.storage.readonly);

        let missing = StratumConfig::from_file(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
