//! Stratum Test Utilities
//!
//! Shared test infrastructure for the Stratum workspace:
//! - Proptest generators for names, ids, entities and cache values
//! - Temp-dir backed fixtures for pools, stores and configurations
//! - A sample entity type
//! - Tracing initialisation for tests

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

pub use stratum_core::{
    AccessLevel, GovernanceConfig, ResourceLimit, ResourceType, StorageConfig, StratumConfig,
    WorkspaceName, WorkspacePolicy,
};
pub use stratum_governance::AccessRequest;
pub use stratum_storage::{ConnectionPool, StorableEntity, TransactionalStore};

// ============================================================================
// TRACING
// ============================================================================

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// SAMPLE ENTITY
// ============================================================================

/// A small domain entity used across storage tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    pub stages: Vec<String>,
    pub version: u32,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            stages: vec!["build".to_string(), "test".to_string()],
            version,
        }
    }
}

impl StorableEntity for Pipeline {
    fn entity_type() -> &'static str {
        "pipeline"
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Stratum types.

    use super::*;
    use proptest::prelude::*;

    /// A valid workspace name.
    pub fn arb_workspace_name() -> impl Strategy<Value = WorkspaceName> {
        "[a-z][a-z0-9_-]{0,15}".prop_filter_map("valid workspace name", |s| {
            WorkspaceName::new(s).ok()
        })
    }

    /// An entity id: non-empty, no separator, well under the key limit.
    pub fn arb_entity_id() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_.-]{1,48}"
    }

    pub fn arb_pipeline() -> impl Strategy<Value = Pipeline> {
        (
            "[a-z]{1,12}",
            prop::collection::vec("[a-z]{1,8}", 0..6),
            any::<u32>(),
        )
            .prop_map(|(name, stages, version)| Pipeline {
                name,
                stages,
                version,
            })
    }

    pub fn arb_access_level() -> impl Strategy<Value = AccessLevel> {
        prop_oneof![
            Just(AccessLevel::None),
            Just(AccessLevel::Read),
            Just(AccessLevel::Write),
            Just(AccessLevel::Admin),
            Just(AccessLevel::Full),
        ]
    }

    pub fn arb_resource_type() -> impl Strategy<Value = ResourceType> {
        prop_oneof![
            Just(ResourceType::File),
            Just(ResourceType::Directory),
            Just(ResourceType::Database),
            Just(ResourceType::Cache),
            Just(ResourceType::Template),
            Just(ResourceType::Pipeline),
            Just(ResourceType::Memory),
            Just(ResourceType::Storage),
            Just(ResourceType::Network),
            Just(ResourceType::Api),
        ]
    }

    /// A JSON value of bounded depth.
    pub fn arb_cache_value() -> impl Strategy<Value = serde_json::Value> {
        let leaf = prop_oneof![
            Just(serde_json::Value::Null),
            any::<bool>().prop_map(serde_json::Value::from),
            any::<i64>().prop_map(serde_json::Value::from),
            "[ -~]{0,32}".prop_map(serde_json::Value::from),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::Array),
                prop::collection::hash_map("[a-z]{1,6}", inner, 0..4).prop_map(|map| {
                    serde_json::Value::Object(map.into_iter().collect())
                }),
            ]
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Temp-dir backed fixtures. Keep the returned `TempDir` alive for as
    //! long as the pool or store is used.

    use super::*;

    /// Storage settings sized for tests: small map, no fsync.
    pub fn test_storage_config() -> StorageConfig {
        StorageConfig::default()
            .with_map_size_mb(10)
            .with_durable_sync(false)
    }

    /// A configuration rooted in `dir`.
    pub fn test_config(dir: &TempDir) -> StratumConfig {
        StratumConfig {
            storage: test_storage_config(),
            ..StratumConfig::new(dir.path())
        }
    }

    pub fn temp_pool() -> (Arc<ConnectionPool>, TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = Arc::new(ConnectionPool::new(dir.path(), test_storage_config()));
        (pool, dir)
    }

    /// A store for `workspace` in environment `main` of a fresh pool.
    pub fn temp_store(workspace: &str) -> (TransactionalStore, TempDir) {
        let (pool, dir) = temp_pool();
        let name = WorkspaceName::new(workspace).expect("valid workspace");
        let store = TransactionalStore::new(pool, name, "main").expect("store");
        (store, dir)
    }

    /// Governance with `workspace` marked read-only.
    pub fn read_only_workspace(workspace: &str) -> GovernanceConfig {
        let mut config = GovernanceConfig::default();
        config.workspaces.insert(
            workspace.to_string(),
            WorkspacePolicy::default().with_read_only(true),
        );
        config
    }

    /// Governance allowing `max` requests per `window_secs` on database resources.
    pub fn database_rate_limit(max: u64, window_secs: u64) -> GovernanceConfig {
        GovernanceConfig {
            rate_limits: vec![ResourceLimit::new(ResourceType::Database, max).with_window(window_secs)],
            ..GovernanceConfig::default()
        }
    }

    pub fn sample_pipelines(count: u32) -> Vec<(String, Pipeline)> {
        (0..count)
            .map(|i| (format!("pipeline-{i:03}"), Pipeline::new(format!("p{i}"), i)))
            .collect()
    }
}
