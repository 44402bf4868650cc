//! Transactional entity store over pooled LMDB environments.
//!
//! A store is bound to one workspace and one environment
//! (`<root>/<workspace>/<database>`). Entities live in named sub-databases
//! inside that environment, under keys of the form `"<workspace>:<id>"`.
//!
//! Every public operation first makes sure the schema version has been read
//! for this process, then runs inside exactly one transaction that is
//! committed on success and aborted on any error.

use std::sync::Arc;

use heed::types::{Bytes, Str};
use parking_lot::Mutex;
use stratum_core::{
    validate_component, StorageError, StratumResult, WorkspaceKey, WorkspaceName, SCHEMA_VERSION,
};
use tracing::{debug, info, warn};

use crate::pool::{ConnectionPool, MAX_DATABASE_NAME_LEN};
use crate::serializer::{EntitySerializer, JsonSerializer, StorableEntity};
use crate::txn::{check_key, txn_error, TransactionStats, TxnScope, TxnTimer};

/// Sub-database holding store metadata.
pub const META_DATABASE: &str = "__meta__";

/// Key under which the schema version is recorded.
pub const SCHEMA_VERSION_KEY: &str = "__schema_version__";

/// Entity type reported for operations that don't know the payload type.
const UNTYPED: &str = "entity";

/// Result of reading the schema version on first open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaStatus {
    /// No version was recorded. Written now unless the store is read-only.
    Fresh,
    /// The recorded version matches this build.
    Current,
    /// The recorded version differs. Data is left untouched.
    Mismatch { found: u32, expected: u32 },
}

impl SchemaStatus {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, SchemaStatus::Mismatch { .. })
    }
}

/// Transactional store for one workspace environment.
pub struct TransactionalStore<S = JsonSerializer> {
    pool: Arc<ConnectionPool>,
    workspace: WorkspaceName,
    database: String,
    serializer: S,
    stats: Mutex<TransactionStats>,
    schema: Mutex<Option<SchemaStatus>>,
}

impl TransactionalStore<JsonSerializer> {
    /// Create a JSON-backed store for `workspace`/`database`.
    ///
    /// Nothing is opened until the first operation.
    pub fn new(
        pool: Arc<ConnectionPool>,
        workspace: WorkspaceName,
        database: impl Into<String>,
    ) -> Result<Self, StorageError> {
        Self::with_serializer(pool, workspace, database, JsonSerializer)
    }
}

impl<S: EntitySerializer> TransactionalStore<S> {
    pub fn with_serializer(
        pool: Arc<ConnectionPool>,
        workspace: WorkspaceName,
        database: impl Into<String>,
        serializer: S,
    ) -> Result<Self, StorageError> {
        let database = database.into();
        validate_component(&database, MAX_DATABASE_NAME_LEN)?;
        Ok(Self {
            pool,
            workspace,
            database,
            serializer,
            stats: Mutex::new(TransactionStats::default()),
            schema: Mutex::new(None),
        })
    }

    pub fn workspace(&self) -> &WorkspaceName {
        &self.workspace
    }

    /// Environment name under the workspace directory.
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    /// Snapshot of the running transaction statistics.
    pub fn transaction_stats(&self) -> TransactionStats {
        self.stats.lock().clone()
    }

    /// Schema status recorded by [`initialize`](Self::initialize), if it has run.
    pub fn schema_status(&self) -> Option<SchemaStatus> {
        *self.schema.lock()
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Run `f` inside one transaction on sub-database `db_name`.
    ///
    /// A write transaction creates the sub-database if needed; a read
    /// transaction against a missing sub-database sees it as empty. The
    /// transaction commits when `f` returns `Ok` and aborts otherwise. The
    /// pooled environment is released afterwards in every case, including
    /// a panic inside `f`.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns, or a `StorageError` (converted into `E`)
    /// when the environment or the transaction cannot be opened or committed.
    pub fn transaction<T, E, F>(&self, db_name: &str, write: bool, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut TxnScope<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        check_database_name(db_name)?;
        self.ensure_initialized()?;
        self.run_transaction(db_name, write, f)
    }

    fn run_transaction<T, E, F>(&self, db_name: &str, write: bool, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut TxnScope<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        let lease = self.pool.acquire(&self.workspace, &self.database, !write)?;
        if write && lease.is_readonly() {
            return Err(StorageError::ReadOnly {
                operation: format!("write to '{db_name}'"),
            }
            .into());
        }

        let timer = TxnTimer::start(&self.stats);
        let env = lease.env();
        let mut scope = if write {
            let mut wtxn = env.write_txn().map_err(txn_error)?;
            let db = env
                .create_database::<Str, Bytes>(&mut wtxn, Some(db_name))
                .map_err(txn_error)?;
            TxnScope::write(wtxn, db, db_name)
        } else {
            let rtxn = env.read_txn().map_err(txn_error)?;
            let db = env
                .open_database::<Str, Bytes>(&rtxn, Some(db_name))
                .map_err(txn_error)?;
            TxnScope::read(rtxn, db, db_name)
        };

        match f(&mut scope) {
            Ok(value) => {
                scope.commit()?;
                timer.finish(true);
                Ok(value)
            }
            Err(e) => {
                scope.abort();
                timer.finish(false);
                debug!(
                    workspace = %self.workspace,
                    database = %self.database,
                    db_name,
                    write,
                    "Transaction aborted"
                );
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Schema versioning
    // ------------------------------------------------------------------

    /// Read the schema version, bootstrapping it on first run.
    ///
    /// A mismatch is logged and reported, never migrated.
    pub fn initialize(&self) -> Result<SchemaStatus, StorageError> {
        let found = self.run_transaction(META_DATABASE, false, |txn| read_schema_version(txn))?;

        let status = match found {
            Some(found) => self.compare_version(found),
            None if self.pool.config().readonly => SchemaStatus::Fresh,
            None => {
                // Another process or thread may have bootstrapped in between.
                let raced = self.run_transaction(META_DATABASE, true, |txn| {
                    if let Some(found) = read_schema_version(txn)? {
                        return Ok::<_, StorageError>(Some(found));
                    }
                    txn.put(SCHEMA_VERSION_KEY, SCHEMA_VERSION.to_string().as_bytes())?;
                    Ok(None)
                })?;
                match raced {
                    Some(found) => self.compare_version(found),
                    None => {
                        info!(
                            workspace = %self.workspace,
                            database = %self.database,
                            version = SCHEMA_VERSION,
                            "Initialized schema version"
                        );
                        SchemaStatus::Fresh
                    }
                }
            }
        };

        *self.schema.lock() = Some(status);
        Ok(status)
    }

    fn compare_version(&self, found: u32) -> SchemaStatus {
        if found == SCHEMA_VERSION {
            return SchemaStatus::Current;
        }
        warn!(
            workspace = %self.workspace,
            database = %self.database,
            found,
            expected = SCHEMA_VERSION,
            "Schema version mismatch, leaving data untouched"
        );
        SchemaStatus::Mismatch {
            found,
            expected: SCHEMA_VERSION,
        }
    }

    fn ensure_initialized(&self) -> Result<SchemaStatus, StorageError> {
        if let Some(status) = *self.schema.lock() {
            return Ok(status);
        }
        self.initialize()
    }

    // ------------------------------------------------------------------
    // Entity operations
    // ------------------------------------------------------------------

    fn entity_key(&self, id: &str) -> Result<String, StorageError> {
        if id.is_empty() {
            return Err(StorageError::InvalidKey {
                key: id.to_string(),
                reason: "id must not be empty".to_string(),
            });
        }
        let key = WorkspaceKey::new(&self.workspace, id).encode();
        check_key(&key)?;
        Ok(key)
    }

    /// Run an entity operation, wrapping any failure with its name and type.
    fn entity_op<R>(
        &self,
        operation: &str,
        entity_type: &str,
        f: impl FnOnce() -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        self.ensure_initialized()
            .and_then(|_| f())
            .map_err(|e| e.in_operation(operation, entity_type))
    }

    /// Serialize and write `entity` under `id`, replacing any previous value.
    pub fn store_entity<T: StorableEntity>(
        &self,
        entity: &T,
        id: &str,
        db_name: &str,
    ) -> Result<(), StorageError> {
        self.entity_op("store_entity", T::entity_type(), || {
            let key = self.entity_key(id)?;
            let bytes = self.serializer.serialize(entity)?;
            self.transaction(db_name, true, |txn| txn.put(&key, &bytes))
        })
    }

    pub fn load_entity<T: StorableEntity>(
        &self,
        id: &str,
        db_name: &str,
    ) -> Result<Option<T>, StorageError> {
        self.entity_op("load_entity", T::entity_type(), || {
            let key = self.entity_key(id)?;
            let bytes = self.transaction(db_name, false, |txn| txn.get(&key))?;
            bytes
                .map(|bytes| self.serializer.deserialize(&bytes))
                .transpose()
        })
    }

    /// Returns whether an entity was removed.
    pub fn delete_entity(&self, id: &str, db_name: &str) -> Result<bool, StorageError> {
        self.entity_op("delete_entity", UNTYPED, || {
            let key = self.entity_key(id)?;
            self.transaction(db_name, true, |txn| txn.delete(&key))
        })
    }

    pub fn entity_exists(&self, id: &str, db_name: &str) -> Result<bool, StorageError> {
        self.entity_op("entity_exists", UNTYPED, || {
            let key = self.entity_key(id)?;
            self.transaction(db_name, false, |txn| txn.contains(&key))
        })
    }

    /// Entities whose id starts with `prefix`, in key order.
    pub fn find_by_prefix<T: StorableEntity>(
        &self,
        prefix: &str,
        db_name: &str,
        limit: Option<usize>,
    ) -> Result<Vec<T>, StorageError> {
        self.entity_op("find_by_prefix", T::entity_type(), || {
            let scan = WorkspaceKey::prefix(&self.workspace, prefix);
            let rows = self.transaction(db_name, false, |txn| txn.scan_prefix(&scan, limit))?;
            rows.iter()
                .map(|(_, bytes)| self.serializer.deserialize(bytes))
                .collect()
        })
    }

    /// Number of entities whose id starts with `prefix`.
    pub fn count(&self, prefix: &str, db_name: &str) -> Result<u64, StorageError> {
        self.entity_op("count", UNTYPED, || {
            let scan = WorkspaceKey::prefix(&self.workspace, prefix);
            self.transaction(db_name, false, |txn| txn.count_prefix(&scan))
        })
    }

    /// Ids (without the workspace prefix) starting with `prefix`.
    pub fn list_keys(
        &self,
        prefix: &str,
        db_name: &str,
        limit: Option<usize>,
    ) -> Result<Vec<String>, StorageError> {
        self.entity_op("list_keys", UNTYPED, || {
            let scan = WorkspaceKey::prefix(&self.workspace, prefix);
            let keys = self.transaction(db_name, false, |txn| txn.keys_with_prefix(&scan, limit))?;
            let workspace_prefix = self.workspace.key_prefix();
            Ok(keys
                .into_iter()
                .filter_map(|key| key.strip_prefix(&workspace_prefix).map(str::to_string))
                .collect())
        })
    }

    /// Remove every entity of this workspace from `db_name`. Returns the count.
    pub fn clear_database(&self, db_name: &str) -> Result<u64, StorageError> {
        self.entity_op("clear_database", UNTYPED, || {
            let scan = self.workspace.key_prefix();
            let removed = self.transaction(db_name, true, |txn| txn.delete_prefix(&scan))?;
            debug!(
                workspace = %self.workspace,
                database = %self.database,
                db_name,
                removed,
                "Cleared sub-database"
            );
            Ok(removed)
        })
    }
}

impl<S> std::fmt::Debug for TransactionalStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionalStore")
            .field("workspace", &self.workspace)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

fn check_database_name(db_name: &str) -> Result<(), StorageError> {
    validate_component(db_name, MAX_DATABASE_NAME_LEN)?;
    if db_name.starts_with("__") {
        return Err(StorageError::InvalidName {
            name: db_name.to_string(),
            reason: "names starting with '__' are reserved".to_string(),
        });
    }
    Ok(())
}

fn read_schema_version(txn: &TxnScope<'_>) -> Result<Option<u32>, StorageError> {
    let Some(bytes) = txn.get(SCHEMA_VERSION_KEY)? else {
        return Ok(None);
    };
    let text = std::str::from_utf8(&bytes).map_err(|e| StorageError::Serialization {
        reason: format!("schema version is not UTF-8: {e}"),
    })?;
    text.trim()
        .parse::<u32>()
        .map(Some)
        .map_err(|e| StorageError::Serialization {
            reason: format!("invalid schema version '{text}': {e}"),
        })
}

// ============================================================================
// ENTITY STORE CONTRACT
// ============================================================================

/// The narrow persistence contract domain repositories depend on.
pub trait EntityStore: Send + Sync {
    fn store<T: StorableEntity>(&self, entity: &T, id: &str, db_name: &str) -> StratumResult<()>;

    fn load<T: StorableEntity>(&self, id: &str, db_name: &str) -> StratumResult<Option<T>>;

    fn delete(&self, id: &str, db_name: &str) -> StratumResult<bool>;

    fn exists(&self, id: &str, db_name: &str) -> StratumResult<bool>;

    fn scan_by_prefix<T: StorableEntity>(
        &self,
        prefix: &str,
        db_name: &str,
        limit: Option<usize>,
    ) -> StratumResult<Vec<T>>;

    fn count(&self, prefix: &str, db_name: &str) -> StratumResult<u64>;
}

impl<S: EntitySerializer> EntityStore for TransactionalStore<S> {
    fn store<T: StorableEntity>(&self, entity: &T, id: &str, db_name: &str) -> StratumResult<()> {
        Ok(self.store_entity(entity, id, db_name)?)
    }

    fn load<T: StorableEntity>(&self, id: &str, db_name: &str) -> StratumResult<Option<T>> {
        Ok(self.load_entity(id, db_name)?)
    }

    fn delete(&self, id: &str, db_name: &str) -> StratumResult<bool> {
        Ok(self.delete_entity(id, db_name)?)
    }

    fn exists(&self, id: &str, db_name: &str) -> StratumResult<bool> {
        Ok(self.entity_exists(id, db_name)?)
    }

    fn scan_by_prefix<T: StorableEntity>(
        &self,
        prefix: &str,
        db_name: &str,
        limit: Option<usize>,
    ) -> StratumResult<Vec<T>> {
        Ok(self.find_by_prefix(prefix, db_name, limit)?)
    }

    fn count(&self, prefix: &str, db_name: &str) -> StratumResult<u64> {
        Ok(TransactionalStore::count(self, prefix, db_name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use stratum_core::StorageConfig;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Template {
        name: String,
        version: u32,
    }

    impl StorableEntity for Template {
        fn entity_type() -> &'static str {
            "template"
        }
    }

    fn template(name: &str, version: u32) -> Template {
        Template {
            name: name.to_string(),
            version,
        }
    }

    fn create_test_pool() -> (Arc<ConnectionPool>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = StorageConfig::default()
            .with_map_size_mb(10)
            .with_durable_sync(false);
        (Arc::new(ConnectionPool::new(dir.path(), config)), dir)
    }

    fn store_for(pool: &Arc<ConnectionPool>, workspace: &str) -> TransactionalStore {
        let ws = WorkspaceName::new(workspace).expect("valid workspace");
        TransactionalStore::new(Arc::clone(pool), ws, "main").expect("store")
    }

    #[test]
    fn test_schema_bootstrap_then_current() {
        let (pool, _dir) = create_test_pool();
        let first = store_for(&pool, "alpha");
        assert_eq!(first.schema_status(), None);
        assert_eq!(first.initialize().expect("init"), SchemaStatus::Fresh);

        let second = store_for(&pool, "alpha");
        assert_eq!(second.initialize().expect("init"), SchemaStatus::Current);
    }

    #[test]
    fn test_schema_mismatch_is_reported_not_rewritten() {
        let (pool, _dir) = create_test_pool();
        let store = store_for(&pool, "alpha");
        store
            .run_transaction(META_DATABASE, true, |txn| {
                txn.put(SCHEMA_VERSION_KEY, b"99")
            })
            .expect("seed version");

        let status = store.initialize().expect("init");
        assert_eq!(
            status,
            SchemaStatus::Mismatch {
                found: 99,
                expected: SCHEMA_VERSION
            }
        );
        assert!(status.is_mismatch());

        let stored = store
            .run_transaction(META_DATABASE, false, |txn| read_schema_version(txn))
            .expect("read");
        assert_eq!(stored, Some(99));
    }

    #[test]
    fn test_first_operation_initializes_schema() {
        let (pool, _dir) = create_test_pool();
        let store = store_for(&pool, "alpha");
        store
            .store_entity(&template("build", 1), "t1", "templates")
            .expect("store");
        assert_eq!(store.schema_status(), Some(SchemaStatus::Fresh));
    }

    #[test]
    fn test_store_load_delete_exists() {
        let (pool, _dir) = create_test_pool();
        let store = store_for(&pool, "alpha");
        let entity = template("build", 1);

        store.store_entity(&entity, "t1", "templates").expect("store");
        assert!(store.entity_exists("t1", "templates").expect("exists"));

        let loaded: Option<Template> = store.load_entity("t1", "templates").expect("load");
        assert_eq!(loaded, Some(entity));

        assert!(store.delete_entity("t1", "templates").expect("delete"));
        assert!(!store.delete_entity("t1", "templates").expect("delete again"));
        assert!(!store.entity_exists("t1", "templates").expect("exists"));
        let gone: Option<Template> = store.load_entity("t1", "templates").expect("load");
        assert!(gone.is_none());
    }

    #[test]
    fn test_load_from_missing_sub_database_is_none() {
        let (pool, _dir) = create_test_pool();
        let store = store_for(&pool, "alpha");
        let loaded: Option<Template> = store.load_entity("t1", "never_written").expect("load");
        assert!(loaded.is_none());
        assert_eq!(store.count("", "never_written").expect("count"), 0);
    }

    #[test]
    fn test_find_by_prefix_and_count() {
        let (pool, _dir) = create_test_pool();
        let store = store_for(&pool, "alpha");
        for (id, version) in [("build-1", 1), ("build-2", 2), ("deploy-1", 3)] {
            store
                .store_entity(&template(id, version), id, "templates")
                .expect("store");
        }

        let builds: Vec<Template> = store
            .find_by_prefix("build-", "templates", None)
            .expect("scan");
        assert_eq!(builds.len(), 2);
        assert_eq!(builds[0].name, "build-1");

        let limited: Vec<Template> = store
            .find_by_prefix("", "templates", Some(1))
            .expect("scan");
        assert_eq!(limited.len(), 1);

        assert_eq!(store.count("build-", "templates").expect("count"), 2);
        assert_eq!(store.count("", "templates").expect("count"), 3);
        assert_eq!(
            store.list_keys("", "templates", None).expect("keys"),
            vec!["build-1", "build-2", "deploy-1"]
        );
    }

    #[test]
    fn test_workspaces_do_not_see_each_other() {
        let (pool, _dir) = create_test_pool();
        let alpha = store_for(&pool, "alpha");
        let beta = store_for(&pool, "beta");

        alpha
            .store_entity(&template("secret", 1), "t1", "templates")
            .expect("store");

        let loaded: Option<Template> = beta.load_entity("t1", "templates").expect("load");
        assert!(loaded.is_none());
        let scanned: Vec<Template> = beta.find_by_prefix("", "templates", None).expect("scan");
        assert!(scanned.is_empty());
        assert_eq!(beta.count("", "templates").expect("count"), 0);
    }

    #[test]
    fn test_aborted_transaction_leaves_no_writes() {
        let (pool, _dir) = create_test_pool();
        let store = store_for(&pool, "alpha");

        let result: Result<(), StorageError> = store.transaction("templates", true, |txn| {
            txn.put("alpha:partial-1", b"{}")?;
            txn.put("alpha:partial-2", b"{}")?;
            Err(StorageError::TransactionFailed {
                reason: "simulated failure".into(),
            })
        });
        assert!(result.is_err());

        assert!(!store.entity_exists("partial-1", "templates").expect("exists"));
        assert!(!store.entity_exists("partial-2", "templates").expect("exists"));

        let stats = store.transaction_stats();
        assert!(stats.aborted >= 1);
        assert_eq!(stats.active, 0);
    }

    #[test]
    fn test_panicking_transaction_aborts_and_releases() {
        use std::panic::{catch_unwind, AssertUnwindSafe};

        let (pool, _dir) = create_test_pool();
        let store = store_for(&pool, "alpha");
        store.initialize().expect("init");
        let before = store.transaction_stats();

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _: Result<(), StorageError> = store.transaction("templates", true, |txn| {
                txn.put("alpha:doomed", b"{}")?;
                panic!("closure panicked mid-transaction");
            });
        }));
        assert!(outcome.is_err());

        let stats = store.transaction_stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.aborted, before.aborted + 1);
        assert_eq!(pool.stats().in_use, 0);

        assert!(!store.entity_exists("doomed", "templates").expect("exists"));
        assert_eq!(store.count("", "templates").expect("count"), 0);
        assert_eq!(pool.stats().in_use, 0);
    }

    #[test]
    fn test_write_inside_read_transaction_fails() {
        let (pool, _dir) = create_test_pool();
        let store = store_for(&pool, "alpha");
        let err = store
            .transaction("templates", false, |txn| txn.put("alpha:k", b"v"))
            .expect_err("read txn must refuse writes");
        assert!(matches!(err, StorageError::ReadOnly { .. }));
    }

    #[test]
    fn test_errors_carry_operation_and_entity_type() {
        let (pool, _dir) = create_test_pool();
        let store = store_for(&pool, "alpha");
        let long_id = "x".repeat(600);
        let err = store
            .store_entity(&template("big", 1), &long_id, "templates")
            .expect_err("key too long");
        match err {
            StorageError::Operation {
                operation,
                entity_type,
                cause,
            } => {
                assert_eq!(operation, "store_entity");
                assert_eq!(entity_type, "template");
                assert!(matches!(*cause, StorageError::InvalidKey { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = store.entity_exists("", "templates").expect_err("empty id");
        assert!(matches!(err.root_cause(), StorageError::InvalidKey { .. }));
    }

    #[test]
    fn test_corrupt_payload_is_serialization_error() {
        let (pool, _dir) = create_test_pool();
        let store = store_for(&pool, "alpha");
        store
            .transaction("templates", true, |txn| txn.put("alpha:bad", b"not json"))
            .expect("seed");
        let err = store
            .load_entity::<Template>("bad", "templates")
            .expect_err("corrupt payload");
        assert!(matches!(err.root_cause(), StorageError::Serialization { .. }));
    }

    #[test]
    fn test_reserved_database_names_rejected() {
        let (pool, _dir) = create_test_pool();
        let store = store_for(&pool, "alpha");
        let err = store
            .store_entity(&template("x", 1), "t1", META_DATABASE)
            .expect_err("reserved");
        assert!(matches!(err.root_cause(), StorageError::InvalidName { .. }));
    }

    #[test]
    fn test_clear_database_only_touches_own_workspace() {
        let (pool, _dir) = create_test_pool();
        let store = store_for(&pool, "alpha");
        for id in ["a", "b", "c"] {
            store
                .store_entity(&template(id, 1), id, "templates")
                .expect("store");
        }
        store
            .store_entity(&template("other", 1), "o", "other")
            .expect("store");

        assert_eq!(store.clear_database("templates").expect("clear"), 3);
        assert_eq!(store.count("", "templates").expect("count"), 0);
        assert_eq!(store.count("", "other").expect("count"), 1);
    }

    #[test]
    fn test_transaction_stats_and_pool_release() {
        let (pool, _dir) = create_test_pool();
        let store = store_for(&pool, "alpha");
        store
            .store_entity(&template("a", 1), "a", "templates")
            .expect("store");
        let _: Option<Template> = store.load_entity("a", "templates").expect("load");

        let stats = store.transaction_stats();
        assert!(stats.committed >= 2);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.total, stats.committed + stats.aborted);

        let pool_stats = pool.stats();
        assert_eq!(pool_stats.in_use, 0);
        assert!(pool_stats.idle >= 1);
    }

    #[test]
    fn test_entity_store_contract() {
        fn roundtrip<E: EntityStore>(store: &E) -> StratumResult<Option<Template>> {
            store.store(&template("via-trait", 7), "t", "templates")?;
            store.load("t", "templates")
        }

        let (pool, _dir) = create_test_pool();
        let store = store_for(&pool, "alpha");
        let loaded = roundtrip(&store).expect("roundtrip");
        assert_eq!(loaded, Some(template("via-trait", 7)));
        assert_eq!(EntityStore::count(&store, "", "templates").expect("count"), 1);
    }
}
