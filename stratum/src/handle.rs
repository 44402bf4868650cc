//! Governed access to one workspace.

use std::sync::Arc;

use stratum_core::{
    AccessLevel, ResourceType, StorageError, StratumError, StratumResult, WorkspaceName,
};
use stratum_governance::{AccessControlManager, AccessRequest};
use stratum_storage::{EntityStore, StorableEntity, TransactionalStore, TxnScope, WorkspaceCache};

use crate::runtime::SharedValue;

/// A workspace as seen by one caller.
///
/// Every operation is admitted by the governance manager before it reaches
/// the store, and its usage is tracked once the operation finishes.
#[derive(Clone)]
pub struct WorkspaceHandle {
    name: WorkspaceName,
    store: Arc<TransactionalStore>,
    governance: Arc<AccessControlManager>,
    cache: WorkspaceCache<SharedValue>,
    user_id: Option<String>,
}

impl WorkspaceHandle {
    pub(crate) fn new(
        name: WorkspaceName,
        store: Arc<TransactionalStore>,
        governance: Arc<AccessControlManager>,
        cache: WorkspaceCache<SharedValue>,
    ) -> Self {
        Self {
            name,
            store,
            governance,
            cache,
            user_id: None,
        }
    }

    /// Attribute subsequent requests to `user_id`.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn name(&self) -> &WorkspaceName {
        &self.name
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// The underlying store, bypassing governance.
    pub fn store(&self) -> &Arc<TransactionalStore> {
        &self.store
    }

    /// This workspace's view of the shared cache.
    pub fn cache(&self) -> &WorkspaceCache<SharedValue> {
        &self.cache
    }

    fn request(&self, db_name: &str, id: &str, level: AccessLevel) -> AccessRequest {
        let request = AccessRequest::new(
            self.name.as_str(),
            format!("{db_name}/{id}"),
            ResourceType::Database,
            level,
        );
        match &self.user_id {
            Some(user) => request.with_user(user.clone()),
            None => request,
        }
    }

    fn governed<T>(
        &self,
        db_name: &str,
        id: &str,
        level: AccessLevel,
        op: impl FnOnce() -> Result<T, StorageError>,
    ) -> StratumResult<T> {
        self.governance
            .with_access(self.request(db_name, id, level), |_| {
                op().map_err(StratumError::from)
            })
    }

    pub fn store_entity<T: StorableEntity>(
        &self,
        entity: &T,
        id: &str,
        db_name: &str,
    ) -> StratumResult<()> {
        self.governed(db_name, id, AccessLevel::Write, || {
            self.store.store_entity(entity, id, db_name)
        })
    }

    pub fn load_entity<T: StorableEntity>(
        &self,
        id: &str,
        db_name: &str,
    ) -> StratumResult<Option<T>> {
        self.governed(db_name, id, AccessLevel::Read, || {
            self.store.load_entity(id, db_name)
        })
    }

    pub fn delete_entity(&self, id: &str, db_name: &str) -> StratumResult<bool> {
        self.governed(db_name, id, AccessLevel::Write, || {
            self.store.delete_entity(id, db_name)
        })
    }

    pub fn entity_exists(&self, id: &str, db_name: &str) -> StratumResult<bool> {
        self.governed(db_name, id, AccessLevel::Read, || {
            self.store.entity_exists(id, db_name)
        })
    }

    pub fn find_by_prefix<T: StorableEntity>(
        &self,
        prefix: &str,
        db_name: &str,
        limit: Option<usize>,
    ) -> StratumResult<Vec<T>> {
        self.governed(db_name, prefix, AccessLevel::Read, || {
            self.store.find_by_prefix(prefix, db_name, limit)
        })
    }

    pub fn count(&self, prefix: &str, db_name: &str) -> StratumResult<u64> {
        self.governed(db_name, prefix, AccessLevel::Read, || {
            self.store.count(prefix, db_name)
        })
    }

    pub fn list_keys(
        &self,
        prefix: &str,
        db_name: &str,
        limit: Option<usize>,
    ) -> StratumResult<Vec<String>> {
        self.governed(db_name, prefix, AccessLevel::Read, || {
            self.store.list_keys(prefix, db_name, limit)
        })
    }

    /// Remove every entity of this workspace from `db_name`. Requires admin access.
    pub fn clear_database(&self, db_name: &str) -> StratumResult<u64> {
        self.governed(db_name, "*", AccessLevel::Admin, || {
            self.store.clear_database(db_name)
        })
    }

    /// Run `f` in one governed transaction. Keys passed to the scope are raw,
    /// so callers that need workspace isolation should build them with
    /// [`WorkspaceKey`](stratum_core::WorkspaceKey).
    pub fn transaction<T, F>(&self, db_name: &str, write: bool, f: F) -> StratumResult<T>
    where
        F: FnOnce(&mut TxnScope<'_>) -> StratumResult<T>,
    {
        let level = if write {
            AccessLevel::Write
        } else {
            AccessLevel::Read
        };
        self.governance
            .with_access(self.request(db_name, "*", level), |_| {
                self.store.transaction(db_name, write, f)
            })
    }
}

impl EntityStore for WorkspaceHandle {
    fn store<T: StorableEntity>(&self, entity: &T, id: &str, db_name: &str) -> StratumResult<()> {
        self.store_entity(entity, id, db_name)
    }

    fn load<T: StorableEntity>(&self, id: &str, db_name: &str) -> StratumResult<Option<T>> {
        self.load_entity(id, db_name)
    }

    fn delete(&self, id: &str, db_name: &str) -> StratumResult<bool> {
        self.delete_entity(id, db_name)
    }

    fn exists(&self, id: &str, db_name: &str) -> StratumResult<bool> {
        self.entity_exists(id, db_name)
    }

    fn scan_by_prefix<T: StorableEntity>(
        &self,
        prefix: &str,
        db_name: &str,
        limit: Option<usize>,
    ) -> StratumResult<Vec<T>> {
        self.find_by_prefix(prefix, db_name, limit)
    }

    fn count(&self, prefix: &str, db_name: &str) -> StratumResult<u64> {
        WorkspaceHandle::count(self, prefix, db_name)
    }
}

impl std::fmt::Debug for WorkspaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceHandle")
            .field("name", &self.name)
            .field("database", &self.store.database())
            .field("user_id", &self.user_id)
            .finish()
    }
}
