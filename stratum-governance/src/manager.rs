//! Named registry of access controllers and the scoped access guard.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use stratum_core::{AccessError, GovernanceConfig};
use tracing::{debug, warn};

use crate::composite::CompositeAccessController;
use crate::monitor::SecurityMonitor;
use crate::rate_limit::RateLimitController;
use crate::request::{AccessRequest, AccessResult};
use crate::resource_limit::ResourceLimitController;
use crate::traits::AccessController;
use crate::workspace::WorkspaceAccessController;

/// Name of the composite every unqualified check goes through.
pub const DEFAULT_CONTROLLER: &str = "default";

pub struct AccessControlManager {
    default: RwLock<Arc<dyn AccessController>>,
    named: RwLock<HashMap<String, Arc<dyn AccessController>>>,
    workspace: Arc<WorkspaceAccessController>,
    rate_limiter: Arc<RateLimitController>,
    resource_limiter: Arc<ResourceLimitController>,
    monitor: Option<Arc<SecurityMonitor>>,
}

impl AccessControlManager {
    /// Wire the three controllers behind a unanimous `default` composite.
    /// Each one is also addressable under its own name.
    pub fn new(
        workspace: Arc<WorkspaceAccessController>,
        rate_limiter: Arc<RateLimitController>,
        resource_limiter: Arc<ResourceLimitController>,
    ) -> Self {
        let members: Vec<Arc<dyn AccessController>> = vec![
            workspace.clone(),
            rate_limiter.clone(),
            resource_limiter.clone(),
        ];
        let mut named: HashMap<String, Arc<dyn AccessController>> = HashMap::new();
        for member in &members {
            named.insert(member.name().to_string(), member.clone());
        }
        let default: Arc<dyn AccessController> =
            Arc::new(CompositeAccessController::new(DEFAULT_CONTROLLER, members));

        Self {
            default: RwLock::new(default),
            named: RwLock::new(named),
            workspace,
            rate_limiter,
            resource_limiter,
            monitor: None,
        }
    }

    /// Build controllers (and the monitor, when enabled) from configuration.
    pub fn from_config(config: &GovernanceConfig) -> Self {
        let manager = Self::new(
            Arc::new(WorkspaceAccessController::from_config(config)),
            Arc::new(RateLimitController::from_config(config)),
            Arc::new(ResourceLimitController::from_config(config)),
        );
        if config.monitor.enabled {
            manager.with_monitor(Arc::new(SecurityMonitor::new(config.monitor.clone())))
        } else {
            manager
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<SecurityMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Register `controller` under `name`, returning the one it replaces.
    /// Registering under [`DEFAULT_CONTROLLER`] replaces the default composite.
    pub fn register(
        &self,
        name: impl Into<String>,
        controller: Arc<dyn AccessController>,
    ) -> Option<Arc<dyn AccessController>> {
        let name = name.into();
        debug!(controller = %name, "Registering access controller");
        if name == DEFAULT_CONTROLLER {
            let previous = std::mem::replace(&mut *self.default.write(), controller);
            return Some(previous);
        }
        self.named.write().insert(name, controller)
    }

    pub fn controller(&self, name: &str) -> Option<Arc<dyn AccessController>> {
        if name == DEFAULT_CONTROLLER {
            return Some(self.default_controller());
        }
        self.named.read().get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn controller_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.named.read().keys().cloned().collect();
        names.push(DEFAULT_CONTROLLER.to_string());
        names.sort();
        names
    }

    fn default_controller(&self) -> Arc<dyn AccessController> {
        self.default.read().clone()
    }

    pub fn workspace(&self) -> &Arc<WorkspaceAccessController> {
        &self.workspace
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimitController> {
        &self.rate_limiter
    }

    pub fn resource_limiter(&self) -> &Arc<ResourceLimitController> {
        &self.resource_limiter
    }

    pub fn monitor(&self) -> Option<&Arc<SecurityMonitor>> {
        self.monitor.as_ref()
    }

    fn observe(&self, request: &AccessRequest, result: &AccessResult) {
        if let Some(monitor) = &self.monitor {
            monitor.observe(request, result);
        }
    }

    fn refused(&self, controller: &str, request: &AccessRequest, error: &AccessError) {
        warn!(
            controller,
            workspace = %request.workspace_name,
            resource = %request.resource_id,
            level = %request.access_level,
            reason = %error.reason(),
            "Access refused"
        );
        if let Some(monitor) = &self.monitor {
            monitor.record_violation(request, error.reason());
        }
    }

    /// Ask the default composite. Nothing is raised or tracked.
    pub fn check_access(&self, request: &AccessRequest) -> AccessResult {
        let result = self.default_controller().check_access(request);
        self.observe(request, &result);
        result
    }

    /// Ask one named controller. An unknown name is a denial.
    pub fn check_access_with(&self, name: &str, request: &AccessRequest) -> AccessResult {
        let result = match self.controller(name) {
            Some(controller) => controller.check_access(request),
            None => AccessResult::deny(
                request.access_level,
                format!("Unknown access controller '{name}'"),
            ),
        };
        self.observe(request, &result);
        result
    }

    /// Enforce, raise on refusal and record the admitted request, in one call.
    pub fn enforce_access(&self, request: &AccessRequest) -> Result<AccessResult, AccessError> {
        let controller = self.default_controller();
        match controller.enforce_limits(request) {
            Ok(result) => {
                controller.track_usage(request, &result);
                Ok(result)
            }
            Err(error) => {
                self.refused(controller.name(), request, &error);
                Err(error)
            }
        }
    }

    /// Enforce on entry. Usage is tracked when the returned scope is dropped,
    /// however the holder leaves it.
    pub fn acquire(&self, request: AccessRequest) -> Result<AccessScope, AccessError> {
        let controller = self.default_controller();
        match controller.enforce_limits(&request) {
            Ok(result) => Ok(AccessScope {
                controller,
                request,
                result,
            }),
            Err(error) => {
                self.refused(controller.name(), &request, &error);
                Err(error)
            }
        }
    }

    /// Run `f` inside an access scope.
    pub fn with_access<T, E, F>(&self, request: AccessRequest, f: F) -> Result<T, E>
    where
        F: FnOnce(&AccessResult) -> Result<T, E>,
        E: From<AccessError>,
    {
        let scope = self.acquire(request)?;
        f(scope.result())
    }

    /// Async [`with_access`](Self::with_access). Dropping the future before it
    /// completes still tracks the usage.
    pub async fn with_access_async<T, E, F, Fut>(&self, request: AccessRequest, f: F) -> Result<T, E>
    where
        F: FnOnce(AccessResult) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<AccessError>,
    {
        let scope = self.acquire(request)?;
        let output = f(scope.result().clone()).await;
        drop(scope);
        output
    }
}

/// Admission for one governed operation. Tracks usage on drop.
pub struct AccessScope {
    controller: Arc<dyn AccessController>,
    request: AccessRequest,
    result: AccessResult,
}

impl AccessScope {
    pub fn request(&self) -> &AccessRequest {
        &self.request
    }

    pub fn result(&self) -> &AccessResult {
        &self.result
    }
}

impl Drop for AccessScope {
    fn drop(&mut self) {
        self.controller.track_usage(&self.request, &self.result);
    }
}

impl std::fmt::Debug for AccessScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessScope")
            .field("controller", &self.controller.name())
            .field("request", &self.request)
            .field("result", &self.result)
            .finish()
    }
}
