//! Unanimous composition of access controllers.

use std::sync::Arc;

use stratum_core::AccessError;

use crate::request::{AccessRequest, AccessResult};
use crate::traits::AccessController;

/// Allows a request only if every member allows it. The first refusal is
/// returned unchanged, so the caller sees which controller refused and why.
pub struct CompositeAccessController {
    name: String,
    controllers: Vec<Arc<dyn AccessController>>,
}

impl CompositeAccessController {
    pub fn new(name: impl Into<String>, controllers: Vec<Arc<dyn AccessController>>) -> Self {
        Self {
            name: name.into(),
            controllers,
        }
    }

    pub fn push(&mut self, controller: Arc<dyn AccessController>) {
        self.controllers.push(controller);
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    fn granted(&self, request: &AccessRequest, results: Vec<AccessResult>) -> AccessResult {
        let mut combined = AccessResult::allow(
            request.access_level,
            format!("Access granted by {} controllers", results.len()),
        );
        for result in results {
            combined.restrictions.extend(result.restrictions);
            combined.expires_at = match (combined.expires_at, result.expires_at) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }
        combined
    }
}

impl AccessController for CompositeAccessController {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_access(&self, request: &AccessRequest) -> AccessResult {
        let mut results = Vec::with_capacity(self.controllers.len());
        for controller in &self.controllers {
            let result = controller.check_access(request);
            if !result.allowed {
                return result;
            }
            results.push(result);
        }
        self.granted(request, results)
    }

    fn enforce_limits(&self, request: &AccessRequest) -> Result<AccessResult, AccessError> {
        let mut results = Vec::with_capacity(self.controllers.len());
        for controller in &self.controllers {
            results.push(controller.enforce_limits(request)?);
        }
        Ok(self.granted(request, results))
    }

    fn track_usage(&self, request: &AccessRequest, result: &AccessResult) {
        for controller in &self.controllers {
            controller.track_usage(request, result);
        }
    }
}
