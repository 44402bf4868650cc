//! Access controller contract.

use stratum_core::AccessError;

use crate::request::{AccessRequest, AccessResult};

/// A governance check.
///
/// `check_access` answers whether a request can structurally happen.
/// `enforce_limits` answers whether it is permitted right now and raises the
/// typed refusal if not. `track_usage` records an admitted request.
pub trait AccessController: Send + Sync {
    fn name(&self) -> &str;

    fn check_access(&self, request: &AccessRequest) -> AccessResult;

    fn enforce_limits(&self, request: &AccessRequest) -> Result<AccessResult, AccessError> {
        self.check_access(request).into_result(&request.resource_id)
    }

    fn track_usage(&self, request: &AccessRequest, result: &AccessResult);
}
