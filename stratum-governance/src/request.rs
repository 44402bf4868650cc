//! Access requests and decisions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratum_core::{AccessError, AccessLevel, ResourceType};
use uuid::Uuid;

/// One governed operation. Built per call and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub request_id: Uuid,
    /// Resource identifier; a path relative to the workspace root for
    /// path-based resource types.
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub access_level: AccessLevel,
    pub workspace_name: String,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AccessRequest {
    pub fn new(
        workspace_name: impl Into<String>,
        resource_id: impl Into<String>,
        resource_type: ResourceType,
        access_level: AccessLevel,
    ) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            resource_id: resource_id.into(),
            resource_type,
            access_level,
            workspace_name: workspace_name.into(),
            user_id: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Why a request was refused, so enforcement can raise the matching error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenialKind {
    /// Not allowed: workspace, level or path containment.
    Denied,
    RateLimited { current: u64, limit: u64 },
    ResourceLimited { current: u64, limit: u64 },
}

/// Outcome of a governance check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessResult {
    pub allowed: bool,
    pub reason: String,
    pub access_level: AccessLevel,
    /// Notes attached to an allowed request (for example, nearing a quota).
    pub restrictions: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub denial: Option<DenialKind>,
}

impl AccessResult {
    pub fn allow(access_level: AccessLevel, reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            access_level,
            restrictions: Vec::new(),
            expires_at: None,
            denial: None,
        }
    }

    pub fn deny(access_level: AccessLevel, reason: impl Into<String>) -> Self {
        Self::refused(access_level, reason, DenialKind::Denied)
    }

    pub fn rate_limited(
        access_level: AccessLevel,
        reason: impl Into<String>,
        current: u64,
        limit: u64,
    ) -> Self {
        Self::refused(access_level, reason, DenialKind::RateLimited { current, limit })
    }

    pub fn resource_limited(
        access_level: AccessLevel,
        reason: impl Into<String>,
        current: u64,
        limit: u64,
    ) -> Self {
        Self::refused(
            access_level,
            reason,
            DenialKind::ResourceLimited { current, limit },
        )
    }

    fn refused(access_level: AccessLevel, reason: impl Into<String>, kind: DenialKind) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            access_level,
            restrictions: Vec::new(),
            expires_at: None,
            denial: Some(kind),
        }
    }

    pub fn with_restriction(mut self, restriction: impl Into<String>) -> Self {
        self.restrictions.push(restriction.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// The typed error for a refusal, `None` when allowed.
    pub fn to_error(&self, resource_id: &str) -> Option<AccessError> {
        if self.allowed {
            return None;
        }
        let reason = self.reason.clone();
        Some(match self.denial.unwrap_or(DenialKind::Denied) {
            DenialKind::Denied => AccessError::Denied {
                resource_id: resource_id.to_string(),
                reason,
            },
            DenialKind::RateLimited { current, limit } => AccessError::RateLimitExceeded {
                reason,
                current,
                limit,
            },
            DenialKind::ResourceLimited { current, limit } => AccessError::ResourceLimitExceeded {
                reason,
                current,
                limit,
            },
        })
    }

    /// `Ok(self)` when allowed, the typed refusal otherwise.
    pub fn into_result(self, resource_id: &str) -> Result<AccessResult, AccessError> {
        match self.to_error(resource_id) {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = AccessRequest::new("alpha", "file.txt", ResourceType::File, AccessLevel::Read)
            .with_user("u-1")
            .with_metadata("origin", serde_json::json!("cli"));
        assert_eq!(request.workspace_name, "alpha");
        assert_eq!(request.user_id.as_deref(), Some("u-1"));
        assert_eq!(request.metadata["origin"], serde_json::json!("cli"));

        let other = AccessRequest::new("alpha", "file.txt", ResourceType::File, AccessLevel::Read);
        assert_ne!(request.request_id, other.request_id);
    }

    #[test]
    fn test_denial_maps_to_typed_error() {
        let denied = AccessResult::deny(AccessLevel::Write, "Workspace 'alpha' is read-only");
        match denied.to_error("file.txt") {
            Some(AccessError::Denied {
                resource_id,
                reason,
            }) => {
                assert_eq!(resource_id, "file.txt");
                assert_eq!(reason, "Workspace 'alpha' is read-only");
            }
            other => panic!("unexpected: {other:?}"),
        }

        let limited = AccessResult::rate_limited(AccessLevel::Read, "Rate limit exceeded", 1, 1);
        assert!(matches!(
            limited.into_result("x"),
            Err(AccessError::RateLimitExceeded {
                current: 1,
                limit: 1,
                ..
            })
        ));

        let quota = AccessResult::resource_limited(AccessLevel::Read, "Resource limit exceeded", 9, 8);
        assert!(matches!(
            quota.to_error("x"),
            Some(AccessError::ResourceLimitExceeded { .. })
        ));
    }

    #[test]
    fn test_allowed_result_has_no_error() {
        let allowed = AccessResult::allow(AccessLevel::Read, "ok").with_restriction("note");
        assert!(allowed.to_error("x").is_none());
        let result = allowed.into_result("x").expect("allowed");
        assert_eq!(result.restrictions, vec!["note".to_string()]);
    }
}
