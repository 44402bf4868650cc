//! Workspace isolation: allow-list, access ceilings and path containment.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use parking_lot::RwLock;
use stratum_core::{AccessError, GovernanceConfig, WorkspacePolicy};
use tracing::{debug, warn};

use crate::request::{AccessRequest, AccessResult};
use crate::traits::AccessController;

pub struct WorkspaceAccessController {
    allowed: RwLock<Option<HashSet<String>>>,
    policies: RwLock<HashMap<String, WorkspacePolicy>>,
}

impl Default for WorkspaceAccessController {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkspaceAccessController {
    /// No allow-list and no policies: every workspace gets the default policy.
    pub fn new() -> Self {
        Self {
            allowed: RwLock::new(None),
            policies: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &GovernanceConfig) -> Self {
        Self {
            allowed: RwLock::new(
                config
                    .allowed_workspaces
                    .as_ref()
                    .map(|names| names.iter().cloned().collect()),
            ),
            policies: RwLock::new(config.workspaces.clone()),
        }
    }

    /// Restrict access to the listed workspaces.
    pub fn set_allowed_workspaces<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.allowed.write() = Some(names.into_iter().map(Into::into).collect());
    }

    pub fn set_policy(&self, workspace: impl Into<String>, policy: WorkspacePolicy) {
        self.policies.write().insert(workspace.into(), policy);
    }

    pub fn remove_policy(&self, workspace: &str) -> Option<WorkspacePolicy> {
        self.policies.write().remove(workspace)
    }

    /// Policy in force for `workspace` (the default when none is configured).
    pub fn policy(&self, workspace: &str) -> WorkspacePolicy {
        self.policies
            .read()
            .get(workspace)
            .cloned()
            .unwrap_or_default()
    }

    fn is_listed(&self, workspace: &str) -> bool {
        match &*self.allowed.read() {
            Some(names) => names.contains(workspace),
            None => true,
        }
    }
}

impl AccessController for WorkspaceAccessController {
    fn name(&self) -> &str {
        "workspace"
    }

    fn check_access(&self, request: &AccessRequest) -> AccessResult {
        let workspace = &request.workspace_name;
        let level = request.access_level;

        if !self.is_listed(workspace) {
            return AccessResult::deny(
                level,
                format!("Workspace '{workspace}' is not in the allowed workspace list"),
            );
        }

        let policy = self.policy(workspace);
        if level > policy.max_access_level {
            return AccessResult::deny(
                level,
                format!(
                    "Access level {level} exceeds maximum {} for workspace '{workspace}'",
                    policy.max_access_level
                ),
            );
        }

        if request.resource_type.is_path_based() {
            if let Some(root) = &policy.root {
                if let Err(reason) = resolve_within(root, &request.resource_id) {
                    warn!(
                        workspace = %workspace,
                        resource = %request.resource_id,
                        reason = %reason,
                        "Rejected path outside workspace root"
                    );
                    return AccessResult::deny(level, reason);
                }
            }
        }

        let result = AccessResult::allow(level, format!("Workspace access granted for '{workspace}'"));
        if policy.read_only {
            result.with_restriction("workspace is read-only")
        } else {
            result
        }
    }

    fn enforce_limits(&self, request: &AccessRequest) -> Result<AccessResult, AccessError> {
        let result = self.check_access(request).into_result(&request.resource_id)?;
        let policy = self.policy(&request.workspace_name);
        if policy.read_only && request.access_level.is_mutating() {
            return Err(AccessError::Denied {
                resource_id: request.resource_id.clone(),
                reason: format!(
                    "Workspace '{}' is read-only; {} access refused",
                    request.workspace_name, request.access_level
                ),
            });
        }
        Ok(result)
    }

    fn track_usage(&self, request: &AccessRequest, result: &AccessResult) {
        debug!(
            workspace = %request.workspace_name,
            resource = %request.resource_id,
            level = %request.access_level,
            allowed = result.allowed,
            "Workspace access recorded"
        );
    }
}

/// Resolve `resource` against `root` and require the result to stay under it.
///
/// The longest existing prefix is canonicalized by the OS, which resolves
/// symlinks and `..` faithfully. The missing remainder may only contain plain
/// names, so nothing below it can be redirected.
pub fn resolve_within(root: &Path, resource: &str) -> Result<PathBuf, String> {
    let root = root.canonicalize().map_err(|e| {
        format!(
            "Workspace root '{}' is not accessible: {e}",
            root.display()
        )
    })?;

    let requested = Path::new(resource);
    let joined = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    };

    let mut existing = PathBuf::new();
    let mut missing: Vec<Component<'_>> = Vec::new();
    for component in joined.components() {
        if missing.is_empty() {
            let next = existing.join(component);
            // symlink_metadata so a dangling link counts as existing and fails canonicalize.
            if next.symlink_metadata().is_ok() {
                existing = next;
                continue;
            }
        }
        missing.push(component);
    }

    let mut resolved = existing
        .canonicalize()
        .map_err(|e| format!("Path '{resource}' cannot be resolved: {e}"))?;
    for component in missing {
        match component {
            Component::Normal(name) => resolved.push(name),
            Component::CurDir => {}
            _ => {
                return Err(format!(
                    "Path '{resource}' escapes the workspace root through a missing directory"
                ))
            }
        }
    }

    if resolved.starts_with(&root) {
        Ok(resolved)
    } else {
        Err(format!("Path '{resource}' escapes the workspace root"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::{AccessLevel, ResourceType};

    fn request(workspace: &str, resource: &str, level: AccessLevel) -> AccessRequest {
        AccessRequest::new(workspace, resource, ResourceType::File, level)
    }

    #[test]
    fn test_default_policy_allows() {
        let controller = WorkspaceAccessController::new();
        let result = controller.check_access(&request("alpha", "x", AccessLevel::Full));
        assert!(result.allowed);
    }

    #[test]
    fn test_allow_list() {
        let controller = WorkspaceAccessController::new();
        controller.set_allowed_workspaces(["alpha"]);
        assert!(controller.check_access(&request("alpha", "x", AccessLevel::Read)).allowed);

        let denied = controller.check_access(&request("beta", "x", AccessLevel::Read));
        assert!(!denied.allowed);
        assert!(denied.reason.contains("not in the allowed workspace list"));
    }

    #[test]
    fn test_max_access_level() {
        let controller = WorkspaceAccessController::new();
        controller.set_policy(
            "alpha",
            WorkspacePolicy::default().with_max_access_level(AccessLevel::Write),
        );
        assert!(controller.check_access(&request("alpha", "x", AccessLevel::Write)).allowed);

        let denied = controller.check_access(&request("alpha", "x", AccessLevel::Admin));
        assert!(!denied.allowed);
        assert!(denied.reason.contains("exceeds maximum WRITE"));
    }

    #[test]
    fn test_read_only_is_enforced_not_checked() {
        let controller = WorkspaceAccessController::new();
        controller.set_policy("alpha", WorkspacePolicy::default().with_read_only(true));

        let write = request("alpha", "file.txt", AccessLevel::Write);
        let checked = controller.check_access(&write);
        assert!(checked.allowed);
        assert_eq!(checked.restrictions, vec!["workspace is read-only".to_string()]);

        let err = controller.enforce_limits(&write).expect_err("read-only");
        assert!(matches!(err, AccessError::Denied { .. }));
        assert!(err.reason().contains("read-only"));

        let read = request("alpha", "file.txt", AccessLevel::Read);
        assert!(controller.enforce_limits(&read).is_ok());
    }

    #[test]
    fn test_path_containment() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("alpha");
        std::fs::create_dir_all(root.join("docs")).expect("mkdir");
        std::fs::write(root.join("docs/readme.md"), b"hi").expect("write");

        let controller = WorkspaceAccessController::new();
        controller.set_policy("alpha", WorkspacePolicy::rooted(&root));

        for inside in ["docs/readme.md", "docs/new.md", "new/dir/file.txt", "docs/../top.txt"] {
            let result = controller.check_access(&request("alpha", inside, AccessLevel::Read));
            assert!(result.allowed, "{inside} should be inside: {}", result.reason);
        }
        for outside in ["../escape.txt", "docs/../../escape.txt", "/etc/passwd", "missing/../../x"] {
            let result = controller.check_access(&request("alpha", outside, AccessLevel::Read));
            assert!(!result.allowed, "{outside} should be rejected");
            assert!(result.reason.contains("escapes the workspace root"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("alpha");
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&root).expect("mkdir");
        std::fs::create_dir_all(&outside).expect("mkdir");
        std::os::unix::fs::symlink(&outside, root.join("link")).expect("symlink");

        let err = resolve_within(&root, "link/secret.txt").expect_err("symlink escape");
        assert!(err.contains("escapes the workspace root"));
    }

    #[test]
    fn test_non_path_resources_skip_containment() {
        let controller = WorkspaceAccessController::new();
        controller.set_policy("alpha", WorkspacePolicy::rooted("/nonexistent/root"));
        let request = AccessRequest::new("alpha", "../../x", ResourceType::Database, AccessLevel::Read);
        assert!(controller.check_access(&request).allowed);
    }
}
