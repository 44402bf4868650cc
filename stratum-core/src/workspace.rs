//! Workspace names and workspace-scoped keys.
//!
//! A `WorkspaceKey` can only be built from a validated `WorkspaceName`, so
//! every key that reaches the store or the cache carries its workspace as a
//! prefix. Two workspaces never share a key, and a prefix scan under one
//! workspace can never reach another workspace's records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::StorageError;

/// Separator between the workspace name and the rest of a key.
pub const KEY_SEPARATOR: char = ':';

/// Longest accepted workspace name.
pub const MAX_WORKSPACE_NAME_LEN: usize = 64;

/// A validated workspace name.
///
/// Names are restricted to ASCII alphanumerics, `-`, `_` and `.`, and may not
/// be `.` or `..`, so a name is always safe to use as a directory component
/// and never contains the key separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkspaceName(String);

impl WorkspaceName {
    /// Validate and wrap a workspace name.
    pub fn new(name: impl Into<String>) -> Result<Self, StorageError> {
        let name = name.into();
        validate_component(&name, MAX_WORKSPACE_NAME_LEN)?;
        Ok(Self(name))
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix shared by every key in this workspace (`"<name>:"`).
    pub fn key_prefix(&self) -> String {
        format!("{}{}", self.0, KEY_SEPARATOR)
    }
}

impl fmt::Display for WorkspaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WorkspaceName {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for WorkspaceName {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WorkspaceName> for String {
    fn from(value: WorkspaceName) -> Self {
        value.0
    }
}

impl AsRef<str> for WorkspaceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validate a name that will be used as a single path component
/// (workspace directory or database directory).
pub fn validate_component(name: &str, max_len: usize) -> Result<(), StorageError> {
    let invalid = |reason: &str| StorageError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if name.len() > max_len {
        return Err(invalid(&format!("name exceeds {max_len} characters")));
    }
    if name == "." || name == ".." {
        return Err(invalid("name must not be a relative path component"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid(
            "only ASCII letters, digits, '-', '_' and '.' are allowed",
        ));
    }
    Ok(())
}

/// A key scoped to a single workspace.
///
/// The encoded form is `"<workspace>:<id>"`. The inner fields are private, so
/// the only way to obtain a key is through [`WorkspaceKey::new`], which needs
/// a `WorkspaceName`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspaceKey {
    inner: WorkspaceKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WorkspaceKeyInner {
    workspace: WorkspaceName,
    id: String,
}

impl WorkspaceKey {
    /// Create a key for `id` inside `workspace`.
    pub fn new(workspace: &WorkspaceName, id: impl Into<String>) -> Self {
        Self {
            inner: WorkspaceKeyInner {
                workspace: workspace.clone(),
                id: id.into(),
            },
        }
    }

    /// The workspace this key belongs to.
    pub fn workspace(&self) -> &WorkspaceName {
        &self.inner.workspace
    }

    /// The unscoped identifier.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Encode to the stored string form.
    pub fn encode(&self) -> String {
        format!(
            "{}{}{}",
            self.inner.workspace, KEY_SEPARATOR, self.inner.id
        )
    }

    /// Decode a stored key. Returns `None` when there is no separator or the
    /// workspace part is not a valid name.
    pub fn decode(encoded: &str) -> Option<Self> {
        let (workspace, id) = encoded.split_once(KEY_SEPARATOR)?;
        let workspace = WorkspaceName::new(workspace).ok()?;
        Some(Self::new(&workspace, id))
    }

    /// Encoded prefix selecting every key of `workspace` whose id starts with
    /// `id_prefix`.
    pub fn prefix(workspace: &WorkspaceName, id_prefix: &str) -> String {
        format!("{}{}{}", workspace, KEY_SEPARATOR, id_prefix)
    }
}

impl fmt::Display for WorkspaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in ["alpha", "team-1", "ws_2", "v1.2", "A"] {
            assert!(WorkspaceName::new(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_rejects_path_escapes() {
        for name in ["", ".", "..", "../etc", "a/b", "a\\b", "a:b", "white space"] {
            assert!(WorkspaceName::new(name).is_err(), "{name:?} should be rejected");
        }
    }

    #[test]
    fn test_rejects_overlong_name() {
        let name = "x".repeat(MAX_WORKSPACE_NAME_LEN + 1);
        assert!(WorkspaceName::new(name).is_err());
    }

    #[test]
    fn test_key_encode_decode() {
        let ws = WorkspaceName::new("alpha").expect("valid name");
        let key = WorkspaceKey::new(&ws, "pipeline:build");
        assert_eq!(key.encode(), "alpha:pipeline:build");

        let decoded = WorkspaceKey::decode(&key.encode()).expect("decode should succeed");
        assert_eq!(decoded, key);
        assert_eq!(decoded.id(), "pipeline:build");
    }

    #[test]
    fn test_different_workspaces_different_keys() {
        let a = WorkspaceName::new("alpha").expect("valid name");
        let b = WorkspaceName::new("beta").expect("valid name");
        assert_ne!(
            WorkspaceKey::new(&a, "x").encode(),
            WorkspaceKey::new(&b, "x").encode()
        );
    }

    #[test]
    fn test_prefix_does_not_match_sibling_workspace() {
        // "alpha" must not select keys of "alpha2"
        let alpha = WorkspaceName::new("alpha").expect("valid name");
        let alpha2 = WorkspaceName::new("alpha2").expect("valid name");
        let prefix = WorkspaceKey::prefix(&alpha, "");
        assert!(!WorkspaceKey::new(&alpha2, "x").encode().starts_with(&prefix));
        assert!(WorkspaceKey::new(&alpha, "x").encode().starts_with(&prefix));
    }

    #[test]
    fn test_serde_validates() {
        let ok: Result<WorkspaceName, _> = serde_json::from_str("\"alpha\"");
        assert!(ok.is_ok());
        let bad: Result<WorkspaceName, _> = serde_json::from_str("\"../alpha\"");
        assert!(bad.is_err());
    }
}
