//! Access levels and governed resource types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Requested or permitted access level. Ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    None,
    Read,
    Write,
    Admin,
    Full,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::None => "NONE",
            AccessLevel::Read => "READ",
            AccessLevel::Write => "WRITE",
            AccessLevel::Admin => "ADMIN",
            AccessLevel::Full => "FULL",
        }
    }

    /// Write, admin and full access all mutate state.
    pub fn is_mutating(&self) -> bool {
        *self >= AccessLevel::Write
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(AccessLevel::None),
            "read" => Ok(AccessLevel::Read),
            "write" => Ok(AccessLevel::Write),
            "admin" => Ok(AccessLevel::Admin),
            "full" => Ok(AccessLevel::Full),
            _ => Err(ParseEnumError {
                kind: "access level",
                value: s.to_string(),
            }),
        }
    }
}

/// Kind of resource a governed request touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    File,
    Directory,
    Database,
    Cache,
    Template,
    Pipeline,
    Memory,
    Storage,
    Network,
    Api,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::File => "FILE",
            ResourceType::Directory => "DIRECTORY",
            ResourceType::Database => "DATABASE",
            ResourceType::Cache => "CACHE",
            ResourceType::Template => "TEMPLATE",
            ResourceType::Pipeline => "PIPELINE",
            ResourceType::Memory => "MEMORY",
            ResourceType::Storage => "STORAGE",
            ResourceType::Network => "NETWORK",
            ResourceType::Api => "API",
        }
    }

    /// Resources addressed by a filesystem path relative to the workspace root.
    pub fn is_path_based(&self) -> bool {
        matches!(self, ResourceType::File | ResourceType::Directory)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(ResourceType::File),
            "directory" => Ok(ResourceType::Directory),
            "database" => Ok(ResourceType::Database),
            "cache" => Ok(ResourceType::Cache),
            "template" => Ok(ResourceType::Template),
            "pipeline" => Ok(ResourceType::Pipeline),
            "memory" => Ok(ResourceType::Memory),
            "storage" => Ok(ResourceType::Storage),
            "network" => Ok(ResourceType::Network),
            "api" => Ok(ResourceType::Api),
            _ => Err(ParseEnumError {
                kind: "resource type",
                value: s.to_string(),
            }),
        }
    }
}

/// Error when parsing an unknown enum string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_level_ordering() {
        assert!(AccessLevel::None < AccessLevel::Read);
        assert!(AccessLevel::Read < AccessLevel::Write);
        assert!(AccessLevel::Write < AccessLevel::Admin);
        assert!(AccessLevel::Admin < AccessLevel::Full);
        assert!(!AccessLevel::Read.is_mutating());
        assert!(AccessLevel::Write.is_mutating());
        assert!(AccessLevel::Full.is_mutating());
    }

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!("WRITE".parse::<AccessLevel>(), Ok(AccessLevel::Write));
        assert_eq!("file".parse::<ResourceType>(), Ok(ResourceType::File));
        assert!("superuser".parse::<AccessLevel>().is_err());
    }

    #[test]
    fn test_display_matches_as_str() {
        assert_eq!(AccessLevel::Admin.to_string(), "ADMIN");
        assert_eq!(ResourceType::Database.to_string(), "DATABASE");
    }
}
