//! Error types for Stratum operations

use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Connection failed for {workspace}/{database}: {reason}")]
    ConnectionFailed {
        workspace: String,
        database: String,
        reason: String,
    },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    /// Wrapper every entity operation surfaces, naming the operation and the
    /// entity type it was working on.
    #[error("Storage operation '{operation}' failed for {entity_type}: {cause}")]
    Operation {
        operation: String,
        entity_type: String,
        #[source]
        cause: Box<StorageError>,
    },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Store is read-only, cannot {operation}")]
    ReadOnly { operation: String },

    #[error("Connection pool is closed")]
    PoolClosed,
}

impl StorageError {
    /// Wrap this error as the failure of a named entity operation.
    pub fn in_operation(self, operation: &str, entity_type: &str) -> Self {
        match self {
            // Already wrapped by an inner operation; keep the innermost name.
            wrapped @ StorageError::Operation { .. } => wrapped,
            cause => StorageError::Operation {
                operation: operation.to_string(),
                entity_type: entity_type.to_string(),
                cause: Box::new(cause),
            },
        }
    }

    /// The underlying cause, unwrapping any operation wrapper.
    pub fn root_cause(&self) -> &StorageError {
        match self {
            StorageError::Operation { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Whether retrying as a fresh transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root_cause(),
            StorageError::ConnectionFailed { .. } | StorageError::TransactionFailed { .. }
        )
    }
}

/// Governance refusals.
///
/// `Denied` means "not allowed"; the two limit variants mean "try later".
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("Access denied for '{resource_id}': {reason}")]
    Denied { resource_id: String, reason: String },

    #[error("{reason} (current: {current}, limit: {limit})")]
    RateLimitExceeded {
        reason: String,
        current: u64,
        limit: u64,
    },

    #[error("{reason} (current: {current}, limit: {limit})")]
    ResourceLimitExceeded {
        reason: String,
        current: u64,
        limit: u64,
    },
}

impl AccessError {
    /// The verbatim reason produced by the controller that refused access.
    pub fn reason(&self) -> &str {
        match self {
            AccessError::Denied { reason, .. }
            | AccessError::RateLimitExceeded { reason, .. }
            | AccessError::ResourceLimitExceeded { reason, .. } => reason,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },

    #[error("Failed to read configuration file {path}: {reason}")]
    Io { path: String, reason: String },
}

/// Master error type for all Stratum errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StratumError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Access error: {0}")]
    Access(#[from] AccessError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl StratumError {
    /// Connection/transaction failures and rate/resource refusals can succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            StratumError::Storage(e) => e.is_retryable(),
            StratumError::Access(AccessError::Denied { .. }) => false,
            StratumError::Access(_) => true,
            StratumError::Config(_) => false,
        }
    }

    /// Whether this is a governance refusal of any kind.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, StratumError::Access(_))
    }
}

/// Result type alias for Stratum operations.
pub type StratumResult<T> = Result<T, StratumError>;

// =============================================================================
// TESTS
// =============================================================================
