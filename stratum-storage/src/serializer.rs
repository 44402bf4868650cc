//! Entity serialization contract.
//!
//! The store treats payloads as opaque bytes. A serializer turns a domain
//! type into those bytes and back; any format works as long as the round
//! trip is lossless for the type.

use serde::{de::DeserializeOwned, Serialize};
use stratum_core::StorageError;

/// Marker trait for types that can be persisted through the entity store.
///
/// `entity_type()` names the type in error reports and must be the same for
/// every instance.
pub trait StorableEntity: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn entity_type() -> &'static str;
}

impl StorableEntity for serde_json::Value {
    fn entity_type() -> &'static str {
        "json"
    }
}

impl StorableEntity for String {
    fn entity_type() -> &'static str {
        "string"
    }
}

/// Pluggable payload format.
pub trait EntitySerializer: Send + Sync + 'static {
    /// Short format name, for diagnostics.
    fn format(&self) -> &'static str;

    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, StorageError>;

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, StorageError>;
}

/// Compact JSON payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl EntitySerializer for JsonSerializer {
    fn format(&self) -> &'static str {
        "json"
    }

    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec(value).map_err(|e| StorageError::Serialization {
            reason: e.to_string(),
        })
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, StorageError> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization {
            reason: e.to_string(),
        })
    }
}
