//! Cache entries, statistics and size estimation.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::serializer::StorableEntity;

/// Fixed per-entry bookkeeping added to every size estimate.
pub const ENTRY_OVERHEAD: usize = 64;

/// Values that can live in the cache.
///
/// `estimated_size` is an approximation used for the memory budget. It must
/// be cheap: proportional to the value, never a deep walk of shared data.
pub trait CacheValue: Clone + Send + Sync + 'static {
    fn estimated_size(&self) -> usize;
}

impl CacheValue for String {
    fn estimated_size(&self) -> usize {
        self.len()
    }
}

impl CacheValue for Vec<u8> {
    fn estimated_size(&self) -> usize {
        self.len()
    }
}

impl CacheValue for serde_json::Value {
    fn estimated_size(&self) -> usize {
        match self {
            serde_json::Value::Null | serde_json::Value::Bool(_) => 8,
            serde_json::Value::Number(_) => 16,
            serde_json::Value::String(s) => s.len(),
            serde_json::Value::Array(items) => {
                items.iter().map(CacheValue::estimated_size).sum::<usize>() + 8
            }
            serde_json::Value::Object(map) => {
                map.iter()
                    .map(|(k, v)| k.len() + v.estimated_size())
                    .sum::<usize>()
                    + 8
            }
        }
    }
}

impl<V: CacheValue> CacheValue for HashMap<String, V> {
    fn estimated_size(&self) -> usize {
        self.iter().map(|(k, v)| k.len() + v.estimated_size()).sum()
    }
}

macro_rules! fixed_size_value {
    ($($ty:ty),*) => {
        $(
            impl CacheValue for $ty {
                fn estimated_size(&self) -> usize {
                    std::mem::size_of::<$ty>()
                }
            }
        )*
    };
}

fixed_size_value!(bool, i32, i64, u32, u64, f64);

/// One cached value with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    /// `None` means the entry never expires by time.
    pub ttl: Option<Duration>,
    pub size_bytes: usize,
}

impl<V: CacheValue> CacheEntry<V> {
    pub fn new(key: impl Into<String>, value: V, ttl: Option<Duration>) -> Self {
        let key = key.into();
        let now = Utc::now();
        let size_bytes = key.len() + value.estimated_size() + ENTRY_OVERHEAD;
        Self {
            key,
            value,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            ttl,
            size_bytes,
        }
    }
}

impl<V> CacheEntry<V> {
    /// True once more than `ttl` has elapsed since creation.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let Some(ttl) = self.ttl else {
            return false;
        };
        match (now - self.created_at).to_std() {
            Ok(age) => age > ttl,
            // Clock went backwards relative to creation.
            Err(_) => false,
        }
    }

    /// Record a read.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed = now;
        self.access_count += 1;
    }

    /// Time left before expiry, `None` when the entry has no ttl.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        let ttl = self.ttl?;
        let age = (now - self.created_at).to_std().unwrap_or_default();
        Some(ttl.saturating_sub(age))
    }
}

impl<V> StorableEntity for CacheEntry<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn entity_type() -> &'static str {
        "cache_entry"
    }
}

/// Cache counters and gauges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_gets: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub total_sets: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub current_entries: u64,
    pub memory_usage_bytes: u64,
}

impl CacheStats {
    /// Hits over gets, 0.0 when nothing was read yet.
    pub fn hit_rate(&self) -> f64 {
        if self.total_gets == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_gets as f64
        }
    }
}
