//! Flat key/value store abstraction.
//!
//! All registry state lives behind [`KvStore`] so the service can run
//! against any backend supporting put, delete, point get and lexicographic
//! range get. The `mem:` URL scheme selects [`MemKv`], an in-process
//! BTreeMap backend that doubles as the test fixture.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

/// Sentinel key stored at startup and read back by the readiness probe.
pub const HEALTH_KEY: &str = "HMNFD_HEALTH_KEY";
/// Value stored under [`HEALTH_KEY`].
pub const HEALTH_VALUE: &str = "HMNFD_OK";

/// Store operation errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The backend rejected or failed the operation.
    #[error("kv operation failed: {reason}")]
    Backend {
        /// Backend-specific failure description.
        reason: String,
    },

    /// The KV URL names a backend this build does not support.
    #[error("unsupported kv url '{url}'")]
    UnsupportedUrl {
        /// The offending URL.
        url: String,
    },
}

/// One key/value pair from a range read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    /// The key.
    pub key: String,
    /// The stored value.
    pub value: String,
}

/// Flat key/value store contract.
///
/// Range reads are inclusive of both bounds and return pairs in key order.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Upserts `value` under `key`.
    async fn store(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Returns the value under `key`, or `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Deletes `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Returns all pairs with `start <= key <= end`, in key order.
    async fn get_range(&self, start: &str, end: &str) -> Result<Vec<KvPair>, StoreError>;
}

/// In-process store backend.
///
/// Keys live in a BTreeMap, which makes the lexicographic range read a
/// natural operation. Suitable for single-instance deployments and tests;
/// multi-instance deployments need a shared backend.
#[derive(Debug, Default)]
pub struct MemKv {
    data: RwLock<BTreeMap<String, String>>,
}

impl MemKv {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// True when no keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl KvStore for MemKv {
    async fn store(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.data.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.data.write().remove(key);
        Ok(())
    }

    async fn get_range(&self, start: &str, end: &str) -> Result<Vec<KvPair>, StoreError> {
        let data = self.data.read();
        Ok(data
            .range(start.to_string()..=end.to_string())
            .map(|(k, v)| KvPair {
                key: k.clone(),
                value: v.clone(),
            })
            .collect())
    }
}

/// Opens the store backend named by `url`.
///
/// # Errors
///
/// Returns [`StoreError::UnsupportedUrl`] for URL schemes this build does
/// not implement; external backends are deployment concerns.
pub fn open_kv(url: &str) -> Result<Arc<dyn KvStore>, StoreError> {
    if url.starts_with("mem:") {
        Ok(Arc::new(MemKv::new()))
    } else {
        Err(StoreError::UnsupportedUrl {
            url: url.to_string(),
        })
    }
}
