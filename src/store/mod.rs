//! Shared key-value metadata store.
//!
//! The store holds cluster/node topology written by other agents and the
//! summaries this service derives. It is reached through the [`KvStore`]
//! contract; [`MetadataStore`] dispatches to the configured implementation.

pub mod central;
pub mod etcd;
pub mod memory;

use serde_json::Value;
use thiserror::Error;

use self::etcd::EtcdClient;
use self::memory::MemoryStore;

/// Errors returned by metadata store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("key not found: {key}")]
    NotFound { key: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("decoding {key}: {reason}")]
    Decode { key: String, reason: String },
}

impl StoreError {
    /// Returns true when the key simply does not exist yet.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub(crate) fn decode(key: &str, reason: impl std::fmt::Display) -> Self {
        Self::Decode {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Key-value store contract consumed by the aggregation engine.
///
/// Keys are slash-separated paths without a leading slash
/// (e.g. `nodes/<id>/NodeContext/fqdn`).
pub trait KvStore: Send + Sync {
    /// Read the value stored at a leaf key.
    fn get(&self, key: &str) -> impl std::future::Future<Output = Result<String, StoreError>> + Send;

    /// List the names of the direct children of a directory key.
    fn list(
        &self,
        dir: &str,
    ) -> impl std::future::Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Read a whole subtree. Directories become JSON objects keyed by child
    /// name, leaves become JSON strings.
    fn read_tree(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Value, StoreError>> + Send;

    /// Write a leaf value, overwriting whatever is there.
    fn put(
        &self,
        key: &str,
        value: &str,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}

/// Metadata store dispatching to etcd or to the in-process map.
#[derive(Clone)]
pub enum MetadataStore {
    Etcd(EtcdClient),
    Memory(MemoryStore),
}

impl MetadataStore {
    /// Returns the backend name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Etcd(_) => "etcd",
            Self::Memory(_) => "memory",
        }
    }
}

impl KvStore for MetadataStore {
    async fn get(&self, key: &str) -> Result<String, StoreError> {
        match self {
            Self::Etcd(s) => s.get(key).await,
            Self::Memory(s) => s.get(key).await,
        }
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, StoreError> {
        match self {
            Self::Etcd(s) => s.list(dir).await,
            Self::Memory(s) => s.list(dir).await,
        }
    }

    async fn read_tree(&self, key: &str) -> Result<Value, StoreError> {
        match self {
            Self::Etcd(s) => s.read_tree(key).await,
            Self::Memory(s) => s.read_tree(key).await,
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        match self {
            Self::Etcd(s) => s.put(key, value).await,
            Self::Memory(s) => s.put(key, value).await,
        }
    }
}

/// Strip leading/trailing slashes so both `"/nodes/"` and `"nodes"` address
/// the same directory.
pub(crate) fn normalize_key(key: &str) -> &str {
    key.trim_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("/nodes/"), "nodes");
        assert_eq!(normalize_key("nodes/a/b"), "nodes/a/b");
        assert_eq!(normalize_key(""), "");
    }

    #[test]
    fn test_store_error_is_not_found() {
        let err = StoreError::NotFound {
            key: "nodes/x".to_string(),
        };
        assert!(err.is_not_found());
        assert!(!StoreError::Unavailable("boom".to_string()).is_not_found());
        assert!(err.to_string().contains("nodes/x"));
    }

    #[tokio::test]
    async fn test_metadata_store_dispatches_to_memory() {
        let store = MetadataStore::Memory(MemoryStore::new());
        store.put("a/b", "1").await.expect("put should succeed");
        assert_eq!(store.get("a/b").await.expect("value exists"), "1");
        assert_eq!(store.name(), "memory");
    }
}
