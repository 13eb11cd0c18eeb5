//! The command set the engine needs from the underlying key-value store
//!
//! Implementations: [`MemoryStore`](crate::MemoryStore) for a single process and
//! tests, [`RedisClusterStore`](crate::RedisClusterStore) for a sharded cluster.
//! Deadlines are applied by the caller, not by the store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result, StoreError, StoreResult};

/// Cursor value that starts a hash scan and signals its end
pub const SCAN_START: u64 = 0;

/// One page of a hash scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next page; [`SCAN_START`] once the scan is exhausted
    pub cursor: u64,
    /// Field/value pairs on this page
    pub fields: Vec<(String, Vec<u8>)>,
}

/// Async key-value store with string and hash commands
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Whether the store has a usable connection
    fn is_ready(&self) -> bool {
        true
    }

    /// `GET key`
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// `SET key value`
    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// `EXPIREAT key unix_secs`; an instant in the past removes the key
    async fn expire_at(&self, key: &str, unix_secs: i64) -> StoreResult<()>;

    /// `UNLINK key [key ...]`; missing keys are ignored
    async fn delete(&self, keys: &[String]) -> StoreResult<()>;

    /// `HSET hash field value`
    async fn hash_set_field(&self, hash: &str, field: &str, value: &[u8]) -> StoreResult<()>;

    /// Set `field` to `value` only if it is absent or currently holds a smaller integer
    async fn hash_set_field_max(&self, hash: &str, field: &str, value: i64) -> StoreResult<()>;

    /// `HMGET hash field [field ...]`, one slot per requested field
    async fn hash_get_fields(
        &self,
        hash: &str,
        fields: &[String],
    ) -> StoreResult<Vec<Option<Vec<u8>>>>;

    /// `HDEL hash field [field ...]`
    async fn hash_delete_fields(&self, hash: &str, fields: &[String]) -> StoreResult<()>;

    /// `HSCAN hash cursor COUNT page_size`
    async fn hash_scan_page(&self, hash: &str, cursor: u64, page_size: usize)
        -> StoreResult<ScanPage>;
}

/// A shared store handle that puts a deadline on every command
///
/// Fails fast with [`Error::NotReady`] when the store reports no connection.
pub struct BoundedStore<S: ?Sized> {
    store: Arc<S>,
    timeout: Duration,
}

impl<S: ?Sized> Clone for BoundedStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            timeout: self.timeout,
        }
    }
}

impl<S: KvStore + ?Sized> BoundedStore<S> {
    /// Wrap `store`, bounding each command by `timeout`
    pub fn new(store: Arc<S>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// The wrapped store
    pub fn inner(&self) -> &Arc<S> {
        &self.store
    }

    /// Per-command deadline
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fail with [`Error::NotReady`] unless the store is connected
    pub fn ensure_ready(&self) -> Result<()> {
        if self.store.is_ready() {
            Ok(())
        } else {
            Err(Error::NotReady)
        }
    }

    async fn run<T, F>(&self, command: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(StoreError::Disconnected)) => Err(Error::NotReady),
            Ok(Err(err)) => Err(Error::Store(err)),
            Err(_) => Err(Error::Timeout {
                command,
                after: self.timeout,
            }),
        }
    }

    pub(crate) async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.run("GET", self.store.get(key)).await
    }

    pub(crate) async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.run("SET", self.store.set(key, value)).await
    }

    pub(crate) async fn expire_at(&self, key: &str, unix_secs: i64) -> Result<()> {
        self.run("EXPIREAT", self.store.expire_at(key, unix_secs)).await
    }

    pub(crate) async fn delete(&self, keys: &[String]) -> Result<()> {
        self.run("UNLINK", self.store.delete(keys)).await
    }

    pub(crate) async fn hash_set_field(&self, hash: &str, field: &str, value: &[u8]) -> Result<()> {
        self.run("HSET", self.store.hash_set_field(hash, field, value)).await
    }

    pub(crate) async fn hash_set_field_max(&self, hash: &str, field: &str, value: i64) -> Result<()> {
        self.run("HSETMAX", self.store.hash_set_field_max(hash, field, value)).await
    }

    pub(crate) async fn hash_get_fields(
        &self,
        hash: &str,
        fields: &[String],
    ) -> Result<Vec<Option<Vec<u8>>>> {
        self.run("HMGET", self.store.hash_get_fields(hash, fields)).await
    }

    pub(crate) async fn hash_delete_fields(&self, hash: &str, fields: &[String]) -> Result<()> {
        self.run("HDEL", self.store.hash_delete_fields(hash, fields)).await
    }

    pub(crate) async fn hash_scan_page(
        &self,
        hash: &str,
        cursor: u64,
        page_size: usize,
    ) -> Result<ScanPage> {
        self.run("HSCAN", self.store.hash_scan_page(hash, cursor, page_size)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[tokio::test]
    async fn test_deadline_expires() {
        let store = Arc::new(MemoryStore::new());
        store.set_latency(Duration::from_millis(200));
        let bounded = BoundedStore::new(store, Duration::from_millis(20));

        let err = bounded.get("k").await.unwrap_err();
        assert!(matches!(err, Error::Timeout { command: "GET", .. }));
    }

    #[tokio::test]
    async fn test_disconnected_maps_to_not_ready() {
        let store = Arc::new(MemoryStore::new());
        store.set_ready(false);
        let bounded = BoundedStore::new(store, Duration::from_secs(1));

        assert!(matches!(bounded.ensure_ready(), Err(Error::NotReady)));
        assert!(matches!(bounded.get("k").await, Err(Error::NotReady)));
    }
}
