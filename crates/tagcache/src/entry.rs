//! Cache entries and their storage

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::keys::KeyNamespace;
use crate::store::{BoundedStore, KvStore};

/// Absolute expiry of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lifespan {
    /// Unix time in seconds after which the store drops the entry
    pub expire_at: i64,
}

/// The unit of caching, persisted as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Opaque payload supplied by the caller
    pub value: serde_json::Value,
    /// Declared tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Write time in milliseconds since the Unix epoch
    pub last_modified: i64,
    /// Expiry, absent when the caller has no TTL policy
    #[serde(default)]
    pub lifespan: Option<Lifespan>,
}

impl CacheEntry {
    /// Build an entry; duplicate tags are dropped
    pub fn new<I, T>(value: serde_json::Value, tags: I, last_modified: i64) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut deduped: Vec<String> = Vec::new();
        for tag in tags {
            let tag = tag.into();
            if !deduped.contains(&tag) {
                deduped.push(tag);
            }
        }

        Self {
            value,
            tags: deduped,
            last_modified,
            lifespan: None,
        }
    }

    /// Attach an absolute expiry (Unix seconds)
    pub fn with_expire_at(mut self, expire_at: i64) -> Self {
        self.lifespan = Some(Lifespan { expire_at });
        self
    }

    /// Decode persisted bytes; anything unreadable is `None`
    pub fn decode(raw: &[u8]) -> Option<Self> {
        serde_json::from_slice::<Option<Self>>(raw).ok().flatten()
    }
}

/// Reads and writes serialized entries under namespaced keys
pub struct EntryStore<S: ?Sized> {
    store: BoundedStore<S>,
    namespace: KeyNamespace,
}

impl<S: KvStore + ?Sized> EntryStore<S> {
    /// Create an entry store over `store`
    pub fn new(store: BoundedStore<S>, namespace: KeyNamespace) -> Self {
        Self { store, namespace }
    }

    /// Fetch the entry cached under `key`
    ///
    /// Malformed bytes are a miss so the caller recomputes the value.
    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let storage_key = self.namespace.entry_key(key);
        let Some(raw) = self.store.get(&storage_key).await? else {
            return Ok(None);
        };

        let entry = CacheEntry::decode(&raw);
        if entry.is_none() {
            debug!(key, bytes = raw.len(), "Discarding undecodable cache entry");
        }
        Ok(entry)
    }

    /// Write the entry and, when it has a lifespan, its expiry
    ///
    /// The expiry is issued after the value write because `SET` clears any
    /// existing TTL on the key.
    pub async fn set(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let storage_key = self.namespace.entry_key(key);
        let encoded = serde_json::to_vec(entry)?;

        self.store.set(&storage_key, &encoded).await?;
        if let Some(lifespan) = entry.lifespan {
            self.store
                .expire_at(&storage_key, lifespan.expire_at)
                .await?;
        }
        Ok(())
    }

    /// Delete the entries cached under `keys`; missing ones are ignored
    pub async fn delete(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let storage_keys = self.namespace.entry_keys(keys);
        self.store.delete(&storage_keys).await
    }
}
